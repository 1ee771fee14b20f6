use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

use crate::errors::Result;

/// Gzip `data` in memory with the default compression level.
pub fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
