use chrono::{DateTime, Utc};
use gpuport_utils::gzip_bytes;
use log::{debug, info};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::filename::resolve_filename;
use crate::config::{Compression, LocalOutputConfig};
use crate::errors::OutputError;

/// Write `payload` to a file under `config.path`, returning the file path.
pub fn write_local(
    payload: &str,
    config: &LocalOutputConfig,
    metadata: &HashMap<String, String>,
) -> Result<PathBuf, OutputError> {
    write_local_at(payload, config, metadata, Utc::now())
}

pub fn write_local_at(
    payload: &str,
    config: &LocalOutputConfig,
    metadata: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Result<PathBuf, OutputError> {
    ensure_dir(&config.path, config.create_dirs)?;

    let mut filename = resolve_filename(&config.filename_pattern, metadata, now)?;
    if config.compression == Compression::Gzip && !filename.ends_with(".gz") {
        filename.push_str(".gz");
    }

    let target = config.path.join(&filename);
    if let Some(parent) = target.parent() {
        ensure_dir(parent, config.create_dirs)?;
    }

    if target.exists() && !config.overwrite {
        return Err(OutputError::FileExists(target));
    }

    let bytes = match config.compression {
        Compression::Gzip => gzip_bytes(payload.as_bytes())?,
        Compression::None => payload.as_bytes().to_vec(),
    };

    write_atomic(&target, config.overwrite, |file| file.write_all(&bytes))?;

    info!("Wrote {} bytes to {}", bytes.len(), target.display());
    Ok(target)
}

fn ensure_dir(dir: &Path, create: bool) -> Result<(), OutputError> {
    if dir.is_dir() {
        return Ok(());
    }
    if !create {
        return Err(OutputError::DirectoryNotFound(dir.to_path_buf()));
    }
    debug!("Creating output directory {}", dir.display());
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Write through a temp file in the target directory, then rename into place.
///
/// The temp file is removed on every failure path, so an interrupted write
/// never leaves a partial target behind.
fn write_atomic<F>(target: &Path, overwrite: bool, write: F) -> Result<(), OutputError>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".gpuport-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    write(temp.as_file_mut())?;
    temp.as_file().sync_all()?;

    let persisted = if overwrite {
        temp.persist(target)
    } else {
        temp.persist_noclobber(target)
    };

    match persisted {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            Err(OutputError::FileExists(target.to_path_buf()))
        }
        Err(e) => Err(OutputError::Io(e.error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap()
    }

    fn metadata() -> HashMap<String, String> {
        HashMap::from([
            ("provider".to_string(), "runpod".to_string()),
            ("format".to_string(), "json".to_string()),
        ])
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_write_with_default_pattern() {
        let dir = TempDir::new().unwrap();
        let config = LocalOutputConfig::new(dir.path());

        let path = write_local_at("[]", &config, &metadata(), now()).unwrap();

        assert_eq!(path, dir.path().join("runpod_2025-01-15_10-30-00.json"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
        assert_eq!(entries(dir.path()).len(), 1);
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let config = LocalOutputConfig::new(&nested);

        let path = write_local_at("{}", &config, &metadata(), now()).unwrap();
        assert!(path.starts_with(&nested));
    }

    #[test]
    fn test_missing_directory_without_create() {
        let dir = TempDir::new().unwrap();
        let config = LocalOutputConfig {
            create_dirs: false,
            ..LocalOutputConfig::new(dir.path().join("missing"))
        };

        let err = write_local_at("{}", &config, &metadata(), now()).unwrap_err();
        assert!(matches!(err, OutputError::DirectoryNotFound(_)));
    }

    #[test]
    fn test_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let config = LocalOutputConfig {
            filename_pattern: "fixed.json".to_string(),
            ..LocalOutputConfig::new(dir.path())
        };

        write_local_at("first", &config, &metadata(), now()).unwrap();
        let err = write_local_at("second", &config, &metadata(), now()).unwrap_err();
        assert!(matches!(err, OutputError::FileExists(_)));
        assert_eq!(
            fs::read_to_string(dir.path().join("fixed.json")).unwrap(),
            "first"
        );

        let config = LocalOutputConfig {
            overwrite: true,
            ..config
        };
        write_local_at("second", &config, &metadata(), now()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("fixed.json")).unwrap(),
            "second"
        );
    }

    #[test]
    fn test_gzip_appends_extension() {
        let dir = TempDir::new().unwrap();
        let config = LocalOutputConfig {
            filename_pattern: "{provider}.{format}".to_string(),
            compression: Compression::Gzip,
            ..LocalOutputConfig::new(dir.path())
        };

        let path = write_local_at("[1,2,3]", &config, &metadata(), now()).unwrap();
        assert_eq!(path.file_name().unwrap(), "runpod.json.gz");

        let mut decoded = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "[1,2,3]");
    }

    #[test]
    fn test_path_traversal_is_neutralized() {
        let dir = TempDir::new().unwrap();
        let config = LocalOutputConfig {
            filename_pattern: "{provider}_data.json".to_string(),
            ..LocalOutputConfig::new(dir.path())
        };
        let metadata = HashMap::from([("provider".to_string(), "../../etc/passwd".to_string())]);

        let path = write_local_at("[]", &config, &metadata, now()).unwrap();
        assert_eq!(path.file_name().unwrap(), "______etc_passwd_data.json");
        assert_eq!(path.parent().unwrap(), dir.path());
    }

    #[test]
    fn test_interrupted_write_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.json");

        let result = write_atomic(&target, false, |file| {
            file.write_all(b"[{\"partial\":")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        });

        assert!(matches!(result, Err(OutputError::Io(_))));
        assert!(!target.exists());
        assert!(entries(dir.path()).is_empty());
    }
}
