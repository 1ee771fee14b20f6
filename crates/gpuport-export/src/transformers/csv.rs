use ::csv::{Terminator, WriterBuilder};
use gpuport_core::GpuInstance;
use std::borrow::Borrow;

use crate::config::CsvTransformerConfig;
use crate::errors::TransformerError;

/// Serialize records as CSV with the columns named by `config.fields`.
///
/// An empty record list yields an empty string, without a header row.
pub fn transform_to_csv<R: Borrow<GpuInstance>>(
    instances: &[R],
    config: &CsvTransformerConfig,
) -> Result<String, TransformerError> {
    if instances.is_empty() {
        return Ok(String::new());
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .delimiter(single_byte("delimiter", &config.delimiter)?)
        .quote(single_byte("quote_char", &config.quote_char)?)
        .escape(single_byte("escape_char", &config.escape_char)?)
        .double_quote(config.double_quote)
        .terminator(terminator(&config.line_terminator)?)
        .from_writer(Vec::new());

    if config.include_headers {
        writer.write_record(config.fields.values())?;
    }

    for instance in instances {
        let instance = instance.borrow();
        let row: Vec<String> = config
            .fields
            .keys()
            .map(|source| match instance.field(source) {
                Ok(value) if !value.is_null() => value.to_string(),
                _ => config.null_value.clone(),
            })
            .collect();
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ::csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}

fn single_byte(option: &'static str, value: &str) -> Result<u8, TransformerError> {
    match value.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(TransformerError::InvalidCsvOption {
            option,
            message: format!("expected a single ASCII character, got {:?}", value),
        }),
    }
}

fn terminator(value: &str) -> Result<Terminator, TransformerError> {
    if value == "\r\n" {
        return Ok(Terminator::CRLF);
    }
    single_byte("line_terminator", value).map(Terminator::Any)
}
