use bytes::Bytes;
use chrono::{DateTime, Utc};
use gpuport_utils::{gzip_bytes, UtilsError};
use log::{debug, info};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{Attribute, AttributeValue, Attributes, ClientOptions, ObjectStore, PutOptions};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::env;

use super::filename::resolve_filename;
use crate::config::{Compression, CredentialRef, ObjectStoreOutputConfig};
use crate::errors::OutputError;

const DEFAULT_STORAGE_CLASS: &str = "STANDARD";
const DEFAULT_ACL: &str = "private";

/// Upload `payload` to the configured bucket and return the object key.
pub async fn write_object_store(
    payload: &str,
    config: &ObjectStoreOutputConfig,
    metadata: &HashMap<String, String>,
    content_type: &str,
) -> Result<String, OutputError> {
    let key = object_key(config, metadata, Utc::now())?;
    let store = build_store(config)?;
    put_object(&store, &key, payload, config, content_type).await?;

    info!("Uploaded s3://{}/{}", config.bucket, key);
    Ok(key)
}

/// `prefix/filename`, with the prefix's trailing slashes trimmed.
pub fn object_key(
    config: &ObjectStoreOutputConfig,
    metadata: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Result<String, OutputError> {
    let mut filename = resolve_filename(&config.filename_pattern, metadata, now)?;
    if config.compression == Compression::Gzip && !filename.ends_with(".gz") {
        filename.push_str(".gz");
    }

    let prefix = config.prefix.trim_end_matches('/');
    if prefix.is_empty() {
        Ok(filename)
    } else {
        Ok(format!("{}/{}", prefix, filename))
    }
}

/// Build the S3 client from explicit credentials or ambient discovery.
pub fn build_store(config: &ObjectStoreOutputConfig) -> Result<AmazonS3, OutputError> {
    let mut builder = match &config.credentials {
        Some(credentials) => explicit_credentials(credentials)?,
        None => {
            debug!("No explicit credentials for bucket {}, using environment", config.bucket);
            AmazonS3Builder::from_env()
        }
    };

    builder = builder.with_bucket_name(&config.bucket);

    if let Some(region) = &config.region {
        builder = builder.with_region(region);
    }

    if let Some(endpoint) = &config.endpoint_url {
        builder = builder
            .with_endpoint(endpoint)
            .with_virtual_hosted_style_request(false)
            .with_allow_http(endpoint.starts_with("http://"));
    }

    if let Some(encryption) = &config.server_side_encryption {
        builder = builder.with_config("aws_server_side_encryption".parse()?, encryption);
    }

    let headers = default_headers(config)?;
    if !headers.is_empty() {
        builder = builder.with_client_options(ClientOptions::new().with_default_headers(headers));
    }

    Ok(builder.build()?)
}

fn explicit_credentials(credentials: &CredentialRef) -> Result<AmazonS3Builder, OutputError> {
    let mut builder = AmazonS3Builder::new()
        .with_access_key_id(required_env(&credentials.access_key_env)?)
        .with_secret_access_key(required_env(&credentials.secret_key_env)?);

    if let Some(token_env) = &credentials.session_token_env {
        builder = builder.with_token(required_env(token_env)?);
    }
    Ok(builder)
}

fn required_env(name: &str) -> Result<String, OutputError> {
    env::var(name).map_err(|_| OutputError::Utils(UtilsError::MissingEnvVar(name.to_string())))
}

/// Storage class and ACL are sent as request headers when they differ from
/// the bucket defaults.
fn default_headers(config: &ObjectStoreOutputConfig) -> Result<HeaderMap, OutputError> {
    let mut headers = HeaderMap::new();
    let wanted = [
        ("x-amz-storage-class", config.storage_class.as_str(), DEFAULT_STORAGE_CLASS),
        ("x-amz-acl", config.acl.as_str(), DEFAULT_ACL),
    ];

    for (name, value, default) in wanted {
        if value.is_empty() || value == default {
            continue;
        }
        let header = HeaderValue::from_str(value).map_err(|e| {
            OutputError::StoreConfig(format!("invalid value for {}: {}", name, e))
        })?;
        headers.insert(HeaderName::from_static(name), header);
    }
    Ok(headers)
}

/// Single put of the (optionally gzipped) payload with content and user metadata.
pub async fn put_object(
    store: &dyn ObjectStore,
    key: &str,
    payload: &str,
    config: &ObjectStoreOutputConfig,
    content_type: &str,
) -> Result<(), OutputError> {
    let mut attributes = Attributes::new();
    attributes.insert(
        Attribute::ContentType,
        AttributeValue::from(content_type.to_string()),
    );

    let body = match config.compression {
        Compression::Gzip => {
            attributes.insert(Attribute::ContentEncoding, AttributeValue::from("gzip"));
            Bytes::from(gzip_bytes(payload.as_bytes())?)
        }
        Compression::None => Bytes::from(payload.to_string()),
    };

    if let Some(metadata) = &config.metadata {
        for (name, value) in metadata {
            attributes.insert(
                Attribute::Metadata(name.clone().into()),
                AttributeValue::from(value.clone()),
            );
        }
    }

    let opts = PutOptions {
        attributes,
        ..Default::default()
    };

    debug!("Putting {} bytes to {}", body.len(), key);
    store.put_opts(&Path::from(key), body.into(), opts).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use indexmap::IndexMap;
    use object_store::memory::InMemory;
    use std::io::Read;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap()
    }

    fn metadata() -> HashMap<String, String> {
        HashMap::from([
            ("provider".to_string(), "runpod".to_string()),
            ("format".to_string(), "csv".to_string()),
        ])
    }

    #[test]
    fn test_object_key_trims_prefix_slash() {
        let config = ObjectStoreOutputConfig {
            prefix: "exports/gpus/".to_string(),
            ..ObjectStoreOutputConfig::new("bucket")
        };
        let key = object_key(&config, &metadata(), now()).unwrap();
        assert_eq!(key, "exports/gpus/runpod_20250115-103000.csv");

        let config = ObjectStoreOutputConfig::new("bucket");
        let key = object_key(&config, &metadata(), now()).unwrap();
        assert_eq!(key, "runpod_20250115-103000.csv");
    }

    #[test]
    fn test_object_key_gzip_suffix() {
        let config = ObjectStoreOutputConfig {
            compression: Compression::Gzip,
            ..ObjectStoreOutputConfig::new("bucket")
        };
        let key = object_key(&config, &metadata(), now()).unwrap();
        assert!(key.ends_with(".csv.gz"));
    }

    #[test]
    fn test_missing_explicit_credentials_fail_closed() {
        let config = ObjectStoreOutputConfig {
            credentials: Some(CredentialRef {
                access_key_env: "GPUPORT_TEST_NO_SUCH_ACCESS_KEY".to_string(),
                secret_key_env: "GPUPORT_TEST_NO_SUCH_SECRET".to_string(),
                session_token_env: None,
            }),
            ..ObjectStoreOutputConfig::new("bucket")
        };
        let err = build_store(&config).unwrap_err();
        assert!(err.to_string().contains("GPUPORT_TEST_NO_SUCH_ACCESS_KEY"));
    }

    #[test]
    fn test_default_headers_only_for_non_defaults() {
        let config = ObjectStoreOutputConfig::new("bucket");
        assert!(default_headers(&config).unwrap().is_empty());

        let config = ObjectStoreOutputConfig {
            storage_class: "GLACIER".to_string(),
            acl: "bucket-owner-full-control".to_string(),
            ..ObjectStoreOutputConfig::new("bucket")
        };
        let headers = default_headers(&config).unwrap();
        assert_eq!(headers["x-amz-storage-class"], "GLACIER");
        assert_eq!(headers["x-amz-acl"], "bucket-owner-full-control");
    }

    #[tokio::test]
    async fn test_put_object_with_attributes() {
        let store = InMemory::new();
        let mut custom = IndexMap::new();
        custom.insert("source".to_string(), "gpuport".to_string());
        let config = ObjectStoreOutputConfig {
            metadata: Some(custom),
            ..ObjectStoreOutputConfig::new("bucket")
        };

        put_object(&store, "a/b.csv", "x,y\n1,2\n", &config, "text/csv")
            .await
            .unwrap();

        let result = store.get(&Path::from("a/b.csv")).await.unwrap();
        let content_type = result
            .attributes
            .get(&Attribute::ContentType)
            .map(|v| v.as_ref().to_string());
        assert_eq!(content_type.as_deref(), Some("text/csv"));
        let source = result
            .attributes
            .get(&Attribute::Metadata("source".into()))
            .map(|v| v.as_ref().to_string());
        assert_eq!(source.as_deref(), Some("gpuport"));

        let body = result.bytes().await.unwrap();
        assert_eq!(&body[..], b"x,y\n1,2\n");
    }

    #[tokio::test]
    async fn test_put_object_gzip() {
        let store = InMemory::new();
        let config = ObjectStoreOutputConfig {
            compression: Compression::Gzip,
            ..ObjectStoreOutputConfig::new("bucket")
        };

        put_object(&store, "data.json.gz", "[1]", &config, "application/json")
            .await
            .unwrap();

        let result = store.get(&Path::from("data.json.gz")).await.unwrap();
        let encoding = result
            .attributes
            .get(&Attribute::ContentEncoding)
            .map(|v| v.as_ref().to_string());
        assert_eq!(encoding.as_deref(), Some("gzip"));

        let body = result.bytes().await.unwrap();
        let mut decoded = String::new();
        GzDecoder::new(&body[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "[1]");
    }
}
