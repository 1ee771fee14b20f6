use gpuport_utils::{substitute_env_vars, with_retry, RetryPolicy};
use log::{debug, error, info, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Identity};
use serde_json::Value;
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::config::HttpsOutputConfig;
use crate::errors::OutputError;

const MAX_ERROR_BODY: usize = 200;

/// Aggregate counts for one HTTPS delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpSummary {
    /// Requests attempted, retries included.
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub total_items: usize,
}

/// Outcome of one send attempt. The outer `Err` is retried; the inner one
/// fails the batch immediately.
type Attempt = Result<Result<(), OutputError>, OutputError>;

/// POST/PUT/PATCH the payload's items in sequential batches.
///
/// A batch that exhausts its retries is counted as failed and the next batch
/// is still sent. Only when every batch fails is the whole write an error.
pub async fn write_https(
    payload: &str,
    config: &HttpsOutputConfig,
) -> Result<HttpSummary, OutputError> {
    let items = match serde_json::from_str::<Value>(payload)? {
        Value::Array(items) => items,
        other => vec![other],
    };

    if items.is_empty() {
        debug!("Nothing to send to {}", config.url);
        return Ok(HttpSummary::default());
    }

    let headers = build_headers(config)?;
    let client = build_client(config)?;
    let (client, headers) = (&client, &headers);

    send_in_batches(&items, config, move |body| {
        send_batch(client, config, headers, body)
    })
    .await
}

/// Split `items` per `batch_size` and hand each batch to `send` under the
/// configured retry policy. `batch_delay` separates batches; the first batch
/// goes out immediately.
async fn send_in_batches<S, Fut>(
    items: &[Value],
    config: &HttpsOutputConfig,
    mut send: S,
) -> Result<HttpSummary, OutputError>
where
    S: FnMut(Value) -> Fut,
    Fut: Future<Output = Attempt>,
{
    let policy = RetryPolicy::new(
        config.retry_attempts,
        seconds(config.retry_delay),
        config.retry_backoff,
    );
    let batch_size = config
        .batch_size
        .map(NonZeroUsize::get)
        .unwrap_or(items.len().max(1));
    let batches: Vec<&[Value]> = items.chunks(batch_size).collect();

    let mut summary = HttpSummary {
        total_items: items.len(),
        ..Default::default()
    };

    for (index, batch) in batches.iter().enumerate() {
        if index > 0 && config.batch_delay > 0.0 {
            tokio::time::sleep(seconds(config.batch_delay)).await;
        }

        let body = Value::Array(batch.to_vec());
        let mut attempts = 0;
        let outcome = with_retry(&policy, || {
            attempts += 1;
            send(body.clone())
        })
        .await;
        summary.total_requests += attempts;

        match outcome {
            Ok(Ok(())) => {
                summary.successful_requests += 1;
                debug!("Batch {}/{} accepted by {}", index + 1, batches.len(), config.url);
            }
            Ok(Err(e)) | Err(e) => {
                summary.failed_requests += 1;
                error!("Batch {}/{} to {} failed: {}", index + 1, batches.len(), config.url, e);
            }
        }
    }

    if summary.successful_requests == 0 {
        return Err(OutputError::AllBatchesFailed {
            failed: summary.failed_requests,
        });
    }

    info!(
        "Sent {} item(s) to {} in {} request(s), {} failed batch(es)",
        summary.total_items, config.url, summary.total_requests, summary.failed_requests
    );
    Ok(summary)
}

/// One attempt at sending a batch.
///
/// Transport failures and statuses listed in `retry_on_status` are retryable.
/// Any other non-success status fails the batch without further attempts.
async fn send_batch(
    client: &Client,
    config: &HttpsOutputConfig,
    headers: &HeaderMap,
    body: Value,
) -> Attempt {
    let response = client
        .request(config.method.into(), &config.url)
        .headers(headers.clone())
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        return Ok(Ok(()));
    }

    let mut message = response.text().await.unwrap_or_default();
    message.truncate(floor_char_boundary(&message, MAX_ERROR_BODY));
    let failure = OutputError::HttpStatus {
        status: status.as_u16(),
        message,
    };

    if config.retry_on_status.contains(&status.as_u16()) {
        Err(failure)
    } else {
        warn!("{} returned non-retryable status {}", config.url, status);
        Ok(Err(failure))
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0)
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

/// Custom headers with `${VAR}` substitution; `Content-Type` defaults to JSON.
pub fn build_headers(config: &HttpsOutputConfig) -> Result<HeaderMap, OutputError> {
    let mut headers = HeaderMap::new();

    if let Some(custom) = &config.headers {
        for (name, raw) in custom {
            let value = substitute_env_vars(raw)?;
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| OutputError::InvalidHeader {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            let mut header_value =
                HeaderValue::from_str(&value).map_err(|e| OutputError::InvalidHeader {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            header_value.set_sensitive(true);
            headers.insert(header_name, header_value);
        }
    }

    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    Ok(headers)
}

fn build_client(config: &HttpsOutputConfig) -> Result<Client, OutputError> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(config.timeout))
        .danger_accept_invalid_certs(!config.verify_ssl);

    match (&config.client_cert, &config.client_key) {
        (Some(cert), Some(key)) => {
            let mut pem = std::fs::read(cert)?;
            pem.push(b'\n');
            pem.extend(std::fs::read(key)?);
            let identity = Identity::from_pem(&pem)
                .map_err(|e| OutputError::ClientCertificate(e.to_string()))?;
            builder = builder.identity(identity);
        }
        (None, None) => {}
        _ => {
            return Err(OutputError::ClientCertificate(
                "client_cert and client_key must be set together".to_string(),
            ))
        }
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn config(server: &MockServer) -> HttpsOutputConfig {
        HttpsOutputConfig {
            retry_delay: 0.0,
            ..HttpsOutputConfig::new(format!("{}/ingest", server.uri()))
        }
    }

    #[tokio::test]
    async fn test_sends_single_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let summary = write_https(r#"[{"a":1},{"a":2}]"#, &config(&server))
            .await
            .unwrap();

        assert_eq!(
            summary,
            HttpSummary {
                total_requests: 1,
                successful_requests: 1,
                failed_requests: 0,
                total_items: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_object_payload_becomes_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let summary = write_https(r#"{"metrics":{}}"#, &config(&server)).await.unwrap();
        assert_eq!(summary.total_items, 1);

        let received: Vec<Request> = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&received[0].body).unwrap();
        assert!(body.is_array());
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batches_split_items() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let cfg = HttpsOutputConfig {
            method: crate::config::HttpMethod::Put,
            batch_size: NonZeroUsize::new(2),
            ..config(&server)
        };
        let summary = write_https("[1,2,3,4,5]", &cfg).await.unwrap();
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.successful_requests, 3);

        let received = server.received_requests().await.unwrap();
        let sizes: Vec<usize> = received
            .iter()
            .map(|r| {
                serde_json::from_slice::<Value>(&r.body)
                    .unwrap()
                    .as_array()
                    .unwrap()
                    .len()
            })
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_retries_retryable_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let summary = write_https("[1]", &config(&server)).await.unwrap();
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.successful_requests, 1);
        assert_eq!(summary.failed_requests, 0);
    }

    #[tokio::test]
    async fn test_non_retryable_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let err = write_https("[1]", &config(&server)).await.unwrap_err();
        assert!(matches!(err, OutputError::AllBatchesFailed { failed: 1 }));
    }

    #[tokio::test]
    async fn test_exhausted_batch_does_not_stop_later_batches() {
        let server = MockServer::start().await;
        // First batch: initial attempt plus one retry, both 500.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let cfg = HttpsOutputConfig {
            retry_attempts: 1,
            batch_size: NonZeroUsize::new(1),
            ..config(&server)
        };
        let summary = write_https("[1,2]", &cfg).await.unwrap();
        assert_eq!(summary.failed_requests, 1);
        assert_eq!(summary.successful_requests, 1);
        assert_eq!(summary.total_requests, 3);
    }

    #[tokio::test]
    async fn test_empty_list_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let summary = write_https("[]", &config(&server)).await.unwrap();
        assert_eq!(summary, HttpSummary::default());
    }

    fn unavailable() -> OutputError {
        OutputError::HttpStatus {
            status: 503,
            message: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_delay_and_retry_schedule() {
        let cfg = HttpsOutputConfig {
            batch_size: NonZeroUsize::new(1),
            batch_delay: 2.0,
            retry_attempts: 3,
            retry_delay: 5.0,
            retry_backoff: 2.0,
            ..HttpsOutputConfig::new("https://example.com/ingest")
        };

        let arrivals = Arc::new(Mutex::new(Vec::new()));
        let log = arrivals.clone();
        let mut call = 0;
        let start = Instant::now();

        // The second batch is answered 503 twice before it is accepted.
        let summary = send_in_batches(&[json!(1), json!(2), json!(3)], &cfg, move |body| {
            call += 1;
            let n = call;
            log.lock().unwrap().push((Instant::now(), body));
            async move {
                match n {
                    2 | 3 => Err(unavailable()),
                    _ => Ok(Ok(())),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(summary.total_requests, 5);
        assert_eq!(summary.successful_requests, 3);
        assert_eq!(summary.failed_requests, 0);

        let arrivals = arrivals.lock().unwrap();
        assert_eq!(arrivals[0].0, start);
        let bodies: Vec<&Value> = arrivals.iter().map(|(_, body)| body).collect();
        assert_eq!(
            bodies,
            vec![&json!([1]), &json!([2]), &json!([2]), &json!([2]), &json!([3])]
        );
        let gaps: Vec<Duration> = arrivals.windows(2).map(|w| w[1].0 - w[0].0).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(2),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_skips_backoff() {
        let cfg = HttpsOutputConfig {
            retry_delay: 5.0,
            ..HttpsOutputConfig::new("https://example.com/ingest")
        };
        let start = Instant::now();

        let err = send_in_batches(&[json!(1)], &cfg, |_| async {
            Ok(Err(OutputError::HttpStatus {
                status: 400,
                message: "bad request".to_string(),
            }))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, OutputError::AllBatchesFailed { failed: 1 }));
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test]
    async fn test_delays_apply_against_live_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let cfg = HttpsOutputConfig {
            batch_size: NonZeroUsize::new(1),
            batch_delay: 0.2,
            retry_delay: 0.1,
            ..config(&server)
        };
        let start = std::time::Instant::now();
        let summary = write_https("[1,2]", &cfg).await.unwrap();

        assert_eq!(summary.total_requests, 3);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_headers_substitute_env_and_keep_content_type() {
        std::env::set_var("GPUPORT_TEST_HTTPS_TOKEN", "s3cret");
        let mut custom = IndexMap::new();
        custom.insert(
            "Authorization".to_string(),
            "Bearer ${GPUPORT_TEST_HTTPS_TOKEN}".to_string(),
        );
        custom.insert("content-type".to_string(), "application/x-ndjson".to_string());

        let cfg = HttpsOutputConfig {
            headers: Some(custom),
            ..HttpsOutputConfig::new("https://example.com")
        };
        let headers = build_headers(&cfg).unwrap();
        assert_eq!(headers["authorization"], "Bearer s3cret");
        assert_eq!(headers[CONTENT_TYPE], "application/x-ndjson");
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_headers_missing_env_fails_closed() {
        std::env::remove_var("GPUPORT_TEST_HTTPS_UNSET");
        let mut custom = IndexMap::new();
        custom.insert(
            "X-Api-Key".to_string(),
            "${GPUPORT_TEST_HTTPS_UNSET}".to_string(),
        );
        let cfg = HttpsOutputConfig {
            headers: Some(custom),
            ..HttpsOutputConfig::new("https://example.com")
        };
        assert!(matches!(build_headers(&cfg), Err(OutputError::Utils(_))));
    }

    #[test]
    fn test_header_value_expanded_once() {
        std::env::set_var("GPUPORT_TEST_HTTPS_LITERAL", "key-${NOT_A_VAR}");
        let mut custom = IndexMap::new();
        custom.insert(
            "X-Api-Key".to_string(),
            "${GPUPORT_TEST_HTTPS_LITERAL}".to_string(),
        );
        let cfg = HttpsOutputConfig {
            headers: Some(custom),
            ..HttpsOutputConfig::new("https://example.com")
        };
        let headers = build_headers(&cfg).unwrap();
        assert_eq!(headers["x-api-key"], "key-${NOT_A_VAR}");
    }

    #[test]
    fn test_client_cert_requires_key() {
        let cfg = HttpsOutputConfig {
            client_cert: Some("/tmp/cert.pem".into()),
            ..HttpsOutputConfig::new("https://example.com")
        };
        assert!(matches!(
            build_client(&cfg),
            Err(OutputError::ClientCertificate(_))
        ));
    }
}
