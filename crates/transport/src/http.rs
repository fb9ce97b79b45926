//! HTTP upload transport.
//!
//! Uploads each message with `PUT <base>/<remote path>/<file name>`. Failures
//! classified [`RetryPolicy::Retryable`] are retried in-call with
//! exponential back-off (`backon`); everything else fails the delivery at
//! once.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use codeco::{DeliveryId, OutboundMessage, PartnerConfig, RetryPolicy, Transport, TransportError};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

/// HTTP transport tuning.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub retry_delay: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Uploads messages over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Creates a transport with its own connection pool.
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn attempt(&self, url: &str, message: &OutboundMessage) -> Result<(), TransportError> {
        let partner = &message.partner;
        let mut request = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/EDIFACT")
            .body(message.payload.clone());
        if !partner.credentials.username.is_empty() {
            request = request.basic_auth(
                &partner.credentials.username,
                Some(&partner.credentials.password),
            );
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    endpoint: url.to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            } else {
                TransportError::Unreachable {
                    endpoint: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        classify_status(
            response.status(),
            retry_after_secs(response.headers()),
            url,
        )
    }
}

/// Builds the upload URL for `file_name` at `partner`.
///
/// A host given with an `http://` or `https://` scheme is used as the base
/// URL as is; a bare host becomes `https://<host>:<port>`.
pub fn upload_url(partner: &PartnerConfig, file_name: &str) -> String {
    let host = partner.endpoint.host.trim_end_matches('/');
    let base = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}:{}", host, partner.endpoint.port)
    };
    let path = partner.remote_path.trim_matches('/');
    if path.is_empty() {
        format!("{base}/{file_name}")
    } else {
        format!("{base}/{path}/{file_name}")
    }
}

/// Maps an HTTP response status onto the delivery outcome.
///
/// `429`, and `503` carrying a `Retry-After`, are throttling; `408` and other
/// `5xx` are the partner being temporarily unavailable. Any other
/// non-success status is a rejection.
pub fn classify_status(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    endpoint: &str,
) -> Result<(), TransportError> {
    if status.is_success() {
        return Ok(());
    }
    let endpoint = endpoint.to_string();
    let reason = status.to_string();
    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::SERVICE_UNAVAILABLE && retry_after_secs.is_some())
    {
        Err(TransportError::Throttled {
            endpoint,
            retry_after_secs,
        })
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        Err(TransportError::Unreachable { endpoint, reason })
    } else {
        Err(TransportError::Rejected { endpoint, reason })
    }
}

/// Reads a delta-seconds `Retry-After` header. HTTP-date values are ignored.
fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryId, TransportError> {
        let upload = upload_url(&message.partner, &message.file_name);
        let url = upload.as_str();
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.retry_delay)
            .with_max_times(self.config.max_retries as usize);

        let result = (|| async move {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.attempt(url, message).await
        })
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(|e: &TransportError| matches!(e.retry_policy(), RetryPolicy::Retryable { .. }))
        .adjust(|e: &TransportError, delay: Option<Duration>| {
            // `None` means the schedule is exhausted.
            delay.map(|scheduled| match e.retry_policy() {
                RetryPolicy::Retryable { after: Some(after) } => after,
                _ => scheduled,
            })
        })
        .notify(|e: &TransportError, delay: Duration| {
            debug!(
                transmission_id = %message.transmission_id,
                attempt = attempts.load(Ordering::Relaxed),
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Upload failed; retrying"
            );
        })
        .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(()) => {
                info!(
                    transmission_id = %message.transmission_id,
                    partner_code = %message.partner.partner_code,
                    url = %url,
                    attempts,
                    "Message uploaded"
                );
                DeliveryId::new(url)
                    .ok_or_else(|| TransportError::Configuration("empty upload URL".to_string()))
            }
            Err(error) => {
                warn!(
                    transmission_id = %message.transmission_id,
                    url = %url,
                    attempts,
                    error = %error,
                    "Upload failed"
                );
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<Vec<String>>) {
        serve_with_headers(statuses.into_iter().map(|s| (s, "")).collect()).await
    }

    /// Serves one canned status (plus extra header lines) per connection, in
    /// order, and returns the received request texts.
    async fn serve_with_headers(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, headers) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buf).to_string();
                    if let Some(header_end) = text.find("\r\n\r\n") {
                        let length = text[..header_end]
                            .lines()
                            .find_map(|l| {
                                let lower = l.to_ascii_lowercase();
                                lower
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap())
                            })
                            .unwrap_or(0);
                        if buf.len() >= header_end + 4 + length || n == 0 {
                            break;
                        }
                    }
                    if n == 0 {
                        break;
                    }
                }
                requests.push(String::from_utf8_lossy(&buf).to_string());
                let response = format!(
                    "HTTP/1.1 {status} X\r\n{headers}Content-Length: 0\r\nConnection: close\r\n\r\n"
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            requests
        });
        (base, hits, handle)
    }

    fn transport(max_retries: u32) -> HttpTransport {
        HttpTransport::new(HttpTransportConfig {
            timeout: Duration::from_secs(5),
            max_retries,
            retry_delay: Duration::from_millis(5),
        })
        .unwrap()
    }

    #[test]
    fn test_upload_url() {
        let msg = message("/inbound/", "CODECO_1.edi");
        assert_eq!(
            upload_url(&msg.partner, &msg.file_name),
            "https://edi.partner.example:443/inbound/CODECO_1.edi"
        );

        let mut partner = (*msg.partner).clone();
        partner.endpoint.host = "http://localhost:8080/".to_string();
        partner.remote_path = String::new();
        assert_eq!(upload_url(&partner, "a.edi"), "http://localhost:8080/a.edi");
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::CREATED, None, "x").is_ok());
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, None, "x"),
            Err(TransportError::Rejected { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, None, "x"),
            Err(TransportError::Unreachable { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, None, "x"),
            Err(TransportError::Throttled {
                retry_after_secs: None,
                ..
            })
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, Some(1), "x"),
            Err(TransportError::Throttled {
                retry_after_secs: Some(1),
                ..
            })
        ));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(retry_after_secs(&headers), None);
        headers.insert(reqwest::header::RETRY_AFTER, "3".parse().unwrap());
        assert_eq!(retry_after_secs(&headers), Some(3));
        headers.insert(
            reqwest::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(retry_after_secs(&headers), None);
    }

    #[tokio::test]
    async fn test_put_uploads_payload() {
        let (base, _, server) = serve(vec![201]).await;
        let mut msg = message("inbound", "CODECO_1.edi");
        let mut partner = (*msg.partner).clone();
        partner.endpoint.host = base.clone();
        msg.partner = Arc::new(partner);

        let receipt = transport(0).deliver(&msg).await.unwrap();

        assert_eq!(receipt.as_str(), format!("{base}/inbound/CODECO_1.edi"));
        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("PUT /inbound/CODECO_1.edi"));
        assert!(requests[0].ends_with(&msg.payload));
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let (base, hits, server) = serve(vec![503, 503, 200]).await;
        let mut msg = message("", "CODECO_1.edi");
        let mut partner = (*msg.partner).clone();
        partner.endpoint.host = base;
        msg.partner = Arc::new(partner);

        transport(3).deliver(&msg).await.unwrap();

        server.await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_after_overrides_backoff_schedule() {
        let (base, hits, server) =
            serve_with_headers(vec![(429, "Retry-After: 0\r\n"), (200, "")]).await;
        let mut msg = message("", "CODECO_1.edi");
        let mut partner = (*msg.partner).clone();
        partner.endpoint.host = base;
        msg.partner = Arc::new(partner);
        let transport = HttpTransport::new(HttpTransportConfig {
            timeout: Duration::from_secs(5),
            max_retries: 1,
            retry_delay: Duration::from_secs(60),
        })
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), transport.deliver(&msg))
            .await
            .expect("Retry-After was not honoured")
            .unwrap();

        server.await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (base, hits, server) = serve(vec![503, 503]).await;
        let mut msg = message("", "CODECO_1.edi");
        let mut partner = (*msg.partner).clone();
        partner.endpoint.host = base;
        msg.partner = Arc::new(partner);

        let err = transport(1).deliver(&msg).await.unwrap_err();

        server.await.unwrap();
        assert!(matches!(err, TransportError::Unreachable { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let (base, hits, server) = serve(vec![403]).await;
        let mut msg = message("", "CODECO_1.edi");
        let mut partner = (*msg.partner).clone();
        partner.endpoint.host = base;
        msg.partner = Arc::new(partner);

        let err = transport(3).deliver(&msg).await.unwrap_err();

        server.await.unwrap();
        assert!(matches!(err, TransportError::Rejected { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
