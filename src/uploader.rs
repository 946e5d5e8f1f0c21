use crate::state::UploadStateMachine;
use crate::types::{
    ClientConfig, InputFile, Result, UploadError, UploadRequest, UploadResponse, ValidationError,
};
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use futures_util::Stream;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method, StatusCode};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

const PROGRESS_CHUNK_BYTES: usize = 64 * 1024;
const PROGRESS_SAMPLE_MS: u64 = 150;

#[derive(Debug, Clone, Copy)]
enum TransientKind {
    Timeout,
    Network,
}

impl TransientKind {
    fn into_error(self, attempts: u32) -> UploadError {
        match self {
            TransientKind::Timeout => UploadError::Timeout { attempts },
            TransientKind::Network => UploadError::NetworkUnavailable { attempts },
        }
    }

    fn describe(self) -> &'static str {
        match self {
            TransientKind::Timeout => "request timed out",
            TransientKind::Network => "network error",
        }
    }
}

/// Classification of one failed physical attempt.
enum AttemptFailure {
    /// Plausibly temporary; retried while the budget allows.
    Transient(TransientKind),
    /// Deterministic rejection; surfaced immediately, retrying cannot help.
    Fatal(UploadError),
}

/// Issues the physical upload attempts and runs the retry/backoff policy.
pub struct Uploader {
    client: Client,
    config: ClientConfig,
    upload_url: String,
}

impl Uploader {
    pub fn new(config: ClientConfig) -> Self {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .expect("Failed to create HTTP client");
        let upload_url = format!("{}/upload", config.backend_url.trim_end_matches('/'));

        Self {
            client,
            config,
            upload_url,
        }
    }

    /// Retry schedule for one logical upload: deterministic doubling from the
    /// base delay, capped at the configured ceiling. The attempt count is the
    /// budget, so elapsed time never cuts the schedule short.
    pub fn retry_schedule(config: &ClientConfig) -> ExponentialBackoff<backoff::SystemClock> {
        ExponentialBackoff {
            current_interval: Duration::from_millis(config.retry_base_delay_ms),
            initial_interval: Duration::from_millis(config.retry_base_delay_ms),
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: Duration::from_millis(config.retry_max_delay_ms),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run one logical upload: up to `max_retries + 1` physical attempts with
    /// backoff between transient failures. At most one physical call is
    /// outstanding at any instant; a retry is scheduled only after the prior
    /// attempt has fully resolved.
    pub async fn upload_with_retry(
        &self,
        request: &UploadRequest,
        state: &UploadStateMachine,
    ) -> Result<UploadResponse> {
        if self.config.preflight {
            self.preflight().await;
        }

        let mut schedule = Self::retry_schedule(&self.config);
        let total_attempts = self.config.max_retries + 1;
        let mut attempt = 1u32;

        loop {
            state.begin_attempt(attempt).await;
            info!(
                "Sending POST request to {} (attempt {}/{})",
                self.upload_url, attempt, total_attempts
            );

            match self.attempt_once(request, attempt, state).await {
                Ok(body) => return Ok(body),
                Err(AttemptFailure::Fatal(err)) => {
                    warn!("Upload rejected on attempt {}: {}", attempt, err);
                    return Err(err);
                }
                Err(AttemptFailure::Transient(kind)) => {
                    if attempt >= total_attempts {
                        error!(
                            "Upload failed after {} attempts: {}",
                            total_attempts,
                            kind.describe()
                        );
                        return Err(kind.into_error(total_attempts));
                    }
                    let delay = schedule
                        .next_backoff()
                        .unwrap_or(Duration::from_millis(self.config.retry_max_delay_ms));
                    warn!(
                        "Attempt {} failed ({}). Retrying ({}/{}) in {:?}",
                        attempt,
                        kind.describe(),
                        attempt,
                        self.config.max_retries,
                        delay
                    );
                    state.begin_retry(attempt + 1, delay).await;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One physical attempt: multipart POST with a bounded timeout and a
    /// byte-counting body sampled into progress updates.
    async fn attempt_once(
        &self,
        request: &UploadRequest,
        attempt: u32,
        state: &UploadStateMachine,
    ) -> std::result::Result<UploadResponse, AttemptFailure> {
        let total_bytes = request.image.size() + request.annotation.size();
        let sent = Arc::new(AtomicU64::new(0));
        let form = build_form(request, &sent)?;

        let response_result = {
            let send_fut = self
                .client
                .post(&self.upload_url)
                .multipart(form)
                .timeout(Duration::from_secs(self.config.request_timeout_seconds))
                .send();
            tokio::pin!(send_fut);

            let mut ticker =
                tokio::time::interval(Duration::from_millis(PROGRESS_SAMPLE_MS));
            loop {
                tokio::select! {
                    result = &mut send_fut => break result,
                    _ = ticker.tick() => {
                        let done = sent.load(Ordering::Relaxed);
                        let percent = if total_bytes == 0 {
                            0
                        } else {
                            ((done * 100) / total_bytes).min(100) as u8
                        };
                        state.apply_progress(attempt, percent).await;
                    }
                }
            }
        };

        let response = match response_result {
            Ok(response) => response,
            Err(e) => {
                let kind = if e.is_timeout() {
                    TransientKind::Timeout
                } else {
                    TransientKind::Network
                };
                debug!("Attempt {} transport failure: {}", attempt, e);
                return Err(AttemptFailure::Transient(kind));
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptFailure::Fatal(UploadError::RateLimited));
        }
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(AttemptFailure::Fatal(UploadError::PayloadTooLarge));
        }
        if !status.is_success() {
            let status_text = status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string();
            let message = match response.json::<UploadResponse>().await {
                Ok(body) => body.error.unwrap_or(status_text),
                Err(_) => status_text,
            };
            return Err(AttemptFailure::Fatal(UploadError::Server {
                status: status.as_u16(),
                message,
            }));
        }

        // Request body fully accepted by the server at this point.
        state.apply_progress(attempt, 100).await;

        match response.json::<UploadResponse>().await {
            Ok(body) => Ok(body),
            Err(e) if e.is_timeout() => Err(AttemptFailure::Transient(TransientKind::Timeout)),
            Err(e) => {
                warn!("Upload response body was not decodable: {}", e);
                Err(AttemptFailure::Fatal(UploadError::MalformedResponse))
            }
        }
    }

    /// Best-effort CORS preflight before the first physical attempt. Failure
    /// is logged and never blocks the real request.
    async fn preflight(&self) {
        let origin = Url::parse(&self.config.backend_url)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|_| self.config.backend_url.clone());

        debug!("Sending preflight OPTIONS request to {}", self.upload_url);
        let result = self
            .client
            .request(Method::OPTIONS, &self.upload_url)
            .header("Origin", origin)
            .header("Access-Control-Request-Method", "POST")
            .header("Access-Control-Request-Headers", "content-type")
            .timeout(Duration::from_secs(self.config.health_timeout_seconds))
            .send()
            .await;

        match result {
            Ok(response) => debug!("Preflight answered with HTTP {}", response.status()),
            Err(e) => warn!("Preflight failed (continuing anyway): {}", e),
        }
    }
}

fn build_form(
    request: &UploadRequest,
    sent: &Arc<AtomicU64>,
) -> std::result::Result<Form, AttemptFailure> {
    let image_part = counting_part(&request.image, sent).map_err(|_| {
        AttemptFailure::Fatal(UploadError::Validation(ValidationError::InvalidImageType {
            name: request.image.name.clone(),
            mime: request.image.mime_type.clone(),
        }))
    })?;
    let annotation_part = counting_part(&request.annotation, sent).map_err(|_| {
        AttemptFailure::Fatal(UploadError::Validation(
            ValidationError::InvalidAnnotationType {
                name: request.annotation.name.clone(),
                mime: request.annotation.mime_type.clone(),
            },
        ))
    })?;

    Ok(Form::new()
        .part("image", image_part)
        .part("json", annotation_part))
}

fn counting_part(file: &InputFile, sent: &Arc<AtomicU64>) -> reqwest::Result<Part> {
    let stream = CountingStream::new(file.bytes.clone(), Arc::clone(sent));
    let body = Body::wrap_stream(stream);
    Part::stream_with_length(body, file.size())
        .file_name(file.name.clone())
        .mime_str(&file.mime_type)
}

/// Chunked byte stream that adds everything it yields to a shared counter,
/// so the attempt loop can sample bytes-sent without hooking the transport.
struct CountingStream {
    data: Vec<u8>,
    offset: usize,
    sent: Arc<AtomicU64>,
}

impl CountingStream {
    fn new(data: Vec<u8>, sent: Arc<AtomicU64>) -> Self {
        Self {
            data,
            offset: 0,
            sent,
        }
    }
}

impl Stream for CountingStream {
    type Item = std::result::Result<Vec<u8>, std::convert::Infallible>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.offset >= this.data.len() {
            return Poll::Ready(None);
        }
        let end = (this.offset + PROGRESS_CHUNK_BYTES).min(this.data.len());
        let chunk = this.data[this.offset..end].to_vec();
        this.offset = end;
        this.sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        Poll::Ready(Some(Ok(chunk)))
    }
}
