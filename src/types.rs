use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// A file selected for submission, held fully in memory.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing the MIME type from the extension.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = mime_for_name(&name).to_string();
        Ok(Self {
            name,
            mime_type,
            bytes,
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub fn mime_for_name(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// What the caller hands in before validation; either file may be missing.
#[derive(Debug, Clone, Default)]
pub struct UploadInput {
    pub image: Option<InputFile>,
    pub annotation: Option<InputFile>,
}

/// A validated pair of files. Only the validator constructs one, so no
/// network call can be attempted with missing or invalid inputs.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub image: InputFile,
    pub annotation: InputFile,
}

/// Backend liveness as seen by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Checking,
    Online,
    Unhealthy,
    Offline,
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendStatus::Checking => "checking",
            BackendStatus::Online => "online",
            BackendStatus::Unhealthy => "unhealthy",
            BackendStatus::Offline => "offline",
        };
        write!(f, "{}", s)
    }
}

/// One physical network round-trip of a logical upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadAttempt {
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub progress_percent: u8,
}

impl UploadAttempt {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            started_at: Utc::now(),
            progress_percent: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    pub probability: f64,
}

/// Interpreted result of a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Predictions in server order, probabilities normalized to [0, 1].
    pub predictions: Vec<Prediction>,
    /// First entry reaching the maximum probability, if any.
    pub highest: Option<Prediction>,
    pub segmented_image_url: Option<String>,
    pub related_images: Vec<String>,
}

/// Terminal value of one logical upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Success(AnalysisResult),
    Failure(UploadError),
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success(_))
    }
}

/// Wire format of a successful `POST /upload` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub predictions: Option<Vec<Prediction>>,
    #[serde(default)]
    pub segmented_image: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Wire format of the `GET /health` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backend_url: String,
    pub user_agent: String,
    pub request_timeout_seconds: u64,
    pub health_timeout_seconds: u64,
    pub health_interval_seconds: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub max_image_size_bytes: u64,
    pub preflight: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5000".to_string(),
            user_agent: "CardioScan-Client/1.0".to_string(),
            request_timeout_seconds: 90,
            health_timeout_seconds: 10,
            health_interval_seconds: 60,
            max_retries: 3,
            retry_base_delay_ms: 3000,
            retry_max_delay_ms: 60_000,
            max_image_size_bytes: 5 * 1024 * 1024,
            preflight: true,
        }
    }
}

/// Identity of one logical upload, used to correlate log lines and to
/// invalidate callbacks from superseded submissions.
pub type UploadId = Uuid;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please select an image file.")]
    MissingImage,

    #[error("Please select an annotation JSON file.")]
    MissingAnnotation,

    #[error("Image is too large: {actual} bytes (maximum is {max} bytes). Please use a smaller image.")]
    ImageTooLarge { actual: u64, max: u64 },

    #[error("Selected file '{name}' is not an image (detected type: {mime}).")]
    InvalidImageType { name: String, mime: String },

    #[error("Annotation file '{name}' is not JSON (detected type: {mime}).")]
    InvalidAnnotationType { name: String, mime: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Backend is not available (status: {status}). Please wait and try again.")]
    BackendUnavailable { status: BackendStatus },

    #[error("The server is taking too long to respond. The operation might be too resource-intensive. Please try with a smaller image or try again later.")]
    Timeout { attempts: u32 },

    #[error("Network error: the server is unreachable. Please check your internet connection or try again later.")]
    NetworkUnavailable { attempts: u32 },

    #[error("The server is busy. Please try again later.")]
    RateLimited,

    #[error("The upload is too large for the server. Please use a smaller file.")]
    PayloadTooLarge,

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("No predictions received from the server.")]
    MalformedResponse,
}

impl UploadError {
    /// Whether the failure was plausibly caused by temporary conditions.
    /// Deterministic server rejections are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UploadError::Timeout { .. } | UploadError::NetworkUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
