use crate::types::{UploadAttempt, UploadId, UploadOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Lifecycle of one logical upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadPhase {
    Idle,
    Validating,
    AwaitingBackend,
    Uploading { attempt: u32 },
    Retrying { next_attempt: u32, delay: Duration },
    Succeeded,
    Failed,
}

impl UploadPhase {
    /// A submit event is accepted only outside an active logical upload.
    pub fn accepts_submit(&self) -> bool {
        matches!(
            self,
            UploadPhase::Idle | UploadPhase::Succeeded | UploadPhase::Failed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadPhase::Succeeded | UploadPhase::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct UploadSnapshot {
    pub upload_id: Option<UploadId>,
    pub phase: UploadPhase,
    pub attempt: Option<UploadAttempt>,
    pub outcome: Option<UploadOutcome>,
}

impl UploadSnapshot {
    fn idle() -> Self {
        Self {
            upload_id: None,
            phase: UploadPhase::Idle,
            attempt: None,
            outcome: None,
        }
    }
}

/// The single source of truth the UI observes. All writes happen through the
/// methods below; the orchestrator and uploader share one instance.
#[derive(Clone)]
pub struct UploadStateMachine {
    inner: Arc<RwLock<UploadSnapshot>>,
}

impl UploadStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(UploadSnapshot::idle())),
        }
    }

    pub async fn snapshot(&self) -> UploadSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn phase(&self) -> UploadPhase {
        self.inner.read().await.phase.clone()
    }

    pub async fn outcome(&self) -> Option<UploadOutcome> {
        self.inner.read().await.outcome.clone()
    }

    pub async fn progress_percent(&self) -> Option<u8> {
        self.inner
            .read()
            .await
            .attempt
            .as_ref()
            .map(|a| a.progress_percent)
    }

    /// Begin a new logical upload, discarding any stale outcome.
    /// Returns `None` while another logical upload is active.
    pub async fn try_begin(&self) -> Option<UploadId> {
        let mut state = self.inner.write().await;
        if !state.phase.accepts_submit() {
            return None;
        }
        let id = Uuid::new_v4();
        *state = UploadSnapshot {
            upload_id: Some(id),
            phase: UploadPhase::Validating,
            attempt: None,
            outcome: None,
        };
        Some(id)
    }

    pub async fn set_awaiting_backend(&self) {
        self.inner.write().await.phase = UploadPhase::AwaitingBackend;
    }

    /// Record the start of a physical attempt.
    pub async fn begin_attempt(&self, number: u32) {
        let mut state = self.inner.write().await;
        state.phase = UploadPhase::Uploading { attempt: number };
        state.attempt = Some(UploadAttempt::new(number));
    }

    /// Apply a progress update for a specific attempt. Updates are monotone
    /// and are discarded once the attempt has been superseded by a retry or
    /// a terminal state.
    pub async fn apply_progress(&self, attempt_number: u32, percent: u8) {
        let mut state = self.inner.write().await;
        let live = matches!(
            state.phase,
            UploadPhase::Uploading { attempt } if attempt == attempt_number
        );
        if !live {
            debug!(
                "Discarding stale progress update for attempt {} ({}%)",
                attempt_number, percent
            );
            return;
        }
        if let Some(attempt) = state.attempt.as_mut() {
            if attempt.number == attempt_number && percent > attempt.progress_percent {
                attempt.progress_percent = percent.min(100);
            }
        }
    }

    pub async fn begin_retry(&self, next_attempt: u32, delay: Duration) {
        self.inner.write().await.phase = UploadPhase::Retrying {
            next_attempt,
            delay,
        };
    }

    /// Record the terminal outcome of the current logical upload.
    pub async fn finish(&self, outcome: UploadOutcome) {
        let mut state = self.inner.write().await;
        if outcome.is_success() {
            state.phase = UploadPhase::Succeeded;
            if let Some(attempt) = state.attempt.as_mut() {
                attempt.progress_percent = 100;
            }
        } else {
            state.phase = UploadPhase::Failed;
        }
        state.outcome = Some(outcome);
    }
}

impl Default for UploadStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
