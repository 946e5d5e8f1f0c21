use crate::assets::AssetResolver;
use crate::health::HealthMonitor;
use crate::interpreter::ResponseInterpreter;
use crate::state::UploadStateMachine;
use crate::types::{BackendStatus, ClientConfig, UploadError, UploadInput, UploadOutcome};
use crate::uploader::Uploader;
use crate::validator::validate;
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the submit lifecycle: validation, health gating, upload with retry,
/// response interpretation, and the state machine the UI observes.
pub struct UploadOrchestrator {
    config: ClientConfig,
    health: Arc<HealthMonitor>,
    uploader: Uploader,
    interpreter: ResponseInterpreter,
    state: UploadStateMachine,
}

impl UploadOrchestrator {
    pub fn new(config: ClientConfig, assets: Arc<dyn AssetResolver>) -> Self {
        let health = Arc::new(HealthMonitor::new(&config));
        let uploader = Uploader::new(config.clone());
        let interpreter = ResponseInterpreter::new(&config.backend_url, assets);

        Self {
            config,
            health,
            uploader,
            interpreter,
            state: UploadStateMachine::new(),
        }
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        Arc::clone(&self.health)
    }

    /// Handle on the observable state; cheap to clone.
    pub fn state_machine(&self) -> UploadStateMachine {
        self.state.clone()
    }

    /// Run one logical upload to completion. Returns `None` when the submit
    /// event is ignored because another logical upload is still active.
    pub async fn submit(&self, input: UploadInput) -> Option<UploadOutcome> {
        let upload_id = match self.state.try_begin().await {
            Some(id) => id,
            None => {
                warn!("Submit ignored: an upload is already in progress");
                return None;
            }
        };
        info!("Starting upload {}", upload_id);

        let outcome = self.run(input).await;
        match &outcome {
            UploadOutcome::Success(result) => info!(
                "Upload {} succeeded with {} predictions",
                upload_id,
                result.predictions.len()
            ),
            UploadOutcome::Failure(err) => warn!("Upload {} failed: {}", upload_id, err),
        }
        self.state.finish(outcome.clone()).await;
        Some(outcome)
    }

    async fn run(&self, input: UploadInput) -> UploadOutcome {
        let request = match validate(input, self.config.max_image_size_bytes) {
            Ok(request) => request,
            Err(e) => return UploadOutcome::Failure(UploadError::Validation(e)),
        };

        self.state.set_awaiting_backend().await;
        let status = self.health.status().await;
        if status != BackendStatus::Online {
            return UploadOutcome::Failure(UploadError::BackendUnavailable { status });
        }

        match self.uploader.upload_with_retry(&request, &self.state).await {
            Ok(body) => match self.interpreter.interpret(body).await {
                Ok(result) => UploadOutcome::Success(result),
                Err(e) => UploadOutcome::Failure(e),
            },
            Err(e) => UploadOutcome::Failure(e),
        }
    }
}
