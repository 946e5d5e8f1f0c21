use crate::types::{BackendStatus, ClientConfig, HealthResponse};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodic probe of backend liveness.
///
/// The status starts at `Checking` and is re-evaluated on a fixed period for
/// as long as the monitor runs. It is advisory: the orchestrator refuses to
/// start a new logical upload unless the status is `Online`, but an upload
/// already in flight is never aborted by a status transition.
pub struct HealthMonitor {
    client: Client,
    health_url: String,
    probe_timeout: Duration,
    period: Duration,
    status: Arc<RwLock<BackendStatus>>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(config: &ClientConfig) -> Self {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            health_url: format!("{}/health", config.backend_url.trim_end_matches('/')),
            probe_timeout: Duration::from_secs(config.health_timeout_seconds),
            period: Duration::from_secs(config.health_interval_seconds),
            status: Arc::new(RwLock::new(BackendStatus::Checking)),
            worker: std::sync::Mutex::new(None),
        }
    }

    pub async fn status(&self) -> BackendStatus {
        *self.status.read().await
    }

    /// Probe the backend once and record the result.
    pub async fn probe(&self) -> BackendStatus {
        let next = probe_backend(&self.client, &self.health_url, self.probe_timeout).await;
        let mut current = self.status.write().await;
        if *current != next {
            info!("Backend health changed: {} -> {}", current, next);
        }
        *current = next;
        next
    }

    /// Start the recurring probe. The first probe fires immediately.
    /// Calling `start` again replaces the previous worker.
    pub fn start(&self) {
        let client = self.client.clone();
        let url = self.health_url.clone();
        let timeout = self.probe_timeout;
        let period = self.period;
        let status = Arc::clone(&self.status);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let next = probe_backend(&client, &url, timeout).await;
                let mut current = status.write().await;
                if *current != next {
                    info!("Backend health changed: {} -> {}", current, next);
                }
                *current = next;
            }
        });

        self.replace_worker(Some(handle));
    }

    /// Cancel the recurring probe. The last observed status is retained.
    pub fn stop(&self) {
        self.replace_worker(None);
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .map(|slot| slot.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }

    fn replace_worker(&self, next: Option<JoinHandle<()>>) {
        if let Ok(mut slot) = self.worker.lock() {
            if let Some(old) = slot.take() {
                old.abort();
            }
            *slot = next;
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn probe_backend(client: &Client, url: &str, timeout: Duration) -> BackendStatus {
    match client.get(url).timeout(timeout).send().await {
        Ok(response) => {
            let http_status = response.status();
            if !http_status.is_success() {
                warn!("Health probe answered with HTTP {}", http_status);
                return BackendStatus::Unhealthy;
            }
            match response.json::<HealthResponse>().await {
                Ok(body) if body.status == "healthy" => BackendStatus::Online,
                Ok(body) => {
                    debug!("Health probe reported status '{}'", body.status);
                    BackendStatus::Unhealthy
                }
                Err(e) => {
                    warn!("Health probe body was unreadable: {}", e);
                    BackendStatus::Unhealthy
                }
            }
        }
        Err(e) => {
            debug!("Health probe failed: {}", e);
            BackendStatus::Offline
        }
    }
}
