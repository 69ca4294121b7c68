//! Model readiness poller.
//!
//! Polls the model service on a fixed interval until it reports its models
//! loaded. The first positive observation flips an in-process flag, persists
//! `models:ready = "true"` to the record store, and notifies the backend.
//! The compare-and-swap on the flag makes the notification fire at most once
//! per process, however many pollers or checks run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pagewise_core::model::ModelClient;
use pagewise_core::store::{RecordStore, MODELS_READY_FLAG};

/// One-shot outbound "models are ready" call.
#[async_trait]
pub trait BackendNotifier: Send + Sync {
    async fn notify_models_ready(&self) -> Result<()>;
}

/// POSTs `{"ready": true}` to a configured URL.
pub struct HttpBackendNotifier {
    url: String,
    client: reqwest::Client,
}

impl HttpBackendNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl BackendNotifier for HttpBackendNotifier {
    async fn notify_models_ready(&self) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "ready": true }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!("backend notification to {} returned {}", self.url, status);
        }
        Ok(())
    }
}

/// Used when no `readiness.notify_url` is configured.
pub struct NoopNotifier;

#[async_trait]
impl BackendNotifier for NoopNotifier {
    async fn notify_models_ready(&self) -> Result<()> {
        Ok(())
    }
}

pub struct ReadinessPoller {
    model: Arc<dyn ModelClient>,
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn BackendNotifier>,
    ready: AtomicBool,
    interval: Duration,
}

impl ReadinessPoller {
    pub fn new(
        model: Arc<dyn ModelClient>,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn BackendNotifier>,
        interval: Duration,
    ) -> Self {
        Self {
            model,
            store,
            notifier,
            ready: AtomicBool::new(false),
            interval,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// One readiness check. Returns whether the models are ready.
    ///
    /// Only the check that first observes readiness persists the flag and
    /// notifies the backend.
    pub async fn check_once(&self) -> bool {
        if self.is_ready() {
            return true;
        }

        match self.model.is_ready().await {
            Ok(true) => {}
            Ok(false) => {
                debug!("models not ready yet");
                return false;
            }
            Err(e) => {
                debug!(error = %e, "model service unreachable");
                return false;
            }
        }

        if self
            .ready
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!(model = self.model.model_name(), "models ready");
            if let Err(e) = self.store.set_flag(MODELS_READY_FLAG, "true").await {
                warn!(error = %e, "failed to persist readiness flag");
            }
            if let Err(e) = self.notifier.notify_models_ready().await {
                warn!(error = %e, "failed to notify backend of readiness");
            }
        }
        true
    }

    /// Poll until ready or until `shutdown` turns `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            if self.check_once().await {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
}
