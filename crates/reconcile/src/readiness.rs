//! Worker readiness observation and the cancellable waits a pass may perform.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;

use crate::ReconcileError;

pub const PHASE_RUNNING: &str = "Running";

/// Runtime state of the worker pod as observed from the store. Never written by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStatus {
    pub phase: Option<String>,
    pub address: Option<String>,
}

impl WorkerStatus {
    pub fn observe(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        Self {
            phase: status.and_then(|s| s.phase.clone()),
            address: status.and_then(|s| s.pod_ip.clone()).filter(|ip| !ip.is_empty()),
        }
    }

    /// Running and addressable; only then can the worker be reloaded.
    pub fn is_ready(&self) -> bool { self.phase.as_deref() == Some(PHASE_RUNNING) && self.address.is_some() }
}

/// Race `fut` against cancellation of the pass.
pub async fn guarded<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, ReconcileError>
where
    F: Future<Output = Result<T, E>>,
    ReconcileError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
        res = fut => res.map_err(ReconcileError::from),
    }
}

/// Fixed, coarse wait after creating the worker; ends early with `Cancelled`.
pub async fn settle(cancel: &CancellationToken, delay: Duration) -> Result<(), ReconcileError> {
    if delay.is_zero() { return Ok(()); }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
