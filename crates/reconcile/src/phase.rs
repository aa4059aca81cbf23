//! Where a client stands, derived from what the store holds at one instant.

use k8s_openapi::api::core::v1::ConfigMap;

use crate::drift::DriftComparator;
use crate::readiness::WorkerStatus;

/// Observed lifecycle position of one client.
///
/// `ArtifactPending → WorkerPending → WorkerStarting → InSync ⇄ Drifted`; deletion
/// is left to cascading garbage collection and has no phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No ConfigMap stored yet.
    ArtifactPending,
    /// ConfigMap stored, no worker pod.
    WorkerPending,
    /// Worker exists but is not running and addressable yet.
    WorkerStarting,
    /// Worker ready, stored and rendered config match.
    InSync,
    /// Worker ready, stored config differs from the rendered one.
    Drifted,
}

impl Phase {
    /// Phases that resolve by themselves once the runtime catches up.
    pub fn is_transient(self) -> bool {
        matches!(self, Phase::ArtifactPending | Phase::WorkerPending | Phase::WorkerStarting)
    }
}

pub fn observe_phase<C: DriftComparator + ?Sized>(
    comparator: &C,
    stored: Option<&ConfigMap>,
    rendered: &ConfigMap,
    worker: Option<&WorkerStatus>,
) -> Phase {
    let Some(stored) = stored else { return Phase::ArtifactPending };
    let Some(worker) = worker else { return Phase::WorkerPending };
    if !worker.is_ready() {
        return Phase::WorkerStarting;
    }
    if comparator.drifted(stored, rendered) { Phase::Drifted } else { Phase::InSync }
}
