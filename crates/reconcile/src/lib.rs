//! frpo reconcile: the closed-loop controller for `Client` resources.
//!
//! A pass is level-triggered. It recomputes everything from what the store
//! holds now: the client, its upstreams (filtered from a full listing), the
//! rendered frpc.ini, and the worker's observed status. Artifacts are created
//! when absent and otherwise left alone; a stored ConfigMap that differs from
//! the rendered one makes the running worker reload. A ConfigMap created while
//! its worker was already running counts as drift, since that worker never
//! loaded it.
//!
//! Passes for one client are serialised by the work queue. Passes for
//! different clients may run concurrently and share only the store and the
//! reloader.

#![forbid(unsafe_code)]

pub mod drift;
pub mod engine;
pub mod error;
pub mod phase;
pub mod readiness;

pub use drift::{DriftComparator, RawEquality};
pub use engine::{
    ArtifactPolicy, EngineSettings, PassReport, Reconciler, NOT_READY_REQUEUE, POD_SETTLE_DELAY, STEADY_REQUEUE,
};
pub use error::{ErrorKind, ReconcileError};
pub use phase::{observe_phase, Phase};
pub use readiness::WorkerStatus;
