use frpo_core::{ModelError, ObjectKey};
use frpo_kubehub::StoreError;
use frpo_queue::ErrorClass;
use frpo_reload::ReloadError;
use frpo_render::OwnershipError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("client {0} not found")]
    NotFound(ObjectKey),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid declaration: {0}")]
    Model(#[from] ModelError),
    #[error("ownership: {0}")]
    Ownership(#[from] OwnershipError),
    #[error("reload: {0}")]
    Reload(#[from] ReloadError),
    #[error("pass cancelled")]
    Cancelled,
}

/// Coarse error taxonomy, used for metrics labels and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Store,
    Validation,
    Reload,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Store => "store",
            ErrorKind::Validation => "validation",
            ErrorKind::Reload => "reload",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::NotFound(_) => ErrorKind::NotFound,
            ReconcileError::Store(_) => ErrorKind::Store,
            ReconcileError::Model(_) | ReconcileError::Ownership(_) => ErrorKind::Validation,
            ReconcileError::Reload(_) => ErrorKind::Reload,
            ReconcileError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl ErrorClass for ReconcileError {
    /// A vanished client is cleaned up by cascading deletion; a cancelled pass is re-derived later.
    fn is_terminal(&self) -> bool { matches!(self.kind(), ErrorKind::NotFound | ErrorKind::Cancelled) }
}
