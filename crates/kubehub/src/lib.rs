//! frpo kubehub: typed store access and watch wiring for the operator.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::Client;
use tokio::sync::OnceCell;

pub mod store;
pub mod watch;

pub use store::{secret_value, KubeStore, ObjectStore, StoreError};
pub use watch::{client_trigger, owned_trigger, spawn_watchers, upstream_trigger};

static KUBE_CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared kube client built from the ambient kubeconfig or in-cluster environment.
pub async fn get_kube_client() -> Result<Client> {
    let client = KUBE_CLIENT
        .get_or_try_init(|| async { Client::try_default().await })
        .await
        .context("building kube client")?;
    Ok(client.clone())
}
