//! One reconcile pass per trigger: fetch, build, render, observe, ensure, gate, compare, reload.

use std::sync::Arc;
use std::time::Duration;

use frpo_core::{Client, Config, ModelError, ObjectKey, SecretValues, Upstream};
use frpo_kubehub::{secret_value, ObjectStore};
use frpo_queue::{Handler, Requeue};
use frpo_reload::Reloader;
use frpo_render::{config_map, owner_ref, pod, render_ini, set_controller_owner, PodParams, DEFAULT_IMAGE};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use metrics::{counter, histogram};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::drift::{DriftComparator, RawEquality};
use crate::phase::{observe_phase, Phase};
use crate::readiness::{guarded, settle, WorkerStatus};
use crate::ReconcileError;

pub const STEADY_REQUEUE: Duration = Duration::from_secs(30);
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(10);
pub const POD_SETTLE_DELAY: Duration = Duration::from_secs(10);

/// What happens to a stored ConfigMap whose content differs from the rendered one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtifactPolicy {
    /// Compare and reload only; the stored ConfigMap is never rewritten.
    #[default]
    CompareOnly,
    /// Additionally replace the stored data once the worker accepted the reload.
    WriteBack,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub image: String,
    pub steady_requeue: Duration,
    pub not_ready_requeue: Duration,
    pub settle_delay: Duration,
    pub artifact_policy: ArtifactPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            steady_requeue: STEADY_REQUEUE,
            not_ready_requeue: NOT_READY_REQUEUE,
            settle_delay: POD_SETTLE_DELAY,
            artifact_policy: ArtifactPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Phase seen before anything was created.
    pub observed: Phase,
    /// Phase the pass ended in; `Drifted` means the worker was reloaded.
    pub phase: Phase,
    pub created_artifact: bool,
    pub created_worker: bool,
    pub upstreams: usize,
}

pub struct Reconciler<S, R, C = RawEquality> {
    store: Arc<S>,
    reloader: Arc<R>,
    comparator: C,
    settings: EngineSettings,
}

impl<S: ObjectStore, R: Reloader> Reconciler<S, R, RawEquality> {
    pub fn new(store: Arc<S>, reloader: Arc<R>, settings: EngineSettings) -> Self {
        Self { store, reloader, comparator: RawEquality, settings }
    }
}

impl<S: ObjectStore, R: Reloader, C: DriftComparator> Reconciler<S, R, C> {
    pub fn with_comparator<C2: DriftComparator>(self, comparator: C2) -> Reconciler<S, R, C2> {
        Reconciler { store: self.store, reloader: self.reloader, comparator, settings: self.settings }
    }

    pub fn settings(&self) -> &EngineSettings { &self.settings }

    /// Reconcile one client and tell the queue when to look again.
    pub async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<Requeue, ReconcileError> {
        let t0 = Instant::now();
        let res = self.pass(key, cancel).instrument(info_span!("reconcile", client = %key)).await;
        histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        counter!("reconcile_total", 1u64);
        match res {
            Ok(report) => {
                debug!(client = %key, phase = ?report.phase, "pass complete");
                Ok(Requeue::After(self.requeue_for(report.phase)))
            }
            Err(e) => {
                counter!("reconcile_errors_total", 1u64, "kind" => e.kind().as_str());
                Err(e)
            }
        }
    }

    pub fn requeue_for(&self, phase: Phase) -> Duration {
        if phase.is_transient() { self.settings.not_ready_requeue } else { self.settings.steady_requeue }
    }

    /// The pass itself. Every store or reload call races `cancel`; nothing is rolled back.
    pub async fn pass(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<PassReport, ReconcileError> {
        info!("start client reconcile");
        let client = guarded(cancel, self.store.get_client(key))
            .await?
            .ok_or_else(|| ReconcileError::NotFound(key.clone()))?;

        let upstreams: Vec<Upstream> = guarded(cancel, self.store.list_upstreams())
            .await?
            .into_iter()
            .filter(|u| u.belongs_to(&key.name))
            .collect();
        debug!(count = upstreams.len(), "related upstreams");

        let secrets = self.resolve_secrets(&client, &key.namespace, cancel).await?;
        let mut config = Config::build(&client, &upstreams, &secrets)?;

        let (rendered_cm, worker_pod) = self.desired_objects(key, &client, &config)?;

        let stored_cm = guarded(cancel, self.store.get_config_map(key)).await?;
        let stored_pod = guarded(cancel, self.store.get_pod(key)).await?;
        let observed = observe_phase(
            &self.comparator,
            stored_cm.as_ref(),
            &rendered_cm,
            stored_pod.as_ref().map(WorkerStatus::observe).as_ref(),
        );
        info!(phase = ?observed, "observed");

        let created_artifact = stored_cm.is_none();
        let mut baseline = match stored_cm {
            Some(cm) => cm,
            None => self.create_config_map(&rendered_cm, cancel).await?,
        };
        let created_worker = stored_pod.is_none();
        let worker = match stored_pod {
            Some(p) => Some(p),
            None => self.create_pod(key, &worker_pod, cancel).await?,
        };
        if created_artifact && created_worker {
            // the new pod mounts the new ConfigMap
            baseline = rendered_cm.clone();
        }

        let status = worker.as_ref().map(WorkerStatus::observe);
        let phase = observe_phase(&self.comparator, Some(&baseline), &rendered_cm, status.as_ref());
        let report = |phase| PassReport { observed, phase, created_artifact, created_worker, upstreams: upstreams.len() };
        match phase {
            Phase::Drifted => {}
            Phase::InSync => {
                debug!("config in sync");
                return Ok(report(phase));
            }
            pending => {
                info!(phase = ?pending, "worker not ready; requeue");
                return Ok(report(pending));
            }
        }

        let address = status.and_then(|s| s.address);
        info!(address = ?address, "config drifted; reloading worker");
        config.common.admin_address = address;
        guarded(cancel, self.reloader.reload(&config)).await?;

        if self.settings.artifact_policy == ArtifactPolicy::WriteBack && !created_artifact {
            baseline.data = rendered_cm.data;
            guarded(cancel, self.store.replace_config_map(&baseline)).await?;
            info!("stored config map updated");
        }
        Ok(report(Phase::Drifted))
    }

    /// Every secret the client names, in its namespace. Absent or undecodable values fail validation.
    async fn resolve_secrets(&self, client: &Client, ns: &str, cancel: &CancellationToken) -> Result<SecretValues, ReconcileError> {
        let mut out = SecretValues::new();
        for r in client.secret_refs() {
            let secret = guarded(cancel, self.store.get_secret(ns, &r.name))
                .await?
                .ok_or_else(|| ModelError::MissingSecret(r.clone()))?;
            let value = secret_value(&secret, &r.key)
                .map_err(|e| ModelError::InvalidSecret { secret: r.clone(), reason: e.to_string() })?
                .ok_or_else(|| ModelError::MissingSecret(r.clone()))?;
            out.insert(r.clone(), value);
        }
        Ok(out)
    }

    fn desired_objects(&self, key: &ObjectKey, client: &Client, config: &Config) -> Result<(ConfigMap, Pod), ReconcileError> {
        let owner = owner_ref(client)?;
        let mut cm = config_map(key, &render_ini(config));
        set_controller_owner(&mut cm.metadata, owner.clone())?;
        let mut p = pod(key, &PodParams { image: &self.settings.image, admin_port: config.common.admin_port });
        set_controller_owner(&mut p.metadata, owner)?;
        Ok((cm, p))
    }

    /// Create the ConfigMap. The returned baseline holds no data: a worker that is
    /// already running has not loaded what was just written.
    async fn create_config_map(&self, rendered: &ConfigMap, cancel: &CancellationToken) -> Result<ConfigMap, ReconcileError> {
        info!("create config map");
        guarded(cancel, self.store.create_config_map(rendered)).await?;
        counter!("artifact_created_total", 1u64, "kind" => "ConfigMap");
        Ok(ConfigMap { metadata: rendered.metadata.clone(), ..ConfigMap::default() })
    }

    /// Create the Pod, then wait the settle delay and observe it again.
    async fn create_pod(&self, key: &ObjectKey, desired: &Pod, cancel: &CancellationToken) -> Result<Option<Pod>, ReconcileError> {
        info!("create pod");
        guarded(cancel, self.store.create_pod(desired)).await?;
        counter!("artifact_created_total", 1u64, "kind" => "Pod");
        settle(cancel, self.settings.settle_delay).await?;
        guarded(cancel, self.store.get_pod(key)).await
    }
}

#[async_trait::async_trait]
impl<S, R, C> Handler<ObjectKey> for Reconciler<S, R, C>
where
    S: ObjectStore + 'static,
    R: Reloader + 'static,
    C: DriftComparator + 'static,
{
    type Error = ReconcileError;

    async fn handle(&self, key: &ObjectKey, cancel: CancellationToken) -> Result<Requeue, ReconcileError> {
        self.reconcile(key, &cancel).await
    }
}
