//! Watchers that turn store events into reconcile triggers keyed by client.

use std::fmt::Debug;

use frpo_core::{Client, ObjectKey, Upstream};
use frpo_render::artifacts::MANAGED_BY;
use frpo_render::controller_of;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::{
    api::Api,
    runtime::reflector,
    runtime::watcher::{self, Event},
    runtime::WatchStreamExt,
    Resource,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// A `Client` triggers itself.
pub fn client_trigger(c: &Client) -> Option<ObjectKey> { ObjectKey::of(c) }

/// An `Upstream` triggers every known client carrying the name it references,
/// in any namespace; the same relation the engine filters upstreams by.
pub fn upstream_trigger<'a>(u: &Upstream, clients: impl IntoIterator<Item = &'a Client>) -> Vec<ObjectKey> {
    if u.spec.client.is_empty() { return Vec::new(); }
    clients
        .into_iter()
        .filter(|c| u.belongs_to(c.metadata.name.as_deref().unwrap_or_default()))
        .filter_map(|c| ObjectKey::of(c))
        .collect()
}

/// A ConfigMap or Pod triggers the `Client` that controls it.
pub fn owned_trigger<K: Resource>(obj: &K) -> Option<ObjectKey> {
    let meta = obj.meta();
    let owner = controller_of(meta)?;
    let group = owner.api_version.split_once('/').map(|(g, _)| g)?;
    if owner.kind != "Client" || group != frpo_core::crds::GROUP { return None; }
    Some(ObjectKey::new(meta.namespace.clone()?, owner.name.clone()))
}

/// Watch stream for one kind, restarted with backoff on errors.
fn events<K>(api: Api<K>, cfg: watcher::Config) -> impl Stream<Item = Result<Event<K>, watcher::Error>> + Send
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher::watcher(api, cfg).default_backoff()
}

/// Forward the keys `map` yields for each event. Runs until the stream or the receiver ends.
pub async fn watch_triggers<K, S, F, I>(kind: &'static str, stream: S, map: F, tx: mpsc::Sender<ObjectKey>)
where
    S: Stream<Item = Result<Event<K>, watcher::Error>>,
    F: Fn(&K) -> I,
    I: IntoIterator<Item = ObjectKey>,
{
    futures::pin_mut!(stream);
    info!(kind, "watcher started");
    while let Some(ev) = stream.next().await {
        let objs: Vec<K> = match ev {
            Ok(Event::Applied(o)) | Ok(Event::Deleted(o)) => vec![o],
            Ok(Event::Restarted(list)) => {
                debug!(kind, count = list.len(), "watch restart");
                list
            }
            Err(e) => {
                counter!("watch_errors_total", 1u64, "kind" => kind);
                warn!(kind, error = %e, "watch error; backing off");
                continue;
            }
        };
        for key in objs.iter().flat_map(&map) {
            if tx.send(key).await.is_err() {
                info!(kind, "trigger receiver closed; watcher exiting");
                return;
            }
        }
    }
    warn!(kind, "watcher stream ended");
}

/// Spawn watchers for clients, upstreams and the objects the operator manages.
pub fn spawn_watchers(client: kube::Client, namespace: Option<&str>, tx: mpsc::Sender<ObjectKey>) -> Vec<JoinHandle<()>> {
    fn api<K>(client: &kube::Client, ns: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        match ns {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        }
    }
    let managed = watcher::Config::default().labels(&format!("app.kubernetes.io/managed-by={MANAGED_BY}"));
    let (clients, writer) = reflector::store::<Client>();
    let client_events = events(api::<Client>(&client, namespace), watcher::Config::default()).reflect(writer);
    let upstream_map = move |u: &Upstream| upstream_trigger(u, clients.state().iter().map(|c| &**c));
    vec![
        tokio::spawn(watch_triggers("Client", client_events, client_trigger, tx.clone())),
        tokio::spawn(watch_triggers("Upstream", events(api::<Upstream>(&client, namespace), watcher::Config::default()), upstream_map, tx.clone())),
        tokio::spawn(watch_triggers("ConfigMap", events(api::<ConfigMap>(&client, namespace), managed.clone()), owned_trigger::<ConfigMap>, tx.clone())),
        tokio::spawn(watch_triggers("Pod", events(api::<Pod>(&client, namespace), managed), owned_trigger::<Pod>, tx)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use frpo_core::crds::{ClientSpec, ServerSpec, UpstreamSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn owned_pod(api_version: &str, kind: &str) -> Pod {
        let mut p = Pod::default();
        p.metadata.name = Some("edge".into());
        p.metadata.namespace = Some("tunnels".into());
        p.metadata.owner_references = Some(vec![OwnerReference {
            api_version: api_version.into(),
            kind: kind.into(),
            name: "edge".into(),
            uid: "u1".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]);
        p
    }

    #[test]
    fn owned_objects_map_to_their_client() {
        assert_eq!(owned_trigger(&owned_pod("frpo.io/v1alpha1", "Client")), Some(ObjectKey::new("tunnels", "edge")));
        assert_eq!(owned_trigger(&owned_pod("apps/v1", "ReplicaSet")), None);
        assert_eq!(owned_trigger(&owned_pod("other.io/v1", "Client")), None);
        assert_eq!(owned_trigger(&Pod::default()), None);
    }

    fn named_client(ns: &str, name: &str) -> Client {
        let mut c = Client::new(name, ClientSpec { server: ServerSpec { host: "h".into(), port: 1, authentication: None, admin_server: None } });
        c.metadata.namespace = Some(ns.into());
        c
    }

    #[test]
    fn upstream_maps_to_every_client_with_that_name() {
        let clients = [named_client("tunnels", "edge"), named_client("elsewhere", "edge"), named_client("tunnels", "core")];
        let mut u = Upstream::new("web", UpstreamSpec { client: "edge".into(), tcp: None, udp: None });
        u.metadata.namespace = Some("tunnels".into());
        assert_eq!(
            upstream_trigger(&u, &clients),
            vec![ObjectKey::new("tunnels", "edge"), ObjectKey::new("elsewhere", "edge")]
        );
        u.spec.client = "missing".into();
        assert!(upstream_trigger(&u, &clients).is_empty());
        u.spec.client.clear();
        assert!(upstream_trigger(&u, &clients).is_empty());
    }

    #[test]
    fn client_maps_to_itself() {
        let mut c = Client::new("edge", ClientSpec { server: ServerSpec { host: "h".into(), port: 1, authentication: None, admin_server: None } });
        assert_eq!(client_trigger(&c), None);
        c.metadata.namespace = Some("tunnels".into());
        assert_eq!(client_trigger(&c), Some(ObjectKey::new("tunnels", "edge")));
    }
}
