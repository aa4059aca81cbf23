//! Object store seam used by the reconcile engine, and its kube-backed implementation.

use std::string::FromUtf8Error;

use frpo_core::{Client, ObjectKey, Upstream};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{Api, ListParams, PostParams};
use metrics::counter;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{verb} {kind} {key}: {source}")]
    Api {
        verb: &'static str,
        kind: &'static str,
        key: String,
        #[source]
        source: kube::Error,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Get/list/create access to everything one reconcile pass reads or writes.
///
/// Gets return `Ok(None)` for not-found. Creates are idempotent: an object that
/// already exists counts as created.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_client(&self, key: &ObjectKey) -> Result<Option<Client>, StoreError>;
    async fn list_upstreams(&self) -> Result<Vec<Upstream>, StoreError>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;
    async fn get_config_map(&self, key: &ObjectKey) -> Result<Option<ConfigMap>, StoreError>;
    async fn create_config_map(&self, cm: &ConfigMap) -> Result<(), StoreError>;
    /// Replace an existing ConfigMap; `cm` must carry the resourceVersion it was read at.
    async fn replace_config_map(&self, cm: &ConfigMap) -> Result<(), StoreError>;
    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>, StoreError>;
    async fn create_pod(&self, pod: &Pod) -> Result<(), StoreError>;
}

/// Decode one key of a Secret, preferring `data` over `stringData`.
///
/// `Ok(None)` when the key is absent; an error when the stored bytes are not UTF-8.
pub fn secret_value(secret: &Secret, key: &str) -> Result<Option<String>, FromUtf8Error> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(bytes.0.clone()).map(Some);
    }
    Ok(secret.string_data.as_ref().and_then(|d| d.get(key)).cloned())
}

/// `ObjectStore` over the cluster API server.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
    /// Restricts upstream listing to one namespace when set.
    namespace: Option<String>,
}

impl KubeStore {
    pub fn new(client: kube::Client, namespace: Option<String>) -> Self { Self { client, namespace } }

    fn api<K>(&self, ns: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), ns)
    }
}

fn api_err(verb: &'static str, kind: &'static str, key: impl ToString) -> impl FnOnce(kube::Error) -> StoreError {
    let key = key.to_string();
    move |source| StoreError::Api { verb, kind, key, source }
}

fn name_key(meta: &kube::api::ObjectMeta) -> String {
    format!("{}/{}", meta.namespace.as_deref().unwrap_or(""), meta.name.as_deref().unwrap_or(""))
}

fn is_already_exists(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get_client(&self, key: &ObjectKey) -> Result<Option<Client>, StoreError> {
        self.api::<Client>(&key.namespace).get_opt(&key.name).await.map_err(api_err("get", "Client", key))
    }

    async fn list_upstreams(&self) -> Result<Vec<Upstream>, StoreError> {
        let api: Api<Upstream> = match self.namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = api.list(&ListParams::default()).await.map_err(api_err("list", "Upstream", "*"))?;
        Ok(list.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        self.api::<Secret>(namespace)
            .get_opt(name)
            .await
            .map_err(api_err("get", "Secret", format!("{namespace}/{name}")))
    }

    async fn get_config_map(&self, key: &ObjectKey) -> Result<Option<ConfigMap>, StoreError> {
        self.api::<ConfigMap>(&key.namespace).get_opt(&key.name).await.map_err(api_err("get", "ConfigMap", key))
    }

    async fn create_config_map(&self, cm: &ConfigMap) -> Result<(), StoreError> {
        let ns = cm.metadata.namespace.as_deref().unwrap_or_default();
        match self.api::<ConfigMap>(ns).create(&PostParams::default(), cm).await {
            Ok(_) => {
                counter!("store_create_total", 1u64, "kind" => "ConfigMap");
                Ok(())
            }
            Err(e) if is_already_exists(&e) => {
                debug!(key = %name_key(&cm.metadata), "configmap already exists");
                Ok(())
            }
            Err(e) => Err(api_err("create", "ConfigMap", name_key(&cm.metadata))(e)),
        }
    }

    async fn replace_config_map(&self, cm: &ConfigMap) -> Result<(), StoreError> {
        let ns = cm.metadata.namespace.as_deref().unwrap_or_default();
        let name = cm.metadata.name.as_deref().unwrap_or_default();
        self.api::<ConfigMap>(ns)
            .replace(name, &PostParams::default(), cm)
            .await
            .map(|_| ())
            .map_err(api_err("replace", "ConfigMap", name_key(&cm.metadata)))
    }

    async fn get_pod(&self, key: &ObjectKey) -> Result<Option<Pod>, StoreError> {
        self.api::<Pod>(&key.namespace).get_opt(&key.name).await.map_err(api_err("get", "Pod", key))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), StoreError> {
        let ns = pod.metadata.namespace.as_deref().unwrap_or_default();
        match self.api::<Pod>(ns).create(&PostParams::default(), pod).await {
            Ok(_) => {
                counter!("store_create_total", 1u64, "kind" => "Pod");
                Ok(())
            }
            Err(e) if is_already_exists(&e) => {
                debug!(key = %name_key(&pod.metadata), "pod already exists");
                Ok(())
            }
            Err(e) => Err(api_err("create", "Pod", name_key(&pod.metadata))(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    #[test]
    fn secret_value_prefers_data() {
        let s = Secret {
            data: Some(BTreeMap::from([("token".to_string(), ByteString(b"from-data".to_vec()))])),
            string_data: Some(BTreeMap::from([("token".to_string(), "from-string".to_string())])),
            ..Secret::default()
        };
        assert_eq!(secret_value(&s, "token").expect("utf8").as_deref(), Some("from-data"));
        assert_eq!(secret_value(&s, "missing").expect("utf8"), None);
    }

    #[test]
    fn secret_value_falls_back_to_string_data() {
        let s = Secret {
            string_data: Some(BTreeMap::from([("user".to_string(), "admin".to_string())])),
            ..Secret::default()
        };
        assert_eq!(secret_value(&s, "user").expect("utf8").as_deref(), Some("admin"));
    }

    #[test]
    fn secret_value_reports_non_utf8() {
        let s = Secret {
            data: Some(BTreeMap::from([("token".to_string(), ByteString(vec![0xff, 0xfe]))])),
            ..Secret::default()
        };
        assert!(secret_value(&s, "token").is_err());
    }

    #[test]
    fn already_exists_is_recognised() {
        let e = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "configmaps \"edge\" already exists".into(),
            reason: "AlreadyExists".into(),
            code: 409,
        });
        assert!(is_already_exists(&e));
        let conflict = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "the object has been modified".into(),
            reason: "Conflict".into(),
            code: 409,
        });
        assert!(!is_already_exists(&conflict));
    }
}
