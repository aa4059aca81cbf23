//! ConfigMap and Pod builders for one client.

use std::collections::BTreeMap;

use frpo_core::ObjectKey;
use k8s_openapi::api::core::v1::{ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, Pod, PodSpec, Volume, VolumeMount};
use kube::api::ObjectMeta;

/// Data key holding the rendered document.
pub const CONFIG_KEY: &str = "frpc.ini";
pub const DEFAULT_IMAGE: &str = "fatedier/frpc:v0.43.0";
pub const CONFIG_DIR: &str = "/etc/frp";
pub const MANAGED_BY: &str = "frpo";

const VOLUME_NAME: &str = "config";

fn labels(key: &ObjectKey) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "frpc".to_string()),
        ("app.kubernetes.io/instance".to_string(), key.name.clone()),
        ("app.kubernetes.io/managed-by".to_string(), MANAGED_BY.to_string()),
    ])
}

fn meta(key: &ObjectKey) -> ObjectMeta {
    ObjectMeta {
        name: Some(key.name.clone()),
        namespace: Some(key.namespace.clone()),
        labels: Some(labels(key)),
        ..ObjectMeta::default()
    }
}

/// ConfigMap named after the client, carrying the rendered frpc.ini.
pub fn config_map(key: &ObjectKey, ini: &str) -> ConfigMap {
    ConfigMap {
        metadata: meta(key),
        data: Some(BTreeMap::from([(CONFIG_KEY.to_string(), ini.to_string())])),
        ..ConfigMap::default()
    }
}

#[derive(Debug, Clone)]
pub struct PodParams<'a> {
    pub image: &'a str,
    pub admin_port: u16,
}

impl Default for PodParams<'_> {
    fn default() -> Self { Self { image: DEFAULT_IMAGE, admin_port: frpo_core::crds::DEFAULT_ADMIN_PORT } }
}

/// Single-container frpc pod mounting the client's ConfigMap.
pub fn pod(key: &ObjectKey, params: &PodParams<'_>) -> Pod {
    let container = Container {
        name: "frpc".to_string(),
        image: Some(params.image.to_string()),
        args: Some(vec!["-c".to_string(), format!("{CONFIG_DIR}/{CONFIG_KEY}")]),
        ports: Some(vec![ContainerPort {
            name: Some("admin".to_string()),
            container_port: i32::from(params.admin_port),
            protocol: Some("TCP".to_string()),
            ..ContainerPort::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: VOLUME_NAME.to_string(),
            mount_path: CONFIG_DIR.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        }]),
        ..Container::default()
    };
    Pod {
        metadata: meta(key),
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: Some(vec![Volume {
                name: VOLUME_NAME.to_string(),
                config_map: Some(ConfigMapVolumeSource { name: Some(key.name.clone()), ..ConfigMapVolumeSource::default() }),
                ..Volume::default()
            }]),
            restart_policy: Some("Always".to_string()),
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}
