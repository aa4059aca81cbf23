//! `Client` and `Upstream` custom resources.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "frpo.io";
pub const DEFAULT_ADMIN_PORT: u16 = 7400;

/// Reference to one key of a `Secret` in the declaring object's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct SecretRef {
    pub name: String,
    pub key: String,
}

/// Desired state of one frpc worker.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "frpo.io", version = "v1alpha1", kind = "Client", namespaced)]
#[kube(shortname = "frpclient")]
#[kube(printcolumn = r#"{"name":"Server","type":"string","jsonPath":".spec.server.host"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ClientSpec {
    pub server: ServerSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_server: Option<AdminServerSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuthenticationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TokenSpec {
    pub secret: SecretRef,
}

/// frpc admin API; the operator reloads the worker through it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AdminServerSpec {
    #[serde(default = "default_admin_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretRef>,
}

impl Default for AdminServerSpec {
    fn default() -> Self { Self { port: DEFAULT_ADMIN_PORT, username: None, password: None } }
}

fn default_admin_port() -> u16 { DEFAULT_ADMIN_PORT }

impl Client {
    /// Every secret key this client needs resolved before its config can be built.
    pub fn secret_refs(&self) -> Vec<&SecretRef> {
        let server = &self.spec.server;
        let token = server.authentication.as_ref().and_then(|a| a.token.as_ref()).map(|t| &t.secret);
        let admin = server.admin_server.as_ref();
        let mut out: Vec<&SecretRef> = token
            .into_iter()
            .chain(admin.and_then(|a| a.username.as_ref()))
            .chain(admin.and_then(|a| a.password.as_ref()))
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// One forwarding rule owned (by name) by a `Client`.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "frpo.io", version = "v1alpha1", kind = "Upstream", namespaced)]
#[kube(printcolumn = r#"{"name":"Client","type":"string","jsonPath":".spec.client"}"#)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSpec {
    /// Name of the owning `Client`.
    pub client: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp: Option<UdpSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpSpec {
    pub host: String,
    pub port: u16,
    pub server: RemotePortSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UdpSpec {
    pub host: String,
    pub port: u16,
    pub server: RemotePortSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RemotePortSpec {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    #[serde(default = "default_hc_timeout")]
    pub timeout_seconds: u32,
    #[serde(default = "default_hc_max_failed")]
    pub max_failed: u32,
    #[serde(default = "default_hc_interval")]
    pub interval_seconds: u32,
}

fn default_hc_timeout() -> u32 { 3 }
fn default_hc_max_failed() -> u32 { 3 }
fn default_hc_interval() -> u32 { 10 }

impl Upstream {
    /// Related-resource predicate: the upstream names `client` as its owner.
    pub fn belongs_to(&self, client: &str) -> bool { self.spec.client == client }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_refs_are_sorted_and_deduplicated() {
        let shared = SecretRef { name: "frp".into(), key: "token".into() };
        let spec = ClientSpec {
            server: ServerSpec {
                host: "frps.example.com".into(),
                port: 7000,
                authentication: Some(AuthenticationSpec { token: Some(TokenSpec { secret: shared.clone() }) }),
                admin_server: Some(AdminServerSpec {
                    port: 7400,
                    username: Some(SecretRef { name: "admin".into(), key: "user".into() }),
                    password: Some(shared),
                }),
            },
        };
        let client = Client::new("edge", spec);
        let refs: Vec<String> = client.secret_refs().iter().map(|r| format!("{}/{}", r.name, r.key)).collect();
        assert_eq!(refs, vec!["admin/user", "frp/token"]);
    }

    #[test]
    fn upstream_spec_parses_camel_case() {
        let v = serde_json::json!({
            "client": "edge",
            "tcp": { "host": "web", "port": 80, "server": { "port": 8080 }, "proxyProtocol": "v2",
                     "healthCheck": { "maxFailed": 5 } }
        });
        let spec: UpstreamSpec = serde_json::from_value(v).expect("parse");
        let tcp = spec.tcp.expect("tcp");
        assert_eq!(tcp.proxy_protocol.as_deref(), Some("v2"));
        let hc = tcp.health_check.expect("hc");
        assert_eq!(hc.max_failed, 5);
        assert_eq!(hc.timeout_seconds, 3);
        assert!(spec.udp.is_none());
    }

    #[test]
    fn admin_port_defaults() {
        let a: AdminServerSpec = serde_json::from_value(serde_json::json!({})).expect("parse");
        assert_eq!(a.port, DEFAULT_ADMIN_PORT);
    }
}
