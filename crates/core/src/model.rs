//! Domain config built from one `Client` and its related `Upstream`s.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crds::{Client, SecretRef, Upstream};

/// Resolved secret values, keyed by reference, all from the client's namespace.
pub type SecretValues = BTreeMap<SecretRef, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("client {0}: {1}")]
    Client(String, String),
    #[error("secret {}/{} not resolved", .0.name, .0.key)]
    MissingSecret(SecretRef),
    #[error("secret {}/{}: {reason}", .secret.name, .secret.key)]
    InvalidSecret { secret: SecretRef, reason: String },
    #[error("{owner}: {field} must be a single line without brackets")]
    UnsafeValue { owner: String, field: &'static str },
    #[error("upstream {0}: exactly one of tcp or udp must be set")]
    Protocol(String),
    #[error("upstream {0}: {1}")]
    Upstream(String, String),
    #[error("upstreams {first} and {second} both claim remote {protocol} port {port}")]
    PortConflict { protocol: &'static str, port: u16, first: String, second: String },
    #[error("duplicate upstream name {0}")]
    DuplicateName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub common: Common,
    /// Sorted by name.
    pub upstreams: Vec<UpstreamRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Common {
    pub server_address: String,
    pub server_port: u16,
    pub token: Option<String>,
    /// Observed worker address; never taken from the declaration.
    pub admin_address: Option<String>,
    pub admin_port: u16,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRule {
    pub name: String,
    pub protocol: Protocol,
    pub local_ip: String,
    pub local_port: u16,
    pub remote_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp { proxy_protocol: Option<ProxyProtocol>, health_check: Option<HealthCheck> },
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp { .. } => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyProtocol { V1, V2 }

impl ProxyProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyProtocol::V1 => "v1",
            ProxyProtocol::V2 => "v2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub timeout_seconds: u32,
    pub max_failed: u32,
    pub interval_seconds: u32,
}

impl Config {
    /// Build and validate the config for `client` from its related upstreams.
    pub fn build(client: &Client, upstreams: &[Upstream], secrets: &SecretValues) -> Result<Self, ModelError> {
        let client_name = client.metadata.name.clone().unwrap_or_default();
        let server = &client.spec.server;
        if server.host.trim().is_empty() {
            return Err(ModelError::Client(client_name, "server host is empty".into()));
        }
        ini_safe(&client_name, "server host", &server.host)?;
        if server.port == 0 {
            return Err(ModelError::Client(client_name, "server port must be non-zero".into()));
        }
        let resolve = |r: &SecretRef| match secrets.get(r) {
            Some(raw) => secret_line(r, raw),
            None => Err(ModelError::MissingSecret(r.clone())),
        };

        let token = match server.authentication.as_ref().and_then(|a| a.token.as_ref()) {
            Some(t) => Some(resolve(&t.secret)?),
            None => None,
        };
        let admin = server.admin_server.clone().unwrap_or_default();
        if admin.port == 0 {
            return Err(ModelError::Client(client_name, "admin port must be non-zero".into()));
        }
        let admin_username = admin.username.as_ref().map(resolve).transpose()?;
        let admin_password = admin.password.as_ref().map(resolve).transpose()?;

        let mut rules = upstreams.iter().map(rule_from).collect::<Result<Vec<_>, _>>()?;
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        check_unique(&rules)?;

        Ok(Self {
            common: Common {
                server_address: server.host.clone(),
                server_port: server.port,
                token,
                admin_address: None,
                admin_port: admin.port,
                admin_username,
                admin_password,
            },
            upstreams: rules,
        })
    }
}

fn rule_from(u: &Upstream) -> Result<UpstreamRule, ModelError> {
    let name = u.metadata.name.clone().unwrap_or_default();
    if name.is_empty() {
        return Err(ModelError::Upstream(name, "metadata.name is empty".into()));
    }
    ini_safe(&name, "name", &name)?;
    let (protocol, host, port, remote) = match (&u.spec.tcp, &u.spec.udp) {
        (Some(tcp), None) => {
            let proxy_protocol = match tcp.proxy_protocol.as_deref() {
                None => None,
                Some("v1") => Some(ProxyProtocol::V1),
                Some("v2") => Some(ProxyProtocol::V2),
                Some(other) => {
                    return Err(ModelError::Upstream(name, format!("unsupported proxy protocol {other:?} (expect v1 or v2)")))
                }
            };
            let health_check = tcp.health_check.as_ref().map(|h| HealthCheck {
                timeout_seconds: h.timeout_seconds,
                max_failed: h.max_failed,
                interval_seconds: h.interval_seconds,
            });
            (Protocol::Tcp { proxy_protocol, health_check }, &tcp.host, tcp.port, tcp.server.port)
        }
        (None, Some(udp)) => (Protocol::Udp, &udp.host, udp.port, udp.server.port),
        _ => return Err(ModelError::Protocol(name)),
    };
    if host.trim().is_empty() {
        return Err(ModelError::Upstream(name, "host is empty".into()));
    }
    ini_safe(&name, "host", host)?;
    if port == 0 || remote == 0 {
        return Err(ModelError::Upstream(name, "ports must be non-zero".into()));
    }
    Ok(UpstreamRule { name, protocol, local_ip: host.clone(), local_port: port, remote_port: remote })
}

/// Values land verbatim on one frpc.ini line; a line break or bracket would start a new key or section.
fn ini_safe(owner: &str, field: &'static str, value: &str) -> Result<(), ModelError> {
    if value.chars().any(|c| c.is_control() || c == '[' || c == ']') {
        return Err(ModelError::UnsafeValue { owner: owner.to_string(), field });
    }
    Ok(())
}

/// Secret files commonly end in a newline; strip trailing line breaks, reject any inner one.
fn secret_line(r: &SecretRef, raw: &str) -> Result<String, ModelError> {
    let value = raw.trim_end_matches(['\r', '\n']);
    let invalid = |reason: &str| ModelError::InvalidSecret { secret: r.clone(), reason: reason.to_string() };
    if value.is_empty() {
        return Err(invalid("value is empty"));
    }
    if value.chars().any(char::is_control) {
        return Err(invalid("value spans several lines or holds control characters"));
    }
    Ok(value.to_string())
}

fn check_unique(rules: &[UpstreamRule]) -> Result<(), ModelError> {
    let mut names = BTreeSet::new();
    let mut ports: BTreeMap<(&'static str, u16), &str> = BTreeMap::new();
    for r in rules {
        if !names.insert(r.name.as_str()) {
            return Err(ModelError::DuplicateName(r.name.clone()));
        }
        let proto = r.protocol.as_str();
        if let Some(first) = ports.insert((proto, r.remote_port), r.name.as_str()) {
            return Err(ModelError::PortConflict {
                protocol: proto,
                port: r.remote_port,
                first: first.to_string(),
                second: r.name.clone(),
            });
        }
    }
    Ok(())
}
