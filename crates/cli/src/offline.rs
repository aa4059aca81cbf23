//! Cluster-free commands: render a Client's frpc.ini from manifests, print CRDs.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use frpo_core::{Client, Config, ObjectKey, SecretRef, SecretValues, Upstream};
use kube::CustomResourceExt;
use serde::Deserialize;

/// `ns/name/key=value` → secret namespace and resolved value.
fn parse_secret(arg: &str) -> Result<(String, SecretRef, String)> {
    let (path, value) = arg.split_once('=').ok_or_else(|| anyhow!("secret {arg:?}: expected ns/name/key=value"))?;
    let mut parts = path.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ns), Some(name), Some(key)) if !ns.is_empty() && !name.is_empty() && !key.is_empty() => {
            Ok((ns.to_string(), SecretRef { name: name.to_string(), key: key.to_string() }, value.to_string()))
        }
        _ => bail!("secret {arg:?}: expected ns/name/key=value"),
    }
}

fn read_upstreams(path: &Path) -> Result<Vec<Upstream>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut out = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(&text) {
        let value = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing {}", path.display()))?;
        if value.is_null() {
            continue;
        }
        out.push(serde_yaml::from_value(value).with_context(|| format!("decoding Upstream in {}", path.display()))?);
    }
    Ok(out)
}

/// Build and render the config of `client` from in-memory manifests.
///
/// Only upstreams naming the client and secrets in the client's namespace
/// (any namespace when the manifest has none) take part.
pub fn render(client: &Client, upstreams: &[Upstream], secrets: &[(String, SecretRef, String)]) -> Result<String> {
    let name = client.metadata.name.as_deref().ok_or_else(|| anyhow!("client manifest has no metadata.name"))?;
    let ns = client.metadata.namespace.as_deref();
    let related: Vec<Upstream> = upstreams.iter().filter(|u| u.belongs_to(name)).cloned().collect();
    let values: SecretValues = secrets
        .iter()
        .filter(|(secret_ns, _, _)| ns.map_or(true, |ns| ns == secret_ns))
        .map(|(_, r, v)| (r.clone(), v.clone()))
        .collect();
    let label = ObjectKey::new(ns.unwrap_or("-"), name);
    let cfg = Config::build(client, &related, &values).with_context(|| format!("client {label}"))?;
    Ok(frpo_render::render_ini(&cfg))
}

pub fn render_files(client: &Path, upstreams: &[PathBuf], secrets: &[String]) -> Result<String> {
    let text = std::fs::read_to_string(client).with_context(|| format!("reading {}", client.display()))?;
    let client: Client = serde_yaml::from_str(&text).with_context(|| format!("decoding Client in {}", client.display()))?;
    let mut all = Vec::new();
    for p in upstreams {
        all.extend(read_upstreams(p)?);
    }
    let secrets = secrets.iter().map(|s| parse_secret(s)).collect::<Result<Vec<_>>>()?;
    render(&client, &all, &secrets)
}

pub fn crds_yaml() -> Result<String> {
    let mut out = String::new();
    for crd in [Client::crd(), Upstream::crd()] {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd).context("serializing CRD")?);
    }
    Ok(out)
}
