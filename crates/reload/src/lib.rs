//! frpo reload: push a rendered config to a running frpc and ask it to reload.

#![forbid(unsafe_code)]

use std::net::IpAddr;
use std::time::Duration;

use frpo_core::Config;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("worker has no observed admin address")]
    NoAddress,
    #[error("building http client: {0}")]
    Setup(#[source] reqwest::Error),
    #[error("{step}: {source}")]
    Transport {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{step}: admin api answered {status}")]
    Status { step: &'static str, status: u16 },
}

/// Sends a live-reload request to the worker addressed by `cfg.common.admin_address`.
#[async_trait::async_trait]
pub trait Reloader: Send + Sync {
    async fn reload(&self, cfg: &Config) -> Result<(), ReloadError>;
}

/// frpc admin API client: `PUT /api/config` with the rendered document, then `GET /api/reload`.
#[derive(Clone)]
pub struct HttpReloader {
    http: reqwest::Client,
}

impl HttpReloader {
    pub fn new(timeout: Duration) -> Result<Self, ReloadError> {
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(ReloadError::Setup)?;
        Ok(Self { http })
    }

    fn authed(&self, req: reqwest::RequestBuilder, cfg: &Config) -> reqwest::RequestBuilder {
        match &cfg.common.admin_username {
            Some(user) => req.basic_auth(user, cfg.common.admin_password.as_ref()),
            None => req,
        }
    }

    async fn call(&self, step: &'static str, req: reqwest::RequestBuilder) -> Result<(), ReloadError> {
        let resp = req.send().await.map_err(|source| ReloadError::Transport { step, source })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ReloadError::Status { step, status: status.as_u16() });
        }
        debug!(step, status = status.as_u16(), "admin api ok");
        Ok(())
    }
}

/// `http://host:port`, bracketing IPv6 literals.
pub fn admin_base_url(addr: &str, port: u16) -> String {
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("http://[{v6}]:{port}"),
        _ => format!("http://{addr}:{port}"),
    }
}

#[async_trait::async_trait]
impl Reloader for HttpReloader {
    async fn reload(&self, cfg: &Config) -> Result<(), ReloadError> {
        let addr = cfg.common.admin_address.as_deref().ok_or(ReloadError::NoAddress)?;
        let base = admin_base_url(addr, cfg.common.admin_port);
        let body = frpo_render::render_ini(cfg);

        let put = self.authed(self.http.put(format!("{base}/api/config")), cfg).body(body);
        self.call("PUT /api/config", put).await?;
        let get = self.authed(self.http.get(format!("{base}/api/reload")), cfg);
        self.call("GET /api/reload", get).await?;

        counter!("reload_total", 1u64);
        info!(addr = %base, upstreams = cfg.upstreams.len(), "frpc reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_brackets_ipv6() {
        assert_eq!(admin_base_url("10.1.2.3", 7400), "http://10.1.2.3:7400");
        assert_eq!(admin_base_url("fd00::7", 7400), "http://[fd00::7]:7400");
        assert_eq!(admin_base_url("frpc.tunnels.svc", 7400), "http://frpc.tunnels.svc:7400");
    }
}
