//! frpo render: turn a domain `Config` into frpc.ini and the objects that carry it.
//!
//! Everything here is pure. `render_ini` is byte-for-byte deterministic for equal
//! input; drift detection compares its output against what is stored.

#![forbid(unsafe_code)]

use frpo_core::model::{Config, Protocol, UpstreamRule};

pub mod artifacts;
pub mod owner;

pub use artifacts::{config_map, pod, PodParams, CONFIG_KEY, DEFAULT_IMAGE};
pub use owner::{controller_of, owner_ref, set_controller_owner, OwnershipError};

/// Address frpc binds its admin API to inside the pod.
pub const ADMIN_BIND_ADDR: &str = "0.0.0.0";

/// Minimal INI writer; keys are emitted in call order.
struct Ini {
    out: String,
}

impl Ini {
    fn new() -> Self { Self { out: String::with_capacity(512) } }

    fn section(&mut self, name: &str) {
        if !self.out.is_empty() { self.out.push('\n'); }
        self.out.push('[');
        self.out.push_str(name);
        self.out.push_str("]\n");
    }

    fn kv(&mut self, key: &str, value: impl AsRef<str>) {
        self.out.push_str(key);
        self.out.push_str(" = ");
        self.out.push_str(value.as_ref());
        self.out.push('\n');
    }

    fn finish(self) -> String { self.out }
}

/// Render frpc.ini. The observed admin address is runtime state and is never rendered.
pub fn render_ini(cfg: &Config) -> String {
    let c = &cfg.common;
    let mut ini = Ini::new();
    ini.section("common");
    ini.kv("server_addr", &c.server_address);
    ini.kv("server_port", c.server_port.to_string());
    if let Some(token) = &c.token {
        ini.kv("authentication_method", "token");
        ini.kv("token", token);
    }
    ini.kv("admin_addr", ADMIN_BIND_ADDR);
    ini.kv("admin_port", c.admin_port.to_string());
    if let Some(user) = &c.admin_username { ini.kv("admin_user", user); }
    if let Some(pwd) = &c.admin_password { ini.kv("admin_pwd", pwd); }
    for rule in &cfg.upstreams {
        render_rule(&mut ini, rule);
    }
    ini.finish()
}

fn render_rule(ini: &mut Ini, rule: &UpstreamRule) {
    ini.section(&rule.name);
    ini.kv("type", rule.protocol.as_str());
    ini.kv("local_ip", &rule.local_ip);
    ini.kv("local_port", rule.local_port.to_string());
    ini.kv("remote_port", rule.remote_port.to_string());
    if let Protocol::Tcp { proxy_protocol, health_check } = &rule.protocol {
        if let Some(pp) = proxy_protocol {
            ini.kv("proxy_protocol_version", pp.as_str());
        }
        if let Some(hc) = health_check {
            ini.kv("health_check_type", "tcp");
            ini.kv("health_check_timeout_s", hc.timeout_seconds.to_string());
            ini.kv("health_check_max_failed", hc.max_failed.to_string());
            ini.kv("health_check_interval_s", hc.interval_seconds.to_string());
        }
    }
}
