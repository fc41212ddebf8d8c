//! Client configuration parsed from environment variables.

use std::time::Duration;

use crate::error::ClientError;

pub const DEFAULT_ROUTER_URL: &str = "http://127.0.0.1:9400";
pub const DEFAULT_PROFILE: &str = "prod";
pub const DEFAULT_INSTANCE_IP: &str = "127.0.0.1";
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(5);

/// Identity and routing options for one client instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// HTTP base URL serving `/rocky/routers`.
    pub router_url: String,
    pub namespace: String,
    pub profile: String,
    pub access_key: String,
    pub instance_id: String,
    /// Address other consumers dial for this instance's modules.
    pub instance_ip: String,
    pub instance_port: u16,
    /// Modules this instance serves. Empty for a pure consumer.
    pub modules: Vec<String>,
    /// Period between `HealthIdle` frames. Must be non-zero.
    pub heartbeat: Duration,
}

impl ClientConfig {
    /// Config with defaults for everything but the namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            router_url: DEFAULT_ROUTER_URL.to_owned(),
            namespace: namespace.into(),
            profile: DEFAULT_PROFILE.to_owned(),
            access_key: String::new(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            instance_ip: DEFAULT_INSTANCE_IP.to_owned(),
            instance_port: 0,
            modules: Vec::new(),
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    /// Build client config from environment variables.
    ///
    /// Required:
    /// - `ROCKY_NAMESPACE`
    ///
    /// Optional:
    /// - `ROCKY_ROUTER_URL`: default `http://127.0.0.1:9400`
    /// - `ROCKY_PROFILE`: default `prod`
    /// - `ROCKY_ACCESS_KEY`
    /// - `ROCKY_INSTANCE_ID`: random UUID when absent
    /// - `ROCKY_INSTANCE_IP`: default `127.0.0.1`
    /// - `ROCKY_INSTANCE_PORT`: default 0
    /// - `ROCKY_MODULES`: comma separated
    /// - `ROCKY_HEARTBEAT_SECS`: default 5, must be positive
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when the namespace is missing, a
    /// numeric variable does not parse, or the heartbeat is zero.
    pub fn from_env() -> Result<Self, ClientError> {
        let namespace = env_opt("ROCKY_NAMESPACE")
            .ok_or(ClientError::Config { var: "ROCKY_NAMESPACE", value: String::new() })?;
        let mut cfg = Self::new(namespace);
        if let Some(url) = env_opt("ROCKY_ROUTER_URL") {
            cfg.router_url = url;
        }
        if let Some(profile) = env_opt("ROCKY_PROFILE") {
            cfg.profile = profile;
        }
        if let Some(key) = env_opt("ROCKY_ACCESS_KEY") {
            cfg.access_key = key;
        }
        if let Some(id) = env_opt("ROCKY_INSTANCE_ID") {
            cfg.instance_id = id;
        }
        if let Some(ip) = env_opt("ROCKY_INSTANCE_IP") {
            cfg.instance_ip = ip;
        }
        cfg.instance_port = env_parse("ROCKY_INSTANCE_PORT", 0)?;
        cfg.modules = parse_list(env_opt("ROCKY_MODULES").as_deref());
        let heartbeat_secs = env_parse("ROCKY_HEARTBEAT_SECS", DEFAULT_HEARTBEAT.as_secs())?;
        if heartbeat_secs == 0 {
            return Err(ClientError::Config { var: "ROCKY_HEARTBEAT_SECS", value: "0".to_owned() });
        }
        cfg.heartbeat = Duration::from_secs(heartbeat_secs);
        Ok(cfg)
    }

    /// The Connect payload announcing this instance.
    #[must_use]
    pub fn service_info(&self) -> frames::ServiceInfo {
        frames::ServiceInfo {
            namespace: self.namespace.clone(),
            profile: self.profile.clone(),
            instance_id: self.instance_id.clone(),
            ip: self.instance_ip.clone(),
            port: i32::from(self.instance_port),
            access_key: self.access_key.clone(),
            modules: self.modules.clone(),
            msg: std::collections::HashMap::new(),
        }
    }

    /// The discovery URL for the routing server list.
    #[must_use]
    pub fn routers_url(&self) -> String {
        format!("{}/rocky/routers", self.router_url.trim_end_matches('/'))
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ClientError> {
    match env_opt(key) {
        Some(raw) => raw.parse().map_err(|_| ClientError::Config { var: key, value: raw }),
        None => Ok(default),
    }
}

pub(crate) fn parse_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
