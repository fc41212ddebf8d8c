//! Router configuration parsed from environment variables.

pub const DEFAULT_PORT: u16 = 9400;
pub const DEFAULT_ADVERTISE_IP: &str = "127.0.0.1";
pub const DEFAULT_STORE_HOSTS: &str = "memory";
pub const DEFAULT_STORE_SESSION_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_WATCH_ROOT: &str = "/rocky";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub hosts: String,
    /// Session timeout for a networked coordination backend. The in-memory
    /// store has no sessions to expire and only logs it.
    pub session_timeout_ms: u64,
    /// Root under which `infos/` and `routes/` live.
    pub watch_root: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port serving routing sessions and the HTTP endpoints.
    pub port: u16,
    /// Address published under `routes/` for clients to dial.
    pub advertise_ip: String,
    /// Accepted access keys. Empty accepts every key.
    pub access_keys: Vec<String>,
    pub store: StoreConfig,
}

impl ServerConfig {
    /// Build typed router config from environment variables.
    ///
    /// Optional:
    /// - `ROCKY_PORT`: default 9400
    /// - `ROCKY_ADVERTISE_IP`: default `127.0.0.1`
    /// - `ROCKY_ACCESS_KEYS`: comma separated; empty accepts any key
    /// - `ROCKY_STORE_HOSTS`: default `memory`
    /// - `ROCKY_STORE_SESSION_TIMEOUT_MS`: default 15000
    /// - `ROCKY_WATCH_ROOT`: default `/rocky`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env_parse("ROCKY_PORT", DEFAULT_PORT)?;
        let advertise_ip = env_or("ROCKY_ADVERTISE_IP", DEFAULT_ADVERTISE_IP);
        let access_keys = parse_list(std::env::var("ROCKY_ACCESS_KEYS").ok().as_deref());
        let store = StoreConfig {
            hosts: env_or("ROCKY_STORE_HOSTS", DEFAULT_STORE_HOSTS),
            session_timeout_ms: env_parse("ROCKY_STORE_SESSION_TIMEOUT_MS", DEFAULT_STORE_SESSION_TIMEOUT_MS)?,
            watch_root: env_or("ROCKY_WATCH_ROOT", DEFAULT_WATCH_ROOT),
        };
        Ok(Self { port, advertise_ip, access_keys, store })
    }

    /// Whether a Connect carrying `key` may proceed.
    #[must_use]
    pub fn accepts_key(&self, key: &str) -> bool {
        self.access_keys.is_empty() || self.access_keys.iter().any(|k| k == key)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_owned())
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::Invalid { var: key, value: raw })
        }
        _ => Ok(default),
    }
}

fn parse_list(raw: Option<&str>) -> Vec<String> {
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
