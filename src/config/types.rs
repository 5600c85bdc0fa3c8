//! Configuration data types.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use url::Url;

/// Root configuration structure, read from `config.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Port the load balancer listens on
    pub lb_port: u16,

    /// Origin servers to balance across
    #[serde(default)]
    pub backends: Vec<BackendEntry>,
}

/// One backend entry in the configuration file.
///
/// Two forms are accepted: the full object form, and a legacy form where
/// the entry is a bare URL string.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BackendEntry {
    Detailed(BackendConfig),
    Url(String),
}

/// Object-form backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Display label; defaults to the URL's host:port when empty
    #[serde(default)]
    pub name: String,

    /// Origin base URL (scheme, host, port)
    pub url: String,

    /// Relative weight for round-robin; absent or non-positive means 1
    #[serde(default = "default_weight")]
    pub weight: i64,
}

/// A backend entry resolved to its final name, URL, and weight.
#[derive(Debug, Clone)]
pub struct ResolvedBackend {
    pub name: String,
    pub url: Url,
    pub weight: u32,
}

impl BackendEntry {
    /// The raw URL string of this entry, before parsing.
    pub fn url_str(&self) -> &str {
        match self {
            BackendEntry::Detailed(backend) => &backend.url,
            BackendEntry::Url(url) => url,
        }
    }

    /// Parse and normalize this entry.
    ///
    /// Legacy string entries get weight 1 and a host:port display name.
    pub fn resolve(&self) -> Result<ResolvedBackend, ConfigError> {
        let raw = self.url_str();
        let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
            url: raw.to_string(),
            source,
        })?;

        let Some(host) = url.host_str() else {
            return Err(ConfigError::MissingHost(raw.to_string()));
        };

        let (name, weight) = match self {
            BackendEntry::Detailed(backend) => (backend.name.clone(), backend.weight),
            BackendEntry::Url(_) => (String::new(), 1),
        };

        let name = if name.is_empty() {
            match url.port_or_known_default() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            }
        } else {
            name
        };

        let weight = if weight <= 0 { 1 } else { weight as u32 };

        Ok(ResolvedBackend { name, url, weight })
    }
}

fn default_weight() -> i64 {
    1
}
