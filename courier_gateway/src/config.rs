//! Gateway configuration.
//!
//! The backend list is the interesting part: `COURIER_RELAY_BACKENDS` holds a comma-separated list
//! of `name=ws://host:port/path` entries. Each name becomes addressable as `GET /ws/{name}` and a
//! member of the fan-in set served at `GET /ws`. Malformed entries are skipped with a logged
//! complaint rather than refusing to start.
use std::env;

use log::*;

const DEFAULT_GATEWAY_HOST: &str = "127.0.0.1";
const DEFAULT_GATEWAY_PORT: u16 = 8481;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub backends: Vec<BackendConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { host: DEFAULT_GATEWAY_HOST.to_string(), port: DEFAULT_GATEWAY_PORT, backends: Vec::new() }
    }
}

impl GatewayConfig {
    pub fn from_env_or_default() -> Self {
        let host = env::var("COURIER_GATEWAY_HOST").ok().unwrap_or_else(|| DEFAULT_GATEWAY_HOST.into());
        let port = env::var("COURIER_GATEWAY_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for COURIER_GATEWAY_PORT. {e} Using the default, \
                         {DEFAULT_GATEWAY_PORT}, instead."
                    );
                    DEFAULT_GATEWAY_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_GATEWAY_PORT);
        let backends = match env::var("COURIER_RELAY_BACKENDS") {
            Ok(s) => parse_backends(&s),
            Err(_) => {
                warn!("🪛️ COURIER_RELAY_BACKENDS is not set. The gateway will run with no relay targets.");
                Vec::new()
            },
        };
        Self { host, port, backends }
    }

    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }
}

/// Parses a `name=url` comma-separated list. Entries without a `=`, or with an empty name or url,
/// are skipped. Duplicate names keep the first entry.
pub fn parse_backends(spec: &str) -> Vec<BackendConfig> {
    let mut backends: Vec<BackendConfig> = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((name, url)) = entry.split_once('=') else {
            error!("🪛️ Relay backend entry '{entry}' is not of the form name=url. Skipping it.");
            continue;
        };
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            error!("🪛️ Relay backend entry '{entry}' has an empty name or url. Skipping it.");
            continue;
        }
        if backends.iter().any(|b| b.name == name) {
            warn!("🪛️ Relay backend '{name}' is defined more than once. Keeping the first definition.");
            continue;
        }
        backends.push(BackendConfig { name: name.to_string(), url: url.to_string() });
    }
    backends
}
