//! Server configuration.
//!
//! Everything is read from environment variables (a `.env` file is honoured). Invalid values fall
//! back to the defaults with a logged complaint rather than refusing to start.
use std::{env, time::Duration};

use courier_engine::DeliveryWindow;
use log::*;

const DEFAULT_COURIER_HOST: &str = "127.0.0.1";
const DEFAULT_COURIER_PORT: u16 = 8480;
const DEFAULT_DELIVERY_MIN: Duration = Duration::from_secs(60);
const DEFAULT_DELIVERY_MAX: Duration = Duration::from_secs(120);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// The bounds for the simulated delivery delay between assignment and completion.
    pub delivery_window: DeliveryWindow,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_COURIER_HOST.to_string(),
            port: DEFAULT_COURIER_PORT,
            database_url: String::default(),
            delivery_window: DeliveryWindow::new(DEFAULT_DELIVERY_MIN, DEFAULT_DELIVERY_MAX),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("COURIER_HOST").ok().unwrap_or_else(|| DEFAULT_COURIER_HOST.into());
        let port = env::var("COURIER_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for COURIER_PORT. {e} Using the default, {DEFAULT_COURIER_PORT}, \
                         instead."
                    );
                    DEFAULT_COURIER_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_COURIER_PORT);
        let database_url = env::var("COURIER_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ COURIER_DATABASE_URL is not set. Please set it to the URL for the dispatch database.");
            String::default()
        });
        let min = duration_from_env("COURIER_DELIVERY_MIN_SECS", DEFAULT_DELIVERY_MIN);
        let max = duration_from_env("COURIER_DELIVERY_MAX_SECS", DEFAULT_DELIVERY_MAX);
        Self { host, port, database_url, delivery_window: DeliveryWindow::new(min, max) }
    }
}

fn duration_from_env(var: &str, default: Duration) -> Duration {
    match env::var(var) {
        Ok(s) => match s.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(e) => {
                error!("🪛️ {s} is not a valid number of seconds for {var}. {e} Using {default:?} instead.");
                default
            },
        },
        Err(_) => default,
    }
}
