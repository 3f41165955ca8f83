use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub verifier_url: String,
    pub verifier_timeout: Duration,
    pub verifier_key: Option<String>,
    pub allowed_origin: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "1111"),
            store_backend: try_load("STORE_BACKEND", "redis"),
            redis_url: try_load("REDIS_URL", "redis://redis:6379"),
            verifier_url: try_load("VERIFIER_URL", "http://auth:9099/verify"),
            verifier_timeout: Duration::from_millis(try_load("VERIFIER_TIMEOUT_MS", "2000")),
            verifier_key: read_secret("VERIFIER_API_KEY"),
            allowed_origin: try_load("ALLOWED_ORIGIN", "*"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

// Optional: the verifier may sit on a private network without a key.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            info!("No {secret_name} secret loaded: {e}");
        })
        .ok()
        .filter(|s| !s.is_empty())
}
