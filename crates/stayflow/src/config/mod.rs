use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::{EngineSettings, Pricing, RetryPolicy};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let json = env::var("APP_LOG_FORMAT")
            .map(|value| value.trim().eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let tick_secs = parse_var("STAYFLOW_TICK_SECS", 60u64)?;
        if tick_secs == 0 {
            return Err(ConfigError::InvalidNumber {
                name: "STAYFLOW_TICK_SECS",
            });
        }
        let retry_attempts = parse_var("STAYFLOW_RETRY_ATTEMPTS", 5u32)?;
        if retry_attempts == 0 {
            return Err(ConfigError::InvalidNumber {
                name: "STAYFLOW_RETRY_ATTEMPTS",
            });
        }
        let retry_base_ms = parse_var("STAYFLOW_RETRY_BASE_MS", 25u64)?;
        let store_path = env::var("STAYFLOW_STORE_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level, json },
            engine: EngineConfig {
                tick_every: Duration::from_secs(tick_secs),
                retry_attempts,
                retry_base_delay: Duration::from_millis(retry_base_ms),
                store_path,
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { name }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Emit JSON lines instead of the compact text format.
    pub json: bool,
}

/// Scheduler cadence, conflict retries, and where the store lives.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_every: Duration,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    /// JSON file backing the store; in-memory when unset.
    pub store_path: Option<PathBuf>,
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        let defaults = RetryPolicy::default();
        EngineSettings {
            pricing: Pricing::default(),
            retry: RetryPolicy {
                max_attempts: self.retry_attempts,
                base_delay: self.retry_base_delay,
                max_delay: defaults.max_delay.max(self.retry_base_delay),
            },
            tick_every: self.tick_every,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name } => {
                write!(f, "{name} must be a positive whole number")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
