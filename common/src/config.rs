// common/src/config.rs
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use config::{Config as ConfigFile, File, Environment};

/// Central configuration for the gateway and the client driver
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub websocket_server_addr: String,
    pub identity: IdentityConfig,
    pub registry: RegistryConfig,
    pub client: ClientConfig,
}

/// Identity provider settings used to locate and check signing keys
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub region: String,
    pub user_pool_id: String,
    /// Explicit key-set URL; derived from region and pool when absent
    pub jwks_url: Option<String>,
    pub algorithm: String,
    pub fetch_timeout_ms: u64,
    pub leeway_secs: u64,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub lease_secs: u64,
    pub write_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            websocket_server_addr: "127.0.0.1:8080".to_string(),
            identity: IdentityConfig::default(),
            registry: RegistryConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            user_pool_id: String::new(),
            jwks_url: None,
            algorithm: "RS256".to_string(),
            fetch_timeout_ms: 5000,
            leeway_secs: 0,
            issuer: None,
            audience: None,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lease_secs: 3600,
            write_timeout_ms: 2000,
            max_retries: 3,
            retry_backoff_ms: 100,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/ws".to_string(),
            reconnect_delay_ms: 3000,
            max_reconnect_attempts: 5,
        }
    }
}

impl IdentityConfig {
    /// Key-set endpoint, either configured directly or derived from the user pool
    pub fn jwks_url(&self) -> String {
        match &self.jwks_url {
            Some(url) => url.clone(),
            None => format!(
                "https://cognito-idp.{}.amazonaws.com/{}/.well-known/jwks.json",
                self.region, self.user_pool_id
            ),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl RegistryConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        // Get the run mode, defaulting to "development"
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        // Locate the config directory
        let config_dir = env::var("CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                // Check if we're in the project root or a subcrate
                let mut path = PathBuf::from("./config");
                if !path.exists() {
                    path = PathBuf::from("../config");
                }
                path
            });

        tracing::info!("Loading configuration from {}", config_dir.display());
        tracing::info!("Using run mode: {}", run_mode);

        let config = ConfigFile::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", run_mode))).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // APP__REGISTRY__LEASE_SECS=600 and friends
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load from files, falling back to flat environment variables
    pub fn from_env() -> Self {
        match Self::load() {
            Ok(config) => {
                tracing::info!("Configuration loaded from files and environment");
                config
            },
            Err(e) => {
                tracing::warn!("Failed to load configuration from files: {}", e);
                tracing::info!("Falling back to environment variables only");
                Self::from_plain_env()
            },
        }
    }

    fn from_plain_env() -> Self {
        let defaults = Self::default();

        let websocket_server_addr = env::var("WEBSOCKET_SERVER_ADDR")
            .unwrap_or(defaults.websocket_server_addr);

        let identity = IdentityConfig {
            region: env::var("COGNITO_REGION")
                .or_else(|_| env::var("REGION"))
                .unwrap_or(defaults.identity.region),
            user_pool_id: env::var("COGNITO_USER_POOL_ID")
                .unwrap_or(defaults.identity.user_pool_id),
            jwks_url: env::var("JWKS_URL").ok(),
            algorithm: env::var("TOKEN_ALGORITHM")
                .unwrap_or(defaults.identity.algorithm),
            fetch_timeout_ms: parse_env("JWKS_FETCH_TIMEOUT_MS")
                .unwrap_or(defaults.identity.fetch_timeout_ms),
            leeway_secs: parse_env("TOKEN_LEEWAY_SECS")
                .unwrap_or(defaults.identity.leeway_secs),
            issuer: env::var("TOKEN_ISSUER").ok(),
            audience: env::var("TOKEN_AUDIENCE").ok(),
        };

        let registry = RegistryConfig {
            lease_secs: parse_env("CONNECTION_LEASE_SECS")
                .unwrap_or(defaults.registry.lease_secs),
            write_timeout_ms: parse_env("REGISTRY_WRITE_TIMEOUT_MS")
                .unwrap_or(defaults.registry.write_timeout_ms),
            max_retries: parse_env("REGISTRY_MAX_RETRIES")
                .unwrap_or(defaults.registry.max_retries),
            retry_backoff_ms: parse_env("REGISTRY_RETRY_BACKOFF_MS")
                .unwrap_or(defaults.registry.retry_backoff_ms),
            sweep_interval_secs: parse_env("REGISTRY_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.registry.sweep_interval_secs),
        };

        let client = ClientConfig {
            endpoint: env::var("WEBSOCKET_URL")
                .unwrap_or(defaults.client.endpoint),
            reconnect_delay_ms: parse_env("RECONNECT_DELAY_MS")
                .unwrap_or(defaults.client.reconnect_delay_ms),
            max_reconnect_attempts: parse_env("MAX_RECONNECT_ATTEMPTS")
                .unwrap_or(defaults.client.max_reconnect_attempts),
        };

        Self {
            websocket_server_addr,
            identity,
            registry,
            client,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}
