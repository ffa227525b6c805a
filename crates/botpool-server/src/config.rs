use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::Redis
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_redis_addr")]
    pub redis_addr: String,
    #[serde(default)]
    pub redis_user: String,
    #[serde(default)]
    pub redis_pass: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_addr: default_redis_addr(),
            redis_user: String::new(),
            redis_pass: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Primary bot credential. Required; secondary credentials come from
    /// the store's token hash.
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_shard_count")]
    pub shard_count: u64,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Override the REST API root (local test servers).
    pub api_base: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            shard_count: default_shard_count(),
            gateway_url: default_gateway_url(),
            api_base: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_max_requests_5s")]
    pub max_requests_5s: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_requests_5s: default_max_requests_5s(),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0:5858".into()
}
fn default_redis_addr() -> String {
    "127.0.0.1:6379".into()
}
fn default_shard_count() -> u64 {
    1
}
fn default_gateway_url() -> String {
    botpool_gateway::DEFAULT_GATEWAY_URL.into()
}
fn default_max_workers() -> usize {
    botpool_core::DEFAULT_MAX_WORKERS
}
fn default_ack_timeout_ms() -> u64 {
    1000
}
fn default_max_requests_5s() -> i64 {
    botpool_core::rate_gate::DEFAULT_MAX_REQUESTS_5S
}

/// Generate a commented config file template with the given values filled in.
fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# botpool configuration
# Generated automatically on first run. Edit as needed.

[server]
bind_address = "{bind_address}"

[store]
# Store backend: "redis" (shared, production) or "memory" (in-process,
# single node). Rate windows and guild membership are only shared across
# instances with "redis".
backend = "{backend}"
redis_addr = "{redis_addr}"
# redis_user = ""
# redis_pass = ""

[gateway]
# Primary bot credential. Also read from the BOT_TOKEN environment variable.
bot_token = "{bot_token}"
shard_count = {shard_count}

[dispatch]
# Per-batch worker pool size (MAX_WORKERS).
max_workers = {max_workers}
# How long to wait for a capture worker's ack, in milliseconds (ACK_TIMEOUT_MS).
ack_timeout_ms = {ack_timeout_ms}
# Requests allowed per (guild, identity) pair inside one 5-second window.
max_requests_5s = {max_requests_5s}
"#,
        bind_address = config.server.bind_address,
        backend = match config.store.backend {
            StoreBackend::Redis => "redis",
            StoreBackend::Memory => "memory",
        },
        redis_addr = config.store.redis_addr,
        bot_token = config.gateway.bot_token,
        shard_count = config.gateway.shard_count,
        max_workers = config.dispatch.max_workers,
        ack_timeout_ms = config.dispatch.ack_timeout_ms,
        max_requests_5s = config.dispatch.max_requests_5s,
    )
}

// ── Config Loading ───────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!("Config file not found at '{}', generating defaults...", path);
            let config = Config::default();
            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, generate_config_template(&config))?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("BOTPOOL_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("BOTPOOL_PORT") {
            if let Ok(port) = value.parse::<u16>() {
                config.set_port(port);
            }
        }
        if let Ok(value) = std::env::var("BOTPOOL_STORE_BACKEND") {
            match value.trim().to_ascii_lowercase().as_str() {
                "redis" => config.store.backend = StoreBackend::Redis,
                "memory" => config.store.backend = StoreBackend::Memory,
                _ => {
                    tracing::warn!(
                        "Ignoring invalid BOTPOOL_STORE_BACKEND value '{}'; expected redis or memory",
                        value
                    );
                }
            }
        }
        if let Ok(value) = std::env::var("REDIS_ADDR") {
            config.store.redis_addr = value;
        }
        if let Ok(value) = std::env::var("REDIS_USER") {
            config.store.redis_user = value;
        }
        if let Ok(value) = std::env::var("REDIS_PASS") {
            config.store.redis_pass = value;
        }
        if let Ok(value) = std::env::var("BOT_TOKEN") {
            config.gateway.bot_token = value;
        }
        if let Ok(value) = std::env::var("BOTPOOL_SHARD_COUNT") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.gateway.shard_count = parsed.max(1);
            }
        }
        if let Ok(value) = std::env::var("MAX_WORKERS") {
            if let Ok(parsed) = value.parse::<usize>() {
                tracing::info!("Read from env; using MAX_WORKERS={}", parsed);
                config.dispatch.max_workers = parsed;
            }
        }
        if let Ok(value) = std::env::var("ACK_TIMEOUT_MS") {
            if let Ok(parsed) = value.parse::<u64>() {
                tracing::info!("Read from env; using ACK_TIMEOUT_MS={}", parsed);
                config.dispatch.ack_timeout_ms = parsed;
            }
        }
        if let Ok(value) = std::env::var("BOTPOOL_MAX_REQUESTS_5S") {
            if let Ok(parsed) = value.parse::<i64>() {
                config.dispatch.max_requests_5s = parsed.max(1);
            }
        }

        Ok(config)
    }

    /// Replace the port of the bind address, keeping the host.
    pub fn set_port(&mut self, port: u16) {
        let host = self
            .server
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or("0.0.0.0");
        self.server.bind_address = format!("{host}:{port}");
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, DispatchConfig, StoreBackend, StoreConfig};

    #[test]
    fn dispatch_defaults_match_the_documented_knobs() {
        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.max_workers, 8);
        assert_eq!(dispatch.ack_timeout_ms, 1000);
        assert_eq!(dispatch.max_requests_5s, 7);
    }

    #[test]
    fn store_defaults_to_redis() {
        let store = StoreConfig::default();
        assert_eq!(store.backend, StoreBackend::Redis);
    }

    #[test]
    fn set_port_keeps_the_host() {
        let mut config = Config::default();
        config.set_port(7070);
        assert_eq!(config.server.bind_address, "0.0.0.0:7070");
    }

    #[test]
    fn env_overrides_apply_on_load() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("botpool-test.toml");
        std::env::set_var("BOTPOOL_STORE_BACKEND", "memory");
        std::env::set_var("MAX_WORKERS", "3");
        std::env::set_var("ACK_TIMEOUT_MS", "250");
        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        std::env::remove_var("BOTPOOL_STORE_BACKEND");
        std::env::remove_var("MAX_WORKERS");
        std::env::remove_var("ACK_TIMEOUT_MS");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.dispatch.max_workers, 3);
        assert_eq!(config.dispatch.ack_timeout_ms, 250);
    }
}
