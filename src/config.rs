use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CALENDAR_TIMEOUT_SECS: u64 = 5;

/// Application configuration, loaded from layered files plus `APP__*`
/// environment overrides.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Database connection URL (Postgres in production, SQLite in tests).
    pub database_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON-formatted logs instead of the human-readable format.
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default)]
    pub db_sqlx_logging: bool,

    /// Base URL of the calendar-sync collaborator. Unset disables outbound
    /// calendar calls entirely.
    #[serde(default)]
    pub calendar_base_url: Option<String>,

    /// Bounded per-request timeout for calendar calls; they are best-effort
    /// and must never stall an order write.
    #[serde(default = "default_calendar_timeout_secs")]
    pub calendar_timeout_secs: u64,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_calendar_timeout_secs() -> u64 {
    DEFAULT_CALENDAR_TIMEOUT_SECS
}

impl AppConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loads configuration: `config/default.toml`, then `config/{environment}.toml`,
/// then `APP__*` environment variables (e.g. `APP__DATABASE_URL`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("APP__ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let config = Config::builder()
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{environment}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    config.try_deserialize()
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("kioskops_api={level},tower_http=info");
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_fields() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"database_url":"sqlite::memory:"}"#).unwrap();
        assert_eq!(cfg.host, DEFAULT_HOST);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.db_max_connections, 10);
        assert_eq!(cfg.calendar_timeout_secs, DEFAULT_CALENDAR_TIMEOUT_SECS);
        assert!(cfg.calendar_base_url.is_none());
        assert!(!cfg.log_json);
    }

    #[test]
    fn listen_addr_joins_host_and_port() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"database_url":"sqlite::memory:","host":"0.0.0.0","port":9000}"#,
        )
        .unwrap();
        assert_eq!(cfg.listen_addr(), "0.0.0.0:9000");
    }
}
