//! Application configuration loaded from environment variables.

use gateways::{FalConfig, PhonePeConfig, TwilioConfig};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for text
/// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`: Postgres; without a URL the
///   in-memory store is used
/// - `PUBLIC_BASE_URL`: base for turning stored file paths into public URLs
/// - `PHONEPE_HOST_URL`, `PHONEPE_MERCHANT_ID`, `PHONEPE_SALT_KEY`,
///   `PHONEPE_SALT_INDEX`, `API_BASE_URL`: payment provider
/// - `FAL_KEY`: try-on generation provider
/// - `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_FROM_NUMBER`: SMS
///
/// A provider section is `None` when its credentials are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub public_base_url: String,
    pub phonepe: Option<PhonePeConfig>,
    pub fal: Option<FalConfig>,
    pub twilio: Option<TwilioConfig>,
}

const DEFAULT_PHONEPE_HOST: &str = "https://api-preprod.phonepe.com/apis/pg-sandbox";

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let api_base_url = var("API_BASE_URL").unwrap_or_else(|| defaults.public_base_url.clone());
        let phonepe = match (var("PHONEPE_MERCHANT_ID"), var("PHONEPE_SALT_KEY")) {
            (Some(merchant_id), Some(salt_key)) => Some(PhonePeConfig {
                host_url: var("PHONEPE_HOST_URL")
                    .unwrap_or_else(|| DEFAULT_PHONEPE_HOST.to_string()),
                merchant_id,
                salt_key,
                salt_index: var("PHONEPE_SALT_INDEX").unwrap_or_else(|| "1".to_string()),
                callback_url: format!("{}/orders/callback", api_base_url.trim_end_matches('/')),
            }),
            _ => None,
        };

        let twilio = match (
            var("TWILIO_ACCOUNT_SID"),
            var("TWILIO_AUTH_TOKEN"),
            var("TWILIO_FROM_NUMBER"),
        ) {
            (Some(account_sid), Some(auth_token), Some(from_number)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                from_number,
            }),
            _ => None,
        };

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match var("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: var("DATABASE_URL"),
            database_max_connections: var("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            public_base_url: var("PUBLIC_BASE_URL").unwrap_or(api_base_url),
            phonepe,
            fal: var("FAL_KEY").map(FalConfig::new),
            twilio,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            public_base_url: "http://localhost:3000".to_string(),
            phonepe: None,
            fal: None,
            twilio: None,
        }
    }
}
