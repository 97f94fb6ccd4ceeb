use rust_decimal::Decimal;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

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
    pub dispatch: DispatchConfig,
    pub storage: StorageConfig,
    pub sms: Option<SmsGatewayConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
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

        let log_level = env::var("OUTREACH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let default_country_code =
            env::var("OUTREACH_DEFAULT_COUNTRY_CODE").unwrap_or_else(|_| "1".to_string());
        let default_country_code = default_country_code.trim().trim_start_matches('+').to_string();
        if default_country_code.is_empty()
            || default_country_code.len() > 3
            || !default_country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ConfigError::InvalidCountryCode(default_country_code));
        }

        let dispatch = DispatchConfig {
            max_concurrency: parse_positive("OUTREACH_MAX_CONCURRENCY", 4)?,
            chunk_size: parse_positive("OUTREACH_CHUNK_SIZE", 100)?,
            send_timeout: Duration::from_millis(parse_positive(
                "OUTREACH_SEND_TIMEOUT_MS",
                10_000,
            )? as u64),
            default_country_code,
        };

        let storage = StorageConfig {
            ledger_path: optional_path("OUTREACH_LEDGER_PATH"),
            roster_path: optional_path("OUTREACH_ROSTER_PATH"),
            templates_path: optional_path("OUTREACH_TEMPLATES_PATH"),
        };

        let sms = match optional_var("SMS_GATEWAY_URL") {
            Some(base_url) => Some(SmsGatewayConfig {
                base_url,
                api_key: optional_var("SMS_API_KEY").unwrap_or_default(),
                sender_id: optional_var("SMS_SENDER_ID")
                    .unwrap_or_else(|| "CHURCH".to_string()),
                cost_per_segment: parse_decimal("SMS_COST_PER_SEGMENT", Decimal::new(5, 2))?,
                max_batch_size: parse_positive("SMS_MAX_BATCH_SIZE", 50)?,
            }),
            None => None,
        };

        let whatsapp = match optional_var("WHATSAPP_API_URL") {
            Some(base_url) => Some(WhatsAppConfig {
                base_url,
                access_token: optional_var("WHATSAPP_ACCESS_TOKEN").unwrap_or_default(),
                phone_number_id: optional_var("WHATSAPP_PHONE_NUMBER_ID")
                    .ok_or(ConfigError::MissingVar("WHATSAPP_PHONE_NUMBER_ID"))?,
                cost_per_message: parse_decimal(
                    "WHATSAPP_COST_PER_MESSAGE",
                    Decimal::new(8, 3),
                )?,
            }),
            None => None,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            dispatch,
            storage,
            sms,
            whatsapp,
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn optional_path(name: &str) -> Option<PathBuf> {
    optional_var(name).map(PathBuf::from)
}

fn parse_positive(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match optional_var(name) {
        None => Ok(default),
        Some(raw) => match raw.parse::<usize>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ConfigError::InvalidNumber { var: name, value: raw }),
        },
    }
}

fn parse_decimal(name: &'static str, default: Decimal) -> Result<Decimal, ConfigError> {
    match optional_var(name) {
        None => Ok(default),
        Some(raw) => match Decimal::from_str(&raw) {
            Ok(value) if !value.is_sign_negative() => Ok(value),
            _ => Err(ConfigError::InvalidDecimal { var: name, value: raw }),
        },
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

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Limits applied by the batch dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_concurrency: usize,
    pub chunk_size: usize,
    pub send_timeout: Duration,
    pub default_country_code: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            chunk_size: 100,
            send_timeout: Duration::from_secs(10),
            default_country_code: "1".to_string(),
        }
    }
}

/// Optional file locations for the ledger journal, member roster, and stored templates.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub ledger_path: Option<PathBuf>,
    pub roster_path: Option<PathBuf>,
    pub templates_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SmsGatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub sender_id: String,
    pub cost_per_segment: Decimal,
    pub max_batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub base_url: String,
    pub access_token: String,
    pub phone_number_id: String,
    pub cost_per_message: Decimal,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { var: &'static str, value: String },
    InvalidDecimal { var: &'static str, value: String },
    InvalidCountryCode(String),
    MissingVar(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "{var} must be a positive integer (got '{value}')")
            }
            ConfigError::InvalidDecimal { var, value } => {
                write!(f, "{var} must be a non-negative decimal (got '{value}')")
            }
            ConfigError::InvalidCountryCode(value) => write!(
                f,
                "OUTREACH_DEFAULT_COUNTRY_CODE must be 1-3 digits (got '{value}')"
            ),
            ConfigError::MissingVar(var) => write!(f, "{var} must be set"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
