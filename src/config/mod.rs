use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;
use crate::storage::{SameSite, StorageLocation};

/// Default experiment service endpoint.
pub const DEFAULT_BASE_URL: &str = "https://ab.cnstrc.com";

/// Application configuration.
///
/// [`Config::default`] gives the library defaults; [`Config::from_env`]
/// applies environment overrides on top of them.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub service: ServiceConfig,
    pub request: RequestConfig,
    pub identity: IdentityConfig,
    pub cookies: CookieConfig,
    pub experiments: ExperimentConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Remote experiment service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Static IP forwarded with every request (server-side callers).
    pub ip_address: Option<String>,
    /// Static User-Agent; in a page context the platform's agent is used otherwise.
    pub user_agent: Option<String>,
}

/// Request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    /// Probability of reporting participate latency after a successful call.
    pub telemetry_sample_rate: f64,
}

/// Visitor and session identity configuration
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub persist: bool,
    /// Caller-supplied visitor id; skips all storage interaction.
    pub client_id: Option<String>,
    /// Caller-supplied session id; skips session resolution.
    pub session_id: Option<u64>,
    pub client_id_storage: StorageLocation,
    pub session_id_storage: StorageLocation,
    pub cookie_name_client_id: String,
    pub cookie_name_session_id: String,
    pub cookie_name_session_data: String,
    /// Client id cookie written by older releases.
    pub legacy_cookie_name_client_id: String,
    pub local_name_client_id: String,
    pub local_name_session_id: String,
    pub local_name_session_data: String,
}

/// Cookie attribute configuration
#[derive(Debug, Clone)]
pub struct CookieConfig {
    /// Explicit cookie domain. When unset the page's root domain is inferred.
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: Option<SameSite>,
    pub days_to_live: u32,
}

/// Experiment participation configuration
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    /// Prefix of the per-experiment cache key.
    pub cookie_prefix: String,
    /// Prefix of the `{prefix}-force-{experiment}` query parameter.
    pub force_prefix: String,
    pub storage: StorageLocation,
}

/// Persistent local store configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Config::default();

        let service = ServiceConfig {
            base_url: env_string("AB_BASE_URL").unwrap_or(defaults.service.base_url),
            ip_address: env_string("AB_IP_ADDRESS"),
            user_agent: env_string("AB_USER_AGENT"),
        };

        let request = RequestConfig {
            timeout_ms: env_parse("AB_TIMEOUT_MS").unwrap_or(defaults.request.timeout_ms),
            telemetry_sample_rate: env_parse::<f64>("AB_TELEMETRY_SAMPLE_RATE")
                .map(|rate| rate.clamp(0.0, 1.0))
                .unwrap_or(defaults.request.telemetry_sample_rate),
        };

        let identity = IdentityConfig {
            persist: env_bool("AB_PERSIST").unwrap_or(defaults.identity.persist),
            client_id: env_string("AB_CLIENT_ID"),
            session_id: env_parse("AB_SESSION_ID"),
            client_id_storage: env_location("AB_CLIENT_ID_STORAGE")?
                .unwrap_or(defaults.identity.client_id_storage),
            session_id_storage: env_location("AB_SESSION_ID_STORAGE")?
                .unwrap_or(defaults.identity.session_id_storage),
            ..defaults.identity
        };

        let same_site = match env_string("AB_COOKIE_SAMESITE") {
            Some(value) => Some(SameSite::from_str(&value).map_err(|message| AppError::Config {
                message,
            })?),
            None => None,
        };

        let cookies = CookieConfig {
            domain: env_string("AB_COOKIE_DOMAIN"),
            secure: env_bool("AB_COOKIE_SECURE").unwrap_or(defaults.cookies.secure),
            same_site,
            days_to_live: env_parse("AB_COOKIE_DAYS_TO_LIVE")
                .unwrap_or(defaults.cookies.days_to_live),
        };

        let experiments = ExperimentConfig {
            cookie_prefix: env_string("AB_EXPERIMENT_PREFIX")
                .unwrap_or(defaults.experiments.cookie_prefix),
            force_prefix: env_string("AB_FORCE_PREFIX")
                .unwrap_or(defaults.experiments.force_prefix),
            storage: defaults.experiments.storage,
        };

        let database = DatabaseConfig {
            path: env_string("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database.path),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.database.max_connections),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        Ok(Config {
            service,
            request,
            identity,
            cookies,
            experiments,
            database,
            logging,
        })
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).and_then(|s| match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn env_location(key: &str) -> Result<Option<StorageLocation>, AppError> {
    env_string(key)
        .map(|value| {
            StorageLocation::from_str(&value).map_err(|message| AppError::Config {
                message: format!("{}: {}", key, message),
            })
        })
        .transpose()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ip_address: None,
            user_agent: None,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            telemetry_sample_rate: 0.01,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            persist: true,
            client_id: None,
            session_id: None,
            client_id_storage: StorageLocation::Cookie,
            session_id_storage: StorageLocation::Local,
            cookie_name_client_id: "ConstructorioID_client_id".to_string(),
            cookie_name_session_id: "ConstructorioID_session_id".to_string(),
            cookie_name_session_data: "ConstructorioID_session".to_string(),
            legacy_cookie_name_client_id: "ConstructorioAB_client_id".to_string(),
            local_name_client_id: "_constructorio_search_client_id".to_string(),
            local_name_session_id: "_constructorio_search_session_id".to_string(),
            local_name_session_data: "_constructorio_search_session".to_string(),
        }
    }
}

impl IdentityConfig {
    /// Key holding the client id in the given location.
    pub fn client_id_key(&self, location: StorageLocation) -> &str {
        match location {
            StorageLocation::Cookie => &self.cookie_name_client_id,
            StorageLocation::Local => &self.local_name_client_id,
        }
    }

    /// Key holding the bare session id integer in the given location.
    pub fn session_id_key(&self, location: StorageLocation) -> &str {
        match location {
            StorageLocation::Cookie => &self.cookie_name_session_id,
            StorageLocation::Local => &self.local_name_session_id,
        }
    }

    /// Key holding the session record in the given location.
    pub fn session_data_key(&self, location: StorageLocation) -> &str {
        match location {
            StorageLocation::Cookie => &self.cookie_name_session_data,
            StorageLocation::Local => &self.local_name_session_data,
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            domain: None,
            secure: false,
            same_site: None,
            days_to_live: 365,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            cookie_prefix: "ConstructorioAB_experiment_".to_string(),
            force_prefix: "ConstructorioAB".to_string(),
            storage: StorageLocation::Cookie,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/abtest.db"),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
