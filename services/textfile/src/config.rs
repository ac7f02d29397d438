use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the text file service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Validate-user service configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Storage retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name reported by the health endpoint and in logs
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Database configuration
///
/// Either `url` is set, or the connection is described by the individual
/// host/port/name/user/password fields.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Full PostgreSQL connection URL, takes precedence over the parts below
    pub url: Option<String>,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default = "default_db_password")]
    pub password: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Pool acquire timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Upper bound for handling a single request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Largest accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Configuration of the external validate-user service
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the validate-user service, takes precedence over host/port
    pub validate_user_url: Option<String>,
    #[serde(default = "default_validate_user_host")]
    pub service_host: String,
    #[serde(default = "default_validate_user_port")]
    pub service_port: u16,
    /// Timeout for a single authorization call in seconds
    #[serde(default = "default_auth_timeout_secs")]
    pub timeout_secs: u64,
}

/// Retry policy for storage operations
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    /// Upper bound for a single attempt in seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "ortelius-ms-textfile-crud".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "postgres".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_password() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    5002
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_validate_user_host() -> String {
    "127.0.0.1".to_string()
}

fn default_validate_user_port() -> u16 {
    80
}

fn default_auth_timeout_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_attempt_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/textfile").required(false))
            .add_source(config::File::with_name("/etc/textfile/textfile").required(false))
            // TEXTFILE__DATABASE__HOST -> database.host
            .add_source(
                config::Environment::with_prefix("TEXTFILE")
                    .separator("__")
                    .try_parsing(true),
            )
            // Variables understood by existing deployments
            .set_override_option("database.host", env_var("DB_HOST"))?
            .set_override_option("database.port", env_var("DB_PORT"))?
            .set_override_option("database.name", env_var("DB_NAME"))?
            .set_override_option("database.user", env_var("DB_USER"))?
            .set_override_option("database.password", env_var("DB_PASS"))?
            .set_override_option("auth.validate_user_url", env_var("VALIDATEUSER_URL"))?
            .set_override_option(
                "auth.service_host",
                env_var("MS_VALIDATE_USER_SERVICE_HOST"),
            )?
            .set_override_option(
                "auth.service_port",
                env_var("MS_VALIDATE_USER_SERVICE_PORT"),
            )?
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigValidationError::MissingField("service.name".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "database.max_connections".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue {
                field: "database.min_connections".to_string(),
                message: "must not exceed database.max_connections".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.auth.timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "auth.timeout_secs".to_string(),
                message: "authorization calls must be bounded".to_string(),
            });
        }

        if self.api.max_body_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.max_body_bytes".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        // A request that outlives the API deadline never reports its storage error
        let budget = self.request_budget();
        if self.api.request_timeout() <= budget {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.request_timeout_secs".to_string(),
                message: format!(
                    "must exceed the authorization timeout plus every storage attempt and delay ({budget:?})"
                ),
            });
        }

        Ok(())
    }

    /// Longest a read or write can take before it resolves on its own
    pub fn request_budget(&self) -> Duration {
        let attempts = self.retry.max_attempts;
        self.auth.timeout()
            + self.retry.attempt_timeout() * attempts
            + self.retry.delay() * attempts.saturating_sub(1)
    }
}

impl DatabaseConfig {
    /// Get pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl ApiConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AuthConfig {
    /// Base URL of the validate-user service
    pub fn base_url(&self) -> String {
        match &self.validate_user_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.service_host, self.service_port),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_db_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: default_db_password(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            validate_user_url: None,
            service_host: default_validate_user_host(),
            service_port: default_validate_user_port(),
            timeout_secs: default_auth_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
