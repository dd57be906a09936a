use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::money::MAX_DECIMAL_SCALE;

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub tenants: BTreeMap<String, TenantConfig>,
    pub server: ServerConfig,
    pub authorization: AuthorizationConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub default_tenant: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub url: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    /// Report missing permissions as 500 instead of 403, for existing clients.
    pub legacy_unauthorized_status: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuthorizationConfig {
    pub guard: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LedgerConfig {
    pub decimal_scale: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://ledgerly.db".to_string(),
                default_tenant: "default".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            tenants: BTreeMap::new(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                legacy_unauthorized_status: true,
            },
            authorization: AuthorizationConfig { guard: "api".to_string() },
            ledger: LedgerConfig { decimal_scale: MAX_DECIMAL_SCALE },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("ledgerly.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Every tenant key with its database URL, the default tenant first.
    pub fn tenant_urls(&self) -> Vec<(String, String)> {
        let mut urls = vec![(self.database.default_tenant.clone(), self.database.url.clone())];
        urls.extend(
            self.tenants
                .iter()
                .filter(|(key, _)| **key != self.database.default_tenant)
                .map(|(key, tenant)| (key.clone(), tenant.url.clone())),
        );
        urls
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(default_tenant) = database.default_tenant {
                self.database.default_tenant = default_tenant;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(tenants) = patch.tenants {
            self.tenants.extend(tenants);
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(legacy) = server.legacy_unauthorized_status {
                self.server.legacy_unauthorized_status = legacy;
            }
        }

        if let Some(guard) = patch.authorization.and_then(|authorization| authorization.guard) {
            self.authorization.guard = guard;
        }

        if let Some(decimal_scale) = patch.ledger.and_then(|ledger| ledger.decimal_scale) {
            self.ledger.decimal_scale = decimal_scale;
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEDGERLY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEDGERLY_DATABASE_DEFAULT_TENANT") {
            self.database.default_tenant = value;
        }
        if let Some(value) = read_env("LEDGERLY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEDGERLY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEDGERLY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEDGERLY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEDGERLY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEDGERLY_SERVER_PORT") {
            self.server.port = parse_u16("LEDGERLY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEDGERLY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEDGERLY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("LEDGERLY_SERVER_LEGACY_UNAUTHORIZED_STATUS") {
            self.server.legacy_unauthorized_status =
                parse_bool("LEDGERLY_SERVER_LEGACY_UNAUTHORIZED_STATUS", &value)?;
        }

        if let Some(value) = read_env("LEDGERLY_AUTHORIZATION_GUARD") {
            self.authorization.guard = value;
        }
        if let Some(value) = read_env("LEDGERLY_LEDGER_DECIMAL_SCALE") {
            self.ledger.decimal_scale = parse_u32("LEDGERLY_LEDGER_DECIMAL_SCALE", &value)?;
        }

        let log_level =
            read_env("LEDGERLY_LOGGING_LEVEL").or_else(|| read_env("LEDGERLY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEDGERLY_LOGGING_FORMAT").or_else(|| read_env("LEDGERLY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_tenants(&self.tenants)?;
        validate_server(&self.server)?;
        validate_authorization(&self.authorization)?;
        validate_ledger(&self.ledger)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("ledgerly.toml"), PathBuf::from("config/ledgerly.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_sqlite_url(url: &str) -> bool {
    let url = url.trim();
    url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:"
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    if !is_sqlite_url(&database.url) {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.default_tenant.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database.default_tenant must not be empty".to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_tenants(tenants: &BTreeMap<String, TenantConfig>) -> Result<(), ConfigError> {
    for (key, tenant) in tenants {
        if key.trim().is_empty() {
            return Err(ConfigError::Validation("tenant keys must not be empty".to_string()));
        }
        if !is_sqlite_url(&tenant.url) {
            return Err(ConfigError::Validation(format!(
                "tenants.{key}.url must be a sqlite URL"
            )));
        }
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_authorization(authorization: &AuthorizationConfig) -> Result<(), ConfigError> {
    if authorization.guard.trim().is_empty() {
        return Err(ConfigError::Validation(
            "authorization.guard must not be empty (permissions are looked up per guard, e.g. `api`)"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_ledger(ledger: &LedgerConfig) -> Result<(), ConfigError> {
    if ledger.decimal_scale > MAX_DECIMAL_SCALE {
        return Err(ConfigError::Validation(format!(
            "ledger.decimal_scale must be in range 0..={MAX_DECIMAL_SCALE}"
        )));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    tenants: Option<BTreeMap<String, TenantConfig>>,
    server: Option<ServerPatch>,
    authorization: Option<AuthorizationPatch>,
    ledger: Option<LedgerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    default_tenant: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    legacy_unauthorized_status: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthorizationPatch {
    guard: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerPatch {
    decimal_scale: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
