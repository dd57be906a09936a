use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ledgerly_core::config::AppConfig;
use serde_json::{json, Map, Value as JsonValue};
use toml::Value;

use crate::commands::{load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(result) => return result,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let sources = Sources { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    CommandResult::success_with(
        "config",
        "effective config (source precedence: env > file > default)",
        Some(JsonValue::Object(effective_entries(&config, &sources))),
    )
}

struct Sources<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

fn effective_entries(config: &AppConfig, sources: &Sources<'_>) -> Map<String, JsonValue> {
    let mut entries = Map::new();
    let mut push = |key: &str, env_key: Option<&str>, value: JsonValue| {
        let source = field_source(key, env_key, sources);
        entries.insert(key.to_string(), json!({ "value": value, "source": source }));
    };

    push("database.url", Some("LEDGERLY_DATABASE_URL"), json!(config.database.url));
    push(
        "database.default_tenant",
        Some("LEDGERLY_DATABASE_DEFAULT_TENANT"),
        json!(config.database.default_tenant),
    );
    push(
        "database.max_connections",
        Some("LEDGERLY_DATABASE_MAX_CONNECTIONS"),
        json!(config.database.max_connections),
    );
    push(
        "database.timeout_secs",
        Some("LEDGERLY_DATABASE_TIMEOUT_SECS"),
        json!(config.database.timeout_secs),
    );
    for (tenant, tenant_config) in &config.tenants {
        push(&format!("tenants.{tenant}.url"), None, json!(tenant_config.url));
    }

    push(
        "server.bind_address",
        Some("LEDGERLY_SERVER_BIND_ADDRESS"),
        json!(config.server.bind_address),
    );
    push("server.port", Some("LEDGERLY_SERVER_PORT"), json!(config.server.port));
    push(
        "server.graceful_shutdown_secs",
        Some("LEDGERLY_SERVER_GRACEFUL_SHUTDOWN_SECS"),
        json!(config.server.graceful_shutdown_secs),
    );
    push(
        "server.legacy_unauthorized_status",
        Some("LEDGERLY_SERVER_LEGACY_UNAUTHORIZED_STATUS"),
        json!(config.server.legacy_unauthorized_status),
    );

    push(
        "authorization.guard",
        Some("LEDGERLY_AUTHORIZATION_GUARD"),
        json!(config.authorization.guard),
    );
    push(
        "ledger.decimal_scale",
        Some("LEDGERLY_LEDGER_DECIMAL_SCALE"),
        json!(config.ledger.decimal_scale),
    );

    push("logging.level", Some("LEDGERLY_LOGGING_LEVEL"), json!(config.logging.level));
    push("logging.format", Some("LEDGERLY_LOGGING_FORMAT"), json!(config.logging.format));

    entries
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("ledgerly.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/ledgerly.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, env_key: Option<&str>, sources: &Sources<'_>) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = sources.doc {
        if contains_path(doc, key_path) {
            let file_path = sources
                .path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{contains_path, field_source, Sources};

    #[test]
    fn file_source_wins_over_default_for_present_keys() {
        let doc: toml::Value = "[server]\nport = 9090\n".parse().expect("toml");
        let sources = Sources { doc: Some(&doc), path: Some(Path::new("ledgerly.toml")) };

        assert!(contains_path(&doc, "server.port"));
        assert!(!contains_path(&doc, "server.bind_address"));
        assert_eq!(field_source("server.port", None, &sources), "file (ledgerly.toml)");
        assert_eq!(field_source("server.bind_address", None, &sources), "default");
    }
}
