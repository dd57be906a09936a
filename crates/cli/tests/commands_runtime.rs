use std::env;
use std::sync::{Mutex, OnceLock};

use ledgerly_cli::commands::{config, doctor, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    let directory = tempfile::tempdir().expect("tempdir");
    let url = database_url(&directory, "main.db");

    with_env(&[("LEDGERLY_DATABASE_URL", &url)], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["details"]["tenants"], serde_json::json!(["default"]));
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("LEDGERLY_DATABASE_URL", "postgres://localhost/ledgerly")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_loads_reference_data_idempotently() {
    let directory = tempfile::tempdir().expect("tempdir");
    let url = database_url(&directory, "main.db");

    with_env(&[("LEDGERLY_DATABASE_URL", &url)], || {
        let first = seed::run(None);
        assert_eq!(first.exit_code, 0, "expected first seed success: {}", first.output);
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");
        assert_eq!(first_payload["details"]["tenant"], "default");
        assert_eq!(first_payload["details"]["role"], "super admin");

        let permissions = first_payload["details"]["permissions"]
            .as_array()
            .expect("permissions array")
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>();
        assert!(permissions.contains(&"approve sales return"));
        assert!(permissions.contains(&"create sales return"));

        let second = seed::run(None);
        assert_eq!(second.exit_code, 0, "expected second seed success: {}", second.output);
        let second_payload = parse_payload(&second.output);
        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

#[test]
fn seed_rejects_unknown_tenant() {
    let directory = tempfile::tempdir().expect("tempdir");
    let url = database_url(&directory, "main.db");

    with_env(&[("LEDGERLY_DATABASE_URL", &url)], || {
        let result = seed::run(Some("acme"));
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "unknown_tenant");
    });
}

#[test]
fn doctor_flags_unmigrated_schema_until_migrate_runs() {
    let directory = tempfile::tempdir().expect("tempdir");
    let url = database_url(&directory, "main.db");

    with_env(&[("LEDGERLY_DATABASE_URL", &url)], || {
        let before = doctor::run(true);
        assert_eq!(before.exit_code, 1);
        let report = parse_payload(&before.output);
        assert_eq!(report["overall_status"], "fail");
        let schema = report["checks"]
            .as_array()
            .expect("checks array")
            .iter()
            .find(|check| check["name"] == "database_schema:default")
            .cloned()
            .expect("schema check");
        assert_eq!(schema["status"], "fail");

        assert_eq!(migrate::run().exit_code, 0);

        let after = doctor::run(true);
        assert_eq!(after.exit_code, 0, "expected passing doctor: {}", after.output);
        assert_eq!(parse_payload(&after.output)["overall_status"], "pass");
    });
}

#[test]
fn config_attributes_env_sources() {
    with_env(&[("LEDGERLY_SERVER_PORT", "9191")], || {
        let result = config::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        let port = &payload["details"]["server.port"];
        assert_eq!(port["value"], 9191);
        assert_eq!(port["source"], "env (LEDGERLY_SERVER_PORT)");
        assert_eq!(payload["details"]["authorization.guard"]["source"], "default");
    });
}

fn database_url(directory: &tempfile::TempDir, file: &str) -> String {
    format!("sqlite://{}", directory.path().join(file).display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LEDGERLY_DATABASE_URL",
        "LEDGERLY_DATABASE_DEFAULT_TENANT",
        "LEDGERLY_DATABASE_MAX_CONNECTIONS",
        "LEDGERLY_DATABASE_TIMEOUT_SECS",
        "LEDGERLY_SERVER_BIND_ADDRESS",
        "LEDGERLY_SERVER_PORT",
        "LEDGERLY_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "LEDGERLY_SERVER_LEGACY_UNAUTHORIZED_STATUS",
        "LEDGERLY_AUTHORIZATION_GUARD",
        "LEDGERLY_LEDGER_DECIMAL_SCALE",
        "LEDGERLY_LOGGING_LEVEL",
        "LEDGERLY_LOGGING_FORMAT",
        "LEDGERLY_LOG_LEVEL",
        "LEDGERLY_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
