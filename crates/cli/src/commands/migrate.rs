use ledgerly_db::{connect_with_settings, migrations};
use serde_json::json;

use crate::commands::{load_config, runtime, CommandResult, Failure};

pub fn run() -> CommandResult {
    let config = match load_config("migrate") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("migrate") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let mut migrated = Vec::new();
        for (tenant, url) in config.tenant_urls() {
            let pool = connect_with_settings(
                &url,
                config.database.max_connections,
                config.database.timeout_secs,
            )
            .await
            .map_err(|error| ("db_connectivity", format!("tenant `{tenant}`: {error}"), 4u8))?;
            let outcome = migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", format!("tenant `{tenant}`: {error}"), 5u8));
            pool.close().await;
            outcome?;
            migrated.push(tenant);
        }
        Ok::<Vec<String>, Failure>(migrated)
    });

    match result {
        Ok(tenants) => CommandResult::success_with(
            "migrate",
            format!("applied pending migrations to {} tenant(s)", tenants.len()),
            Some(json!({ "tenants": tenants })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
