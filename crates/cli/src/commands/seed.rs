use ledgerly_db::{connect_with_settings, migrations, ReferenceDataset};
use serde_json::json;

use crate::commands::{load_config, runtime, CommandResult, Failure};

pub fn run(tenant: Option<&str>) -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };

    let tenant = tenant.unwrap_or(&config.database.default_tenant).to_string();
    let Some((_, url)) = config.tenant_urls().into_iter().find(|(key, _)| *key == tenant) else {
        return CommandResult::failure(
            "seed",
            "unknown_tenant",
            format!("tenant `{tenant}` is not configured"),
            2,
        );
    };

    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let guard = config.authorization.guard.clone();
    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let run_result = async {
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), 5u8))?;
            let seeded = ReferenceDataset::load(&pool, &guard)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
            let verification = ReferenceDataset::verify(&pool, &guard)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

            if !verification.all_present {
                let message = failed_checks_message(&verification.checks);
                return Err(("seed_verification", message, 6u8));
            }
            Ok::<_, Failure>(seeded)
        }
        .await;

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success_with(
            "seed",
            format!(
                "reference data loaded for tenant `{tenant}`; role `{}` holds {} permission(s)",
                seeded.role,
                seeded.permissions.len()
            ),
            Some(json!({
                "tenant": tenant,
                "guard": seeded.guard,
                "role": seeded.role,
                "permissions": seeded.permissions,
            })),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn failed_checks_message(checks: &[(String, bool)]) -> String {
    let failed = checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
        .collect::<Vec<_>>();
    if failed.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::failed_checks_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = vec![
            ("admin-user".to_string(), true),
            ("journal-setting:sales:sales income".to_string(), false),
            ("admin-permissions".to_string(), false),
        ];

        assert_eq!(
            failed_checks_message(&checks),
            "Seed verification failed for checks: journal-setting:sales:sales income, admin-permissions"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = vec![("customer".to_string(), true)];

        assert_eq!(failed_checks_message(&checks), "Some seed data failed to load");
    }
}
