use ledgerly_core::config::{AppConfig, LoadOptions};
use ledgerly_db::{connect_with_settings, migrations::MIGRATOR, DbPool};
use serde::Serialize;

use crate::commands::{runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: impl Into<String>, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name: name.into(), status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.extend(check_tenants(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            checks.push(DoctorCheck::new(
                "database_connectivity",
                CheckStatus::Skipped,
                "skipped because configuration did not load",
            ));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_tenants(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match runtime("doctor") {
        Ok(runtime) => runtime,
        Err(result) => {
            let check = DoctorCheck::new("database_connectivity", CheckStatus::Fail, result.output);
            return vec![check];
        }
    };

    runtime.block_on(async {
        let mut checks = Vec::new();
        for (tenant, url) in config.tenant_urls() {
            let connectivity = format!("database_connectivity:{tenant}");
            let schema = format!("database_schema:{tenant}");
            match connect_with_settings(
                &url,
                config.database.max_connections,
                config.database.timeout_secs,
            )
            .await
            {
                Ok(pool) => {
                    checks.push(DoctorCheck::new(
                        connectivity,
                        CheckStatus::Pass,
                        format!("connected using `{url}`"),
                    ));
                    checks.push(schema_check(schema, &pool).await);
                    pool.close().await;
                }
                Err(error) => {
                    checks.push(DoctorCheck::new(
                        connectivity,
                        CheckStatus::Fail,
                        format!("failed to connect to database: {error}"),
                    ));
                    checks.push(DoctorCheck::new(
                        schema,
                        CheckStatus::Skipped,
                        "skipped because the database is unreachable",
                    ));
                }
            }
        }
        checks
    })
}

async fn schema_check(name: String, pool: &DbPool) -> DoctorCheck {
    let expected =
        MIGRATOR.iter().filter(|migration| migration.migration_type.is_up_migration()).count()
            as i64;
    let applied = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(1) FROM _sqlx_migrations WHERE success = 1",
    )
    .fetch_one(pool)
    .await;

    match applied {
        Ok(applied) if applied >= expected => {
            DoctorCheck::new(name, CheckStatus::Pass, format!("{applied} migration(s) applied"))
        }
        Ok(applied) => DoctorCheck::new(
            name,
            CheckStatus::Fail,
            format!("{applied} of {expected} migration(s) applied; run `ledgerly migrate`"),
        ),
        Err(_) => DoctorCheck::new(
            name,
            CheckStatus::Fail,
            "schema is not migrated; run `ledgerly migrate`",
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
