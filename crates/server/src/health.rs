use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use ledgerly_db::{DbPool, TenantPools};
use serde::Serialize;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TenantHealth {
    pub status: Readiness,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: Readiness,
    pub default_tenant: String,
    pub tenants: BTreeMap<String, TenantHealth>,
    pub checked_at: String,
}

pub fn router(tenants: TenantPools) -> Router {
    Router::new().route("/health", get(health)).with_state(tenants)
}

/// 200 while every tenant database answers, 503 otherwise.
pub async fn health(State(tenants): State<TenantPools>) -> (StatusCode, Json<HealthReport>) {
    let mut checks = BTreeMap::new();
    for (tenant, pool) in tenants.iter() {
        let check = check_tenant(pool).await;
        if check.status == Readiness::Degraded {
            warn!(
                event_name = "system.health.degraded",
                correlation_id = "health",
                tenant = %tenant,
                detail = %check.detail,
                "tenant database is not reachable"
            );
        }
        checks.insert(tenant.to_string(), check);
    }

    let ready = !checks.is_empty()
        && checks.values().all(|check| check.status == Readiness::Ready);
    let report = HealthReport {
        status: if ready { Readiness::Ready } else { Readiness::Degraded },
        default_tenant: tenants.default_tenant().to_string(),
        tenants: checks,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(report))
}

async fn check_tenant(pool: &DbPool) -> TenantHealth {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => TenantHealth { status: Readiness::Ready, detail: "query succeeded".to_string() },
        Err(error) => TenantHealth {
            status: Readiness::Degraded,
            detail: format!("query failed: {error}"),
        },
    }
}
