use ledgerly_core::config::{AppConfig, ConfigError};
use ledgerly_db::{migrations, TenantPools};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub tenants: TenantPools,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed for tenant `{tenant}`: {source}")]
    Migration {
        tenant: String,
        #[source]
        source: sqlx::migrate::MigrateError,
    },
}

/// Connects every configured tenant and brings each schema up to date.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        tenants = config.tenant_urls().len(),
        "starting application bootstrap"
    );

    let tenants =
        TenantPools::connect_all(&config).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        default_tenant = %tenants.default_tenant(),
        "tenant databases connected"
    );

    for (tenant, pool) in tenants.iter() {
        migrations::run_pending(pool).await.map_err(|source| BootstrapError::Migration {
            tenant: tenant.to_string(),
            source,
        })?;
        info!(
            event_name = "system.bootstrap.migrations_applied",
            correlation_id = "bootstrap",
            tenant = %tenant,
            "database migrations applied"
        );
    }

    Ok(Application { config, tenants })
}
