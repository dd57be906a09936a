use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use ledgerly_core::config::AppConfig;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
}

/// One pool per tenant database, keyed by tenant name.
#[derive(Clone, Debug)]
pub struct TenantPools {
    default_tenant: String,
    pools: BTreeMap<String, DbPool>,
}

impl TenantPools {
    pub fn single(default_tenant: impl Into<String>, pool: DbPool) -> Self {
        let default_tenant = default_tenant.into();
        let mut pools = BTreeMap::new();
        pools.insert(default_tenant.clone(), pool);
        Self { default_tenant, pools }
    }

    pub async fn connect_all(config: &AppConfig) -> Result<Self, sqlx::Error> {
        let mut pools = BTreeMap::new();
        for (tenant, url) in config.tenant_urls() {
            let pool = connect_with_settings(
                &url,
                config.database.max_connections,
                config.database.timeout_secs,
            )
            .await?;
            pools.insert(tenant, pool);
        }
        Ok(Self { default_tenant: config.database.default_tenant.clone(), pools })
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>, pool: DbPool) -> Self {
        self.pools.insert(tenant.into(), pool);
        self
    }

    pub fn default_tenant(&self) -> &str {
        &self.default_tenant
    }

    pub fn default_pool(&self) -> Option<&DbPool> {
        self.pools.get(&self.default_tenant)
    }

    /// `None` selects the default tenant.
    pub fn resolve(&self, tenant: Option<&str>) -> Option<&DbPool> {
        match tenant.map(str::trim).filter(|tenant| !tenant.is_empty()) {
            Some(tenant) => self.pools.get(tenant),
            None => self.default_pool(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DbPool)> {
        self.pools.iter().map(|(tenant, pool)| (tenant.as_str(), pool))
    }
}

#[cfg(test)]
mod tests {
    use super::{connect_with_settings, TenantPools};

    #[tokio::test]
    async fn tenant_resolution_falls_back_to_default() {
        let main = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        let acme = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        let pools = TenantPools::single("default", main).with_tenant("acme", acme);

        assert!(pools.resolve(None).is_some());
        assert!(pools.resolve(Some("  ")).is_some());
        assert!(pools.resolve(Some("acme")).is_some());
        assert!(pools.resolve(Some("globex")).is_none());
        assert_eq!(pools.iter().count(), 2);
        assert_eq!(pools.default_tenant(), "default");
    }
}
