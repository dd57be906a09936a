use async_trait::async_trait;
use sqlx::Row;

use ledgerly_core::approvals::StoreError;
use ledgerly_core::domain::ActorId;
use ledgerly_core::permissions::PermissionGate;

use super::RepositoryError;
use crate::DbPool;

pub const USER_MODEL_TYPE: &str = "User";

/// Role-based permission lookup over `permissions`, `roles`, `role_has_permissions`
/// and `model_has_roles`.
#[derive(Clone)]
pub struct SqlPermissionGate {
    pool: DbPool,
}

impl SqlPermissionGate {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_permission(&self, name: &str, guard: &str) -> Result<i64, RepositoryError> {
        ensure_named(&self.pool, "permissions", name, guard).await
    }

    pub async fn ensure_role(&self, name: &str, guard: &str) -> Result<i64, RepositoryError> {
        ensure_named(&self.pool, "roles", name, guard).await
    }

    pub async fn give_permission_to_role(
        &self,
        role_id: i64,
        permission_id: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT OR IGNORE INTO role_has_permissions (permission_id, role_id) VALUES (?, ?)",
        )
        .bind(permission_id)
        .bind(role_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn assign_role(&self, actor: ActorId, role_id: i64) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT OR IGNORE INTO model_has_roles (role_id, model_type, model_id) VALUES (?, ?, ?)",
        )
        .bind(role_id)
        .bind(USER_MODEL_TYPE)
        .bind(actor.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_roles(&self, actor: ActorId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM model_has_roles WHERE model_type = ? AND model_id = ?")
            .bind(USER_MODEL_TYPE)
            .bind(actor.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn lookup(
        &self,
        actor: ActorId,
        permission: &str,
        guard: &str,
    ) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS granted
             FROM permissions p
             JOIN role_has_permissions rp ON rp.permission_id = p.id
             JOIN roles r ON r.id = rp.role_id
             JOIN model_has_roles mr ON mr.role_id = r.id
             WHERE p.name = ? AND p.guard_name = ? AND r.guard_name = ?
               AND mr.model_type = ? AND mr.model_id = ?",
        )
        .bind(permission)
        .bind(guard)
        .bind(guard)
        .bind(USER_MODEL_TYPE)
        .bind(actor.0)
        .fetch_one(&self.pool)
        .await?;

        let granted: i64 =
            row.try_get("granted").map_err(|e| RepositoryError::Decode(e.to_string()))?;
        Ok(granted > 0)
    }
}

async fn ensure_named(
    pool: &DbPool,
    table: &str,
    name: &str,
    guard: &str,
) -> Result<i64, RepositoryError> {
    let insert = format!("INSERT OR IGNORE INTO {table} (name, guard_name) VALUES (?, ?)");
    sqlx::query(&insert).bind(name).bind(guard).execute(pool).await?;

    let select = format!("SELECT id FROM {table} WHERE name = ? AND guard_name = ?");
    let row = sqlx::query(&select).bind(name).bind(guard).fetch_one(pool).await?;
    row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))
}

#[async_trait]
impl PermissionGate for SqlPermissionGate {
    async fn has_permission(
        &self,
        actor: ActorId,
        permission: &str,
        guard: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.lookup(actor, permission, guard).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::SqlPermissionGate;
    use crate::{connect_with_settings, migrations};
    use ledgerly_core::domain::ActorId;
    use ledgerly_core::permissions::PermissionGate;

    #[tokio::test]
    async fn permissions_flow_through_roles_per_guard() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let gate = SqlPermissionGate::new(pool);

        let approve = gate.ensure_permission("approve sales return", "api").await.expect("perm");
        let again = gate.ensure_permission("approve sales return", "api").await.expect("perm");
        assert_eq!(approve, again);

        let role = gate.ensure_role("super admin", "api").await.expect("role");
        gate.give_permission_to_role(role, approve).await.expect("grant");
        gate.assign_role(ActorId(1), role).await.expect("assign");

        assert!(gate.has_permission(ActorId(1), "approve sales return", "api").await.expect("q"));
        assert!(!gate.has_permission(ActorId(1), "approve sales return", "web").await.expect("q"));
        assert!(!gate.has_permission(ActorId(2), "approve sales return", "api").await.expect("q"));

        gate.remove_roles(ActorId(1)).await.expect("remove");
        assert!(!gate.has_permission(ActorId(1), "approve sales return", "api").await.expect("q"));
    }
}
