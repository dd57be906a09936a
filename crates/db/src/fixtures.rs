use sqlx::Executor;

use ledgerly_core::domain::ActorId;
use ledgerly_core::ledger::{ACCOUNT_RECEIVABLE, INCOME_TAX_PAYABLE, SALES_FEATURE, SALES_INCOME};
use ledgerly_core::permissions::permission_name;

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlPermissionGate};

pub const SEED_ADMIN: ActorId = ActorId(1);
pub const SEED_CUSTOMER_ID: i64 = 1;
pub const SEED_WAREHOUSE_ID: i64 = 1;
pub const SEED_ITEM_IDS: [i64; 2] = [1, 2];
pub const SEED_ALLOCATION_ID: i64 = 1;
pub const SUPER_ADMIN_ROLE: &str = "super admin";

const SEED_PERMISSION_ACTIONS: &[&str] = &["create", "read", "update", "delete", "approve"];
const SEED_SUBJECTS: &[&str] = &["sales return"];
const SEED_JOURNAL_SETTINGS: &[(&str, &str)] = &[
    (SALES_FEATURE, ACCOUNT_RECEIVABLE),
    (SALES_FEATURE, SALES_INCOME),
    (SALES_FEATURE, INCOME_TAX_PAYABLE),
];

/// Master data, journal settings and an all-permission administrator.
pub struct ReferenceDataset;

impl ReferenceDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/reference_seed_data.sql");

    /// Loads the dataset and grants every seeded permission under `guard` to
    /// [`SEED_ADMIN`] through the super admin role. Idempotent.
    pub async fn load(pool: &DbPool, guard: &str) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let gate = SqlPermissionGate::new(pool.clone());
        let role = gate.ensure_role(SUPER_ADMIN_ROLE, guard).await?;
        let mut permissions = Vec::new();
        for subject in SEED_SUBJECTS {
            for action in SEED_PERMISSION_ACTIONS {
                let name = permission_name(action, subject);
                let permission = gate.ensure_permission(&name, guard).await?;
                gate.give_permission_to_role(role, permission).await?;
                permissions.push(name);
            }
        }
        gate.assign_role(SEED_ADMIN, role).await?;

        Ok(SeedResult { guard: guard.to_string(), role: SUPER_ADMIN_ROLE, permissions })
    }

    pub async fn verify(pool: &DbPool, guard: &str) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let admin: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)")
            .bind(SEED_ADMIN.0)
            .fetch_one(pool)
            .await?;
        checks.push(("admin-user".to_string(), admin == 1));

        let customer: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM customers WHERE id = ?1)")
                .bind(SEED_CUSTOMER_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("customer".to_string(), customer == 1));

        let warehouse: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM warehouses WHERE id = ?1)")
                .bind(SEED_WAREHOUSE_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("warehouse".to_string(), warehouse == 1));

        let items: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM items WHERE id IN (?1, ?2)")
            .bind(SEED_ITEM_IDS[0])
            .bind(SEED_ITEM_IDS[1])
            .fetch_one(pool)
            .await?;
        checks.push(("items".to_string(), items == SEED_ITEM_IDS.len() as i64));

        for (feature, name) in SEED_JOURNAL_SETTINGS {
            let assigned: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM settings_journals
                               WHERE feature = ?1 AND name = ?2 AND chart_of_account_id IS NOT NULL)",
            )
            .bind(feature)
            .bind(name)
            .fetch_one(pool)
            .await?;
            checks.push((format!("journal-setting:{feature}:{name}"), assigned == 1));
        }

        let granted: i64 = sqlx::query_scalar(
            "SELECT COUNT(1)
             FROM permissions p
             JOIN role_has_permissions rp ON rp.permission_id = p.id
             JOIN model_has_roles mr ON mr.role_id = rp.role_id
             WHERE p.guard_name = ?1 AND mr.model_type = 'User' AND mr.model_id = ?2",
        )
        .bind(guard)
        .bind(SEED_ADMIN.0)
        .fetch_one(pool)
        .await?;
        let expected = (SEED_PERMISSION_ACTIONS.len() * SEED_SUBJECTS.len()) as i64;
        checks.push(("admin-permissions".to_string(), granted == expected));

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub guard: String,
    pub role: &'static str,
    pub permissions: Vec<String>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(ReferenceDataset::SQL.contains("settings_journals"));
    }

    #[tokio::test]
    async fn seeding_twice_is_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");

        let first = ReferenceDataset::load(&pool, "api").await.expect("load");
        let first_verification = ReferenceDataset::verify(&pool, "api").await.expect("verify");
        assert!(first_verification.all_present, "{:?}", first_verification.checks);
        assert_eq!(first.permissions.len(), 5);

        ReferenceDataset::load(&pool, "api").await.expect("reload");
        let second_verification = ReferenceDataset::verify(&pool, "api").await.expect("verify");
        assert_eq!(first_verification.checks, second_verification.checks);

        let settings: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM settings_journals")
            .fetch_one(&pool)
            .await
            .expect("count settings");
        assert_eq!(settings, 3);
    }

    #[tokio::test]
    async fn permissions_are_scoped_to_the_seeded_guard() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");

        ReferenceDataset::load(&pool, "api").await.expect("load");
        let other_guard = ReferenceDataset::verify(&pool, "web").await.expect("verify");

        assert!(!other_guard.all_present);
        assert!(other_guard.checks.iter().any(|(name, ok)| name == "admin-permissions" && !ok));
    }
}
