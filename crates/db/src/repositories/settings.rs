use sqlx::Row;

use ledgerly_core::approvals::StoreError;
use ledgerly_core::ledger::{ChartOfAccountId, PostingAccounts};

use super::RepositoryError;
use crate::DbPool;

/// `settings_journals`: which chart of account each named posting role uses.
pub struct SqlJournalSettingsRepository {
    pool: DbPool,
}

impl SqlJournalSettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find(
        &self,
        feature: &str,
        name: &str,
    ) -> Result<Option<ChartOfAccountId>, RepositoryError> {
        let row = sqlx::query(
            "SELECT chart_of_account_id FROM settings_journals WHERE feature = ? AND name = ?",
        )
        .bind(feature)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let account: Option<i64> = row
            .try_get("chart_of_account_id")
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        Ok(account.map(ChartOfAccountId))
    }

    /// A setting row without an account counts as missing.
    pub async fn posting_accounts(
        &self,
        feature: &str,
        names: &[&str],
    ) -> Result<PostingAccounts, StoreError> {
        let mut accounts = PostingAccounts::new(feature);
        for name in names {
            match self.find(feature, name).await? {
                Some(account) => accounts = accounts.with(*name, account),
                None => {
                    return Err(StoreError::MissingJournalSetting {
                        feature: feature.to_string(),
                        name: (*name).to_string(),
                    })
                }
            }
        }
        Ok(accounts)
    }

    pub async fn assign(
        &self,
        feature: &str,
        name: &str,
        description: Option<&str>,
        account: Option<ChartOfAccountId>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO settings_journals (feature, name, description, chart_of_account_id)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(feature, name) DO UPDATE SET
                 description = COALESCE(excluded.description, settings_journals.description),
                 chart_of_account_id = excluded.chart_of_account_id",
        )
        .bind(feature)
        .bind(name)
        .bind(description)
        .bind(account.map(|account| account.0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SqlJournalSettingsRepository;
    use crate::{connect_with_settings, migrations};
    use ledgerly_core::approvals::StoreError;
    use ledgerly_core::ledger::ChartOfAccountId;

    #[tokio::test]
    async fn unassigned_setting_is_reported_by_name() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        sqlx::query("INSERT INTO chart_of_accounts (id, number, name) VALUES (10, '1100', 'AR')")
            .execute(&pool)
            .await
            .expect("seed account");

        let settings = SqlJournalSettingsRepository::new(pool);
        settings
            .assign("sales", "account receivable", None, Some(ChartOfAccountId(10)))
            .await
            .expect("assign");
        settings.assign("sales", "sales income", Some("income"), None).await.expect("assign");

        let error = settings
            .posting_accounts("sales", &["account receivable", "sales income"])
            .await
            .expect_err("unassigned");
        assert_eq!(
            error,
            StoreError::MissingJournalSetting {
                feature: "sales".to_string(),
                name: "sales income".to_string()
            }
        );

        let resolved =
            settings.posting_accounts("sales", &["account receivable"]).await.expect("resolved");
        assert_eq!(resolved.require("account receivable"), Ok(ChartOfAccountId(10)));
    }
}
