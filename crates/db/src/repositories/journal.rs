use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use ledgerly_core::domain::form::FormId;
use ledgerly_core::domain::DocumentId;
use ledgerly_core::ledger::money::{parse_fixed, to_fixed};
use ledgerly_core::ledger::{ChartOfAccountId, JournalLine};

use super::form::parse_timestamp;
use super::{decode_error, RepositoryError};
use crate::DbPool;

/// A posted journal row as stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalRow {
    pub form_id: FormId,
    pub journalable_type: Option<String>,
    pub journalable_id: Option<i64>,
    pub line: JournalLine,
    pub created_at: DateTime<Utc>,
}

pub(crate) async fn insert_lines(
    conn: &mut SqliteConnection,
    form_id: FormId,
    journalable: (&str, DocumentId),
    lines: &[JournalLine],
    decimal_scale: u32,
    created_at: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let created_at = created_at.to_rfc3339();
    for line in lines {
        sqlx::query(
            "INSERT INTO journals (form_id, journalable_type, journalable_id, chart_of_account_id,
                                   debit, credit, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(form_id.0)
        .bind(journalable.0)
        .bind(journalable.1 .0)
        .bind(line.chart_of_account_id.0)
        .bind(to_fixed(line.debit, decimal_scale))
        .bind(to_fixed(line.credit, decimal_scale))
        .bind(&created_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn parse_amount(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    parse_fixed(raw).map_err(|error| decode_error(column, error))
}

fn row_to_journal(row: &SqliteRow) -> Result<JournalRow, RepositoryError> {
    let form_id: i64 = row.try_get("form_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let journalable_type: Option<String> =
        row.try_get("journalable_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let journalable_id: Option<i64> =
        row.try_get("journalable_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let chart_of_account_id: i64 =
        row.try_get("chart_of_account_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let debit: String = row.try_get("debit").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let credit: String =
        row.try_get("credit").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(JournalRow {
        form_id: FormId(form_id),
        journalable_type,
        journalable_id,
        line: JournalLine {
            chart_of_account_id: ChartOfAccountId(chart_of_account_id),
            debit: parse_amount("debit", &debit)?,
            credit: parse_amount("credit", &credit)?,
        },
        created_at: parse_timestamp("created_at", Some(created_at))?
            .ok_or_else(|| decode_error("created_at", "missing"))?,
    })
}

pub struct SqlJournalRepository {
    pool: DbPool,
}

impl SqlJournalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn for_form(&self, form_id: FormId) -> Result<Vec<JournalRow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT form_id, journalable_type, journalable_id, chart_of_account_id,
                    debit, credit, created_at
             FROM journals WHERE form_id = ? ORDER BY id ASC",
        )
        .bind(form_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_journal).collect::<Result<Vec<_>, _>>()
    }

    /// Raw `(debit, credit)` text of each row, in insertion order.
    pub async fn stored_amounts(
        &self,
        form_id: FormId,
    ) -> Result<Vec<(String, String)>, RepositoryError> {
        let rows = sqlx::query("SELECT debit, credit FROM journals WHERE form_id = ? ORDER BY id")
            .bind(form_id.0)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let debit: String =
                    row.try_get("debit").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                let credit: String =
                    row.try_get("credit").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                Ok((debit, credit))
            })
            .collect()
    }
}
