use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use ledgerly_core::domain::form::{form_number, form_number_period, ApprovalStatus, Form, FormId};
use ledgerly_core::domain::ActorId;

use super::{decode_error, RepositoryError};

pub const FORM_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Form columns aliased so they can sit next to a document's own columns.
pub(crate) const FORM_COLUMNS: &str = "f.id AS form_id, f.number AS form_number, \
     f.date AS form_date, f.approval_status, f.cancellation_status, f.close_status, f.done, \
     f.archived_at, f.request_approval_by, f.request_approval_at, f.approval_by, f.approval_at, \
     f.approval_reason, f.created_by";

/// Guard shared by every transition write: still pending, open and not being cancelled.
pub(crate) const OPEN_FOR_TRANSITION: &str = "approval_status = 0 AND close_status IS NULL \
     AND (cancellation_status IS NULL OR cancellation_status = -1)";

pub fn format_form_date(date: NaiveDateTime) -> String {
    date.format(FORM_DATE_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value
        .map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|error| decode_error(column, error))
        })
        .transpose()
}

fn parse_status(column: &str, value: Option<i64>) -> Result<Option<ApprovalStatus>, RepositoryError> {
    value
        .map(|value| ApprovalStatus::try_from(value).map_err(|error| decode_error(column, error)))
        .transpose()
}

pub(crate) fn row_to_form(row: &SqliteRow) -> Result<Form, RepositoryError> {
    let id: i64 = row.try_get("form_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let number: String =
        row.try_get("form_number").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let date_str: String =
        row.try_get("form_date").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approval_status: i64 =
        row.try_get("approval_status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let cancellation_status: Option<i64> =
        row.try_get("cancellation_status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let close_status: Option<i64> =
        row.try_get("close_status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let done: bool = row.try_get("done").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let archived_at: Option<String> =
        row.try_get("archived_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let request_approval_by: Option<i64> =
        row.try_get("request_approval_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let request_approval_at: Option<String> =
        row.try_get("request_approval_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approval_by: Option<i64> =
        row.try_get("approval_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approval_at: Option<String> =
        row.try_get("approval_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approval_reason: Option<String> =
        row.try_get("approval_reason").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_by: i64 =
        row.try_get("created_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let date = NaiveDateTime::parse_from_str(&date_str, FORM_DATE_FORMAT)
        .map_err(|error| decode_error("date", error))?;

    Ok(Form {
        id: FormId(id),
        number,
        date,
        approval_status: ApprovalStatus::try_from(approval_status)
            .map_err(|error| decode_error("approval_status", error))?,
        cancellation_status: parse_status("cancellation_status", cancellation_status)?,
        close_status: parse_status("close_status", close_status)?,
        done,
        archived_at: parse_timestamp("archived_at", archived_at)?,
        request_approval_by: request_approval_by.map(ActorId),
        request_approval_at: parse_timestamp("request_approval_at", request_approval_at)?,
        approval_by: approval_by.map(ActorId),
        approval_at: parse_timestamp("approval_at", approval_at)?,
        approval_reason,
        created_by: ActorId(created_by),
    })
}

/// Next `<PREFIX><YY><MM><SEQ>` number for the month of `date`.
///
/// Must run inside the transaction that inserts the form; the unique index on
/// `forms.number` rejects a number taken by a concurrent writer.
pub async fn next_form_number(
    conn: &mut SqliteConnection,
    prefix: &str,
    date: NaiveDateTime,
) -> Result<String, RepositoryError> {
    let period = form_number_period(prefix, date);
    let row = sqlx::query(
        "SELECT MAX(CAST(SUBSTR(number, ?) AS INTEGER)) AS sequence
         FROM forms
         WHERE number GLOB ?",
    )
    .bind(period.len() as i64 + 1)
    .bind(format!("{period}[0-9]*"))
    .fetch_one(&mut *conn)
    .await?;

    let current: Option<i64> =
        row.try_get("sequence").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let next = u32::try_from(current.unwrap_or(0) + 1)
        .map_err(|error| decode_error("sequence", error))?;

    Ok(form_number(prefix, date, next))
}

pub(crate) struct NewForm<'a> {
    pub number: &'a str,
    pub date: NaiveDateTime,
    pub formable_type: &'a str,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}

pub(crate) async fn insert_form(
    conn: &mut SqliteConnection,
    form: NewForm<'_>,
) -> Result<FormId, RepositoryError> {
    let created_at = form.created_at.to_rfc3339();
    let result = sqlx::query(
        "INSERT INTO forms (number, date, formable_type, created_by, approval_status, done,
                            created_at, updated_at)
         VALUES (?, ?, ?, ?, 0, 0, ?, ?)",
    )
    .bind(form.number)
    .bind(format_form_date(form.date))
    .bind(form.formable_type)
    .bind(form.created_by.0)
    .bind(&created_at)
    .bind(&created_at)
    .execute(&mut *conn)
    .await?;

    Ok(FormId(result.last_insert_rowid()))
}

pub(crate) async fn attach_formable(
    conn: &mut SqliteConnection,
    form_id: FormId,
    formable_id: i64,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE forms SET formable_id = ? WHERE id = ?")
        .bind(formable_id)
        .bind(form_id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Compare-and-swap write of a review outcome. Returns `false` when the form
/// was no longer open for transition.
pub(crate) async fn decide(
    conn: &mut SqliteConnection,
    form_id: FormId,
    outcome: ApprovalStatus,
    actor: ActorId,
    reason: Option<&str>,
    decided_at: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let decided_at = decided_at.to_rfc3339();
    let sql = format!(
        "UPDATE forms
         SET approval_status = ?, approval_by = ?, approval_at = ?, approval_reason = ?,
             done = ?, updated_at = ?
         WHERE id = ? AND {OPEN_FOR_TRANSITION}"
    );
    let result = sqlx::query(&sql)
        .bind(outcome.as_i64())
        .bind(actor.0)
        .bind(&decided_at)
        .bind(reason)
        .bind(outcome == ApprovalStatus::Approved)
        .bind(&decided_at)
        .bind(form_id.0)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn request_approval(
    conn: &mut SqliteConnection,
    form_id: FormId,
    actor: ActorId,
    requested_at: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let requested_at = requested_at.to_rfc3339();
    let sql = format!(
        "UPDATE forms
         SET request_approval_by = ?, request_approval_at = ?, updated_at = ?
         WHERE id = ? AND {OPEN_FOR_TRANSITION}"
    );
    let result = sqlx::query(&sql)
        .bind(actor.0)
        .bind(&requested_at)
        .bind(&requested_at)
        .bind(form_id.0)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn number_of(
    conn: &mut SqliteConnection,
    form_id: FormId,
) -> Result<Option<String>, RepositoryError> {
    let row = sqlx::query("SELECT number FROM forms WHERE id = ?")
        .bind(form_id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|row| row.try_get("number").map_err(|e| RepositoryError::Decode(e.to_string())))
        .transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{insert_form, next_form_number, NewForm};
    use crate::{connect_with_settings, migrations};
    use ledgerly_core::domain::ActorId;

    #[tokio::test]
    async fn numbers_continue_from_the_highest_sequence_of_the_month() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let mut conn = pool.acquire().await.expect("acquire");
        let may = NaiveDate::from_ymd_opt(2022, 5, 10)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("date");
        let june = NaiveDate::from_ymd_opt(2022, 6, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("date");

        assert_eq!(next_form_number(&mut conn, "SR", may).await.expect("number"), "SR2205001");

        for number in ["SR2205001", "SR2205009", "SO2205050"] {
            insert_form(
                &mut conn,
                NewForm {
                    number,
                    date: may,
                    formable_type: "SalesReturn",
                    created_by: ActorId(1),
                    created_at: Utc::now(),
                },
            )
            .await
            .expect("insert form");
        }

        assert_eq!(next_form_number(&mut conn, "SR", may).await.expect("number"), "SR2205010");
        assert_eq!(next_form_number(&mut conn, "SR", june).await.expect("number"), "SR2206001");
    }
}
