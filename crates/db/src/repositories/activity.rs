use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use ledgerly_core::activity::{ActivityKind, UserActivity};
use ledgerly_core::domain::{ActorId, DocumentId};

use super::form::parse_timestamp;
use super::{decode_error, RepositoryError};
use crate::DbPool;

pub(crate) async fn append(
    conn: &mut SqliteConnection,
    activity: &UserActivity,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO user_activities (number, table_id, table_type, activity, user_id, date)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&activity.number)
    .bind(activity.table_id.0)
    .bind(&activity.table_type)
    .bind(activity.activity.as_str())
    .bind(activity.actor.0)
    .bind(activity.date.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn row_to_activity(row: &SqliteRow) -> Result<UserActivity, RepositoryError> {
    let number: String = row.try_get("number").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let table_id: i64 =
        row.try_get("table_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let table_type: String =
        row.try_get("table_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let activity: String =
        row.try_get("activity").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_id: i64 = row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let date: String = row.try_get("date").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(UserActivity {
        number,
        table_id: DocumentId(table_id),
        table_type,
        activity: ActivityKind::parse(&activity)
            .ok_or_else(|| decode_error("activity", format!("unknown activity `{activity}`")))?,
        actor: ActorId(user_id),
        date: parse_timestamp("date", Some(date))?
            .ok_or_else(|| decode_error("date", "missing"))?,
    })
}

pub struct SqlActivityRepository {
    pool: DbPool,
}

impl SqlActivityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn for_document(
        &self,
        table_type: &str,
        table_id: DocumentId,
    ) -> Result<Vec<UserActivity>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT number, table_id, table_type, activity, user_id, date
             FROM user_activities
             WHERE table_type = ? AND table_id = ?
             ORDER BY id ASC",
        )
        .bind(table_type)
        .bind(table_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_activity).collect::<Result<Vec<_>, _>>()
    }
}
