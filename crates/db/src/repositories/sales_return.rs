use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use ledgerly_core::activity::{ActivityKind, UserActivity};
use ledgerly_core::approvals::{Approvable, ApprovalStore, Decision, StoreError, Submission};
use ledgerly_core::domain::form::FormId;
use ledgerly_core::domain::sales_return::{NewSalesReturn, SalesReturn, SalesReturnItem};
use ledgerly_core::domain::{ActorId, DocumentId, MasterRef};
use ledgerly_core::ledger::money::{exceeds_scale, parse_fixed, to_fixed};
use ledgerly_core::ledger::PostingAccounts;
use ledgerly_core::query::{Includes, ListQuery, Page, PageMeta};

use super::form::{self, row_to_form, NewForm, FORM_COLUMNS};
use super::listing::{ColumnKind, ColumnSpec, ListingSchema};
use super::settings::SqlJournalSettingsRepository;
use super::{activity, decode_error, is_unique_violation, journal, RepositoryError};
use crate::DbPool;

const ITEM_EXISTS: &str = "EXISTS (SELECT 1 FROM sales_return_items sri \
     JOIN items i ON i.id = sri.item_id WHERE sri.sales_return_id = sr.id AND {})";
const ALLOCATION_EXISTS: &str = "EXISTS (SELECT 1 FROM sales_return_items sri \
     JOIN allocations a ON a.id = sri.allocation_id WHERE sri.sales_return_id = sr.id AND {})";

pub const SALES_RETURN_LISTING: ListingSchema = ListingSchema {
    from: "FROM sales_returns sr \
           JOIN forms f ON f.id = sr.form_id \
           LEFT JOIN customers c ON c.id = sr.customer_id \
           LEFT JOIN warehouses w ON w.id = sr.warehouse_id",
    id: "sr.id",
    columns: &[
        ColumnSpec::direct("id", "sr.id", ColumnKind::Integer),
        ColumnSpec::direct("sales_return.id", "sr.id", ColumnKind::Integer),
        ColumnSpec::direct("form.id", "f.id", ColumnKind::Integer),
        ColumnSpec::direct("form.number", "f.number", ColumnKind::Text),
        ColumnSpec::direct("form.date", "f.date", ColumnKind::Date),
        ColumnSpec::direct("form.created_by", "f.created_by", ColumnKind::Integer),
        ColumnSpec::direct("customer_id", "sr.customer_id", ColumnKind::Integer),
        ColumnSpec::direct("customer.name", "c.name", ColumnKind::Text),
        ColumnSpec::direct("warehouse_id", "sr.warehouse_id", ColumnKind::Integer),
        ColumnSpec::direct("warehouse.name", "w.name", ColumnKind::Text),
        ColumnSpec::related("item.name", "i.name", ITEM_EXISTS),
        ColumnSpec::related("item.code", "i.code", ITEM_EXISTS),
        ColumnSpec::related("allocation.name", "a.name", ALLOCATION_EXISTS),
    ],
    groups: &["id", "sales_return.id", "form.id"],
};

/// SQLite persistence for sales returns and their approval side effects.
#[derive(Clone)]
pub struct SqlSalesReturnStore {
    pool: DbPool,
    decimal_scale: u32,
}

impl SqlSalesReturnStore {
    pub fn new(pool: DbPool, decimal_scale: u32) -> Self {
        Self { pool, decimal_scale }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn load_many(
        &self,
        ids: &[i64],
        includes: Includes,
    ) -> Result<Vec<SalesReturn>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut headers = QueryBuilder::<Sqlite>::new(
            "SELECT sr.id, sr.customer_id, sr.warehouse_id, sr.amount, sr.tax,
                    c.name AS customer_name, w.name AS warehouse_name, ",
        );
        headers.push(FORM_COLUMNS);
        headers.push(
            " FROM sales_returns sr
              JOIN forms f ON f.id = sr.form_id
              LEFT JOIN customers c ON c.id = sr.customer_id
              LEFT JOIN warehouses w ON w.id = sr.warehouse_id
              WHERE sr.id IN (",
        );
        let mut separated = headers.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        headers.push(")");

        let rows = headers.build().fetch_all(&self.pool).await?;
        let mut documents = HashMap::with_capacity(rows.len());
        for row in &rows {
            let document = row_to_sales_return(row, includes)?;
            documents.insert(document.id.0, document);
        }

        if includes.items {
            for (owner, item) in self.load_items(ids, includes).await? {
                if let Some(document) = documents.get_mut(&owner) {
                    document.items.push(item);
                }
            }
        }

        Ok(ids.iter().filter_map(|id| documents.remove(id)).collect())
    }

    async fn load_items(
        &self,
        ids: &[i64],
        includes: Includes,
    ) -> Result<Vec<(i64, SalesReturnItem)>, RepositoryError> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT sri.sales_return_id, sri.item_id, sri.quantity, sri.price, sri.allocation_id,
                    i.name AS item_name, a.name AS allocation_name
             FROM sales_return_items sri
             LEFT JOIN items i ON i.id = sri.item_id
             LEFT JOIN allocations a ON a.id = sri.allocation_id
             WHERE sri.sales_return_id IN (",
        );
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        query.push(") ORDER BY sri.sales_return_id ASC, sri.position ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(|row| row_to_item(row, includes)).collect()
    }

    /// Values are stored rounded to `decimal_scale`; anything finer would no
    /// longer reproduce `amount - tax` from the stored items.
    fn ensure_representable(&self, draft: &NewSalesReturn) -> Result<(), StoreError> {
        let mut values = vec![("amount".to_string(), draft.amount), ("tax".to_string(), draft.tax)];
        for (index, item) in draft.items.iter().enumerate() {
            values.push((format!("items.{index}.quantity"), item.quantity));
            values.push((format!("items.{index}.price"), item.price));
        }

        match values.into_iter().find(|(_, value)| exceeds_scale(*value, self.decimal_scale)) {
            Some((field, _)) => Err(StoreError::InvalidInput {
                field,
                message: format!("may not have more than {} decimal places", self.decimal_scale),
            }),
            None => Ok(()),
        }
    }

    async fn insert_document(
        &self,
        conn: &mut SqliteConnection,
        draft: &NewSalesReturn,
        actor: ActorId,
        created_at: DateTime<Utc>,
    ) -> Result<(DocumentId, String), StoreError> {
        self.ensure_representable(draft)?;
        ensure_exists(conn, "customers", draft.customer_id, "customer_id").await?;
        ensure_exists(conn, "warehouses", draft.warehouse_id, "warehouse_id").await?;
        for (index, item) in draft.items.iter().enumerate() {
            ensure_exists(conn, "items", item.item_id, &format!("items.{index}.item_id")).await?;
            if let Some(allocation) = item.allocation_id {
                let field = format!("items.{index}.allocation_id");
                ensure_exists(conn, "allocations", allocation, &field).await?;
            }
        }

        let number =
            form::next_form_number(conn, SalesReturn::NUMBER_PREFIX, draft.date).await?;
        let form_id = form::insert_form(
            conn,
            NewForm {
                number: &number,
                date: draft.date,
                formable_type: SalesReturn::TABLE_TYPE,
                created_by: actor,
                created_at,
            },
        )
        .await
        .map_err(|error| match error {
            RepositoryError::Database(ref db) if is_unique_violation(db) => {
                StoreError::StaleState(number.clone())
            }
            other => other.into(),
        })?;

        let result = sqlx::query(
            "INSERT INTO sales_returns (form_id, customer_id, warehouse_id, amount, tax)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(form_id.0)
        .bind(draft.customer_id)
        .bind(draft.warehouse_id)
        .bind(to_fixed(draft.amount, self.decimal_scale))
        .bind(to_fixed(draft.tax, self.decimal_scale))
        .execute(&mut *conn)
        .await
        .map_err(RepositoryError::from)?;
        let id = DocumentId(result.last_insert_rowid());
        form::attach_formable(conn, form_id, id.0).await?;

        for (position, item) in draft.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO sales_return_items
                     (sales_return_id, position, item_id, quantity, price, allocation_id)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id.0)
            .bind(position as i64)
            .bind(item.item_id)
            .bind(to_fixed(item.quantity, self.decimal_scale))
            .bind(to_fixed(item.price, self.decimal_scale))
            .bind(item.allocation_id)
            .execute(&mut *conn)
            .await
            .map_err(RepositoryError::from)?;
        }

        activity::append(
            conn,
            &UserActivity::new(
                number.clone(),
                id,
                SalesReturn::TABLE_TYPE,
                ActivityKind::Created,
                actor,
                created_at,
            ),
        )
        .await?;

        Ok((id, number))
    }
}

async fn ensure_exists(
    conn: &mut SqliteConnection,
    table: &'static str,
    id: i64,
    field: &str,
) -> Result<(), StoreError> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)");
    let found: i64 = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(RepositoryError::from)?;

    if found == 1 {
        Ok(())
    } else {
        Err(StoreError::InvalidInput {
            field: field.to_string(),
            message: format!("no record with id {id}"),
        })
    }
}

/// Reports why a guarded write touched no row.
async fn refused(
    conn: &mut SqliteConnection,
    document_id: DocumentId,
    form_id: FormId,
) -> StoreError {
    match form::number_of(conn, form_id).await {
        Ok(Some(number)) => StoreError::StaleState(number),
        Ok(None) => StoreError::NotFound(document_id),
        Err(error) => error.into(),
    }
}

fn parse_amount(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    parse_fixed(raw).map_err(|error| decode_error(column, error))
}

fn master(id: i64, name: Option<String>) -> Option<MasterRef> {
    name.map(|name| MasterRef { id, name })
}

fn row_to_sales_return(row: &SqliteRow, includes: Includes) -> Result<SalesReturn, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let customer_id: i64 =
        row.try_get("customer_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let warehouse_id: i64 =
        row.try_get("warehouse_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let amount: String = row.try_get("amount").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tax: String = row.try_get("tax").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let customer_name: Option<String> =
        row.try_get("customer_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let warehouse_name: Option<String> =
        row.try_get("warehouse_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(SalesReturn {
        id: DocumentId(id),
        form: row_to_form(row)?,
        customer_id,
        warehouse_id,
        amount: parse_amount("amount", &amount)?,
        tax: parse_amount("tax", &tax)?,
        items: Vec::new(),
        customer: if includes.customer { master(customer_id, customer_name) } else { None },
        warehouse: if includes.warehouse { master(warehouse_id, warehouse_name) } else { None },
    })
}

fn row_to_item(row: &SqliteRow, includes: Includes) -> Result<(i64, SalesReturnItem), RepositoryError> {
    let owner: i64 =
        row.try_get("sales_return_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let item_id: i64 = row.try_get("item_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let quantity: String =
        row.try_get("quantity").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let price: String = row.try_get("price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let allocation_id: Option<i64> =
        row.try_get("allocation_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let item_name: Option<String> =
        row.try_get("item_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let allocation_name: Option<String> =
        row.try_get("allocation_name").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let item = SalesReturnItem {
        item_id,
        quantity: parse_amount("quantity", &quantity)?,
        price: parse_amount("price", &price)?,
        allocation_id,
        item: if includes.items_item { master(item_id, item_name) } else { None },
        allocation: match (includes.items_allocation, allocation_id) {
            (true, Some(allocation_id)) => master(allocation_id, allocation_name),
            _ => None,
        },
    };
    Ok((owner, item))
}

#[async_trait]
impl ApprovalStore<SalesReturn> for SqlSalesReturnStore {
    async fn find(&self, id: DocumentId) -> Result<Option<SalesReturn>, StoreError> {
        let mut found = self.load_many(&[id.0], Includes::all()).await?;
        Ok(found.pop())
    }

    async fn posting_accounts(
        &self,
        feature: &str,
        names: &[&str],
    ) -> Result<PostingAccounts, StoreError> {
        SqlJournalSettingsRepository::new(self.pool.clone()).posting_accounts(feature, names).await
    }

    async fn create(
        &self,
        draft: NewSalesReturn,
        actor: ActorId,
        created_at: DateTime<Utc>,
    ) -> Result<SalesReturn, StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let (id, number) = self.insert_document(&mut tx, &draft, actor, created_at).await?;
        tx.commit().await.map_err(RepositoryError::from)?;

        tracing::debug!(
            event_name = "store.sales_return.inserted",
            document_id = id.0,
            number = %number,
            "sales return stored"
        );

        self.find(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn commit_decision(&self, decision: Decision) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let applied = form::decide(
            &mut tx,
            decision.form_id,
            decision.outcome,
            decision.actor,
            decision.reason.as_deref(),
            decision.decided_at,
        )
        .await?;
        if !applied {
            return Err(refused(&mut tx, decision.document_id, decision.form_id).await);
        }

        journal::insert_lines(
            &mut tx,
            decision.form_id,
            (SalesReturn::TABLE_TYPE, decision.document_id),
            &decision.journal,
            self.decimal_scale,
            decision.decided_at,
        )
        .await?;
        activity::append(&mut tx, &decision.activity).await?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn commit_submission(&self, submission: Submission) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let applied = form::request_approval(
            &mut tx,
            submission.form_id,
            submission.actor,
            submission.requested_at,
        )
        .await?;
        if !applied {
            return Err(refused(&mut tx, submission.document_id, submission.form_id).await);
        }
        activity::append(&mut tx, &submission.activity).await?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn list_pending(&self, query: &ListQuery) -> Result<Page<SalesReturn>, StoreError> {
        let (total, ids) = SALES_RETURN_LISTING.page_ids(&self.pool, query).await?;
        let data = self.load_many(&ids, query.includes).await?;
        let meta = PageMeta::new(query.page, query.limit, total, data.len());
        Ok(Page { data, meta })
    }
}
