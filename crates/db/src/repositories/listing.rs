//! Whitelisted SQL rendering of [`ListQuery`] for the pending-approval lists.
//!
//! Client-supplied column names never reach the SQL text; each one is looked up
//! in the document's [`ListingSchema`] and replaced by a fixed expression. The
//! base joins are one-to-one, so a document is always exactly one row and the
//! count query stays consistent with the page query.

use sqlx::{QueryBuilder, Row, Sqlite};

use ledgerly_core::approvals::StoreError;
use ledgerly_core::query::{DateBound, FormFilter, ListQuery};

use super::form::format_form_date;
use super::RepositoryError;
use crate::DbPool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Date,
}

#[derive(Clone, Copy, Debug)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub expression: &'static str,
    pub kind: ColumnKind,
    /// `EXISTS` wrapper for columns of a one-to-many relation. `{}` is replaced by
    /// the predicate. Such columns can be filtered but not sorted.
    pub related: Option<&'static str>,
}

impl ColumnSpec {
    pub const fn direct(name: &'static str, expression: &'static str, kind: ColumnKind) -> Self {
        Self { name, expression, kind, related: None }
    }

    pub const fn related(
        name: &'static str,
        expression: &'static str,
        exists: &'static str,
    ) -> Self {
        Self { name, expression, kind: ColumnKind::Text, related: Some(exists) }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ListingSchema {
    /// `FROM ... JOIN ...` clause; the form table must be aliased `f`.
    pub from: &'static str,
    pub id: &'static str,
    pub columns: &'static [ColumnSpec],
    pub groups: &'static [&'static str],
}

fn invalid(field: &str, message: impl Into<String>) -> StoreError {
    StoreError::InvalidInput { field: field.to_string(), message: message.into() }
}

pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for character in value.chars() {
        if matches!(character, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

impl ListingSchema {
    fn column(&self, field: &str, name: &str) -> Result<&ColumnSpec, StoreError> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .ok_or_else(|| invalid(field, format!("unknown column `{name}`")))
    }

    fn date_column(&self, field: &str, bound: &DateBound) -> Result<&ColumnSpec, StoreError> {
        let column = self.column(field, &bound.column)?;
        if column.kind != ColumnKind::Date || column.related.is_some() {
            return Err(invalid(field, format!("column `{}` is not a date", bound.column)));
        }
        Ok(column)
    }

    /// Rejects every unknown or misused column before any SQL is rendered.
    pub fn validate(&self, query: &ListQuery) -> Result<(), StoreError> {
        for key in &query.sort {
            let column = self.column("sort_by", &key.column)?;
            if column.related.is_some() {
                return Err(invalid("sort_by", format!("column `{}` is not sortable", key.column)));
            }
        }
        for group in &query.group_by {
            if !self.groups.contains(&group.as_str()) {
                return Err(invalid("group_by", format!("cannot group by `{group}`")));
            }
        }
        for column in query.like.keys() {
            self.column("filter_like", column)?;
        }
        for column in query.equal.keys() {
            self.column("filter_equal", column)?;
        }
        if let Some(bound) = &query.date_min {
            self.date_column("filter_date_min", bound)?;
        }
        if let Some(bound) = &query.date_max {
            self.date_column("filter_date_max", bound)?;
        }
        Ok(())
    }

    fn push_predicate(
        builder: &mut QueryBuilder<'static, Sqlite>,
        column: &ColumnSpec,
        operator: &str,
        value: String,
    ) {
        let (open, close) = match column.related.and_then(|exists| exists.split_once("{}")) {
            Some((open, close)) => (open, close),
            None => ("", ""),
        };
        builder.push(open);
        builder.push(column.expression);
        builder.push(operator);
        builder.push_bind(value);
        if operator.contains("LIKE") {
            builder.push(" ESCAPE '\\'");
        }
        builder.push(close);
    }

    fn push_where(
        &self,
        builder: &mut QueryBuilder<'static, Sqlite>,
        query: &ListQuery,
    ) -> Result<(), StoreError> {
        builder.push(" WHERE f.approval_status = 0");
        if query.wants_archived() {
            builder.push(" AND f.archived_at IS NOT NULL");
        } else {
            builder.push(" AND f.archived_at IS NULL AND f.close_status IS NULL");
        }

        for filter in &query.form_filters {
            builder.push(match filter {
                FormFilter::NotArchived => " AND f.archived_at IS NULL",
                FormFilter::Archived => " AND f.archived_at IS NOT NULL",
                FormFilter::Pending => " AND f.approval_status = 0",
                FormFilter::ApprovalSent => " AND f.request_approval_at IS NOT NULL",
                FormFilter::Done => " AND f.done = 1",
                FormFilter::NotDone => " AND f.done = 0",
            });
        }

        if !query.like.is_empty() {
            builder.push(" AND (");
            for (index, (name, value)) in query.like.iter().enumerate() {
                if index > 0 {
                    builder.push(" OR ");
                }
                let column = self.column("filter_like", name)?;
                Self::push_predicate(
                    builder,
                    column,
                    " LIKE ",
                    format!("%{}%", escape_like(value)),
                );
            }
            builder.push(")");
        }

        for (name, value) in &query.equal {
            let column = self.column("filter_equal", name)?;
            builder.push(" AND ");
            Self::push_predicate(builder, column, " = ", value.clone());
        }

        if let Some(bound) = &query.date_min {
            let column = self.date_column("filter_date_min", bound)?;
            builder.push(" AND ");
            Self::push_predicate(builder, column, " >= ", format_form_date(bound.value));
        }
        if let Some(bound) = &query.date_max {
            let column = self.date_column("filter_date_max", bound)?;
            builder.push(" AND ");
            Self::push_predicate(builder, column, " <= ", format_form_date(bound.value));
        }

        Ok(())
    }

    fn push_order(
        &self,
        builder: &mut QueryBuilder<'static, Sqlite>,
        query: &ListQuery,
    ) -> Result<(), StoreError> {
        builder.push(" ORDER BY ");
        for key in &query.sort {
            let column = self.column("sort_by", &key.column)?;
            builder.push(column.expression);
            builder.push(if key.descending { " DESC, " } else { " ASC, " });
        }
        builder.push(self.id);
        builder.push(" ASC");
        Ok(())
    }

    /// Total match count and the document ids of the requested page, in order.
    pub async fn page_ids(
        &self,
        pool: &DbPool,
        query: &ListQuery,
    ) -> Result<(u64, Vec<i64>), StoreError> {
        self.validate(query)?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) AS total ");
        count.push(self.from);
        self.push_where(&mut count, query)?;
        let row = count.build().fetch_one(pool).await.map_err(RepositoryError::from)?;
        let total: i64 =
            row.try_get("total").map_err(|e| RepositoryError::Decode(e.to_string()))?;

        let mut page = QueryBuilder::new("SELECT ");
        page.push(self.id);
        page.push(" AS id ");
        page.push(self.from);
        self.push_where(&mut page, query)?;
        self.push_order(&mut page, query)?;
        page.push(" LIMIT ");
        page.push_bind(i64::from(query.limit));
        page.push(" OFFSET ");
        page.push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));

        let rows = page.build().fetch_all(pool).await.map_err(RepositoryError::from)?;
        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(|e| RepositoryError::Decode(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok((u64::try_from(total).unwrap_or(0), ids))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{escape_like, ColumnKind, ColumnSpec, ListingSchema};
    use ledgerly_core::approvals::StoreError;
    use ledgerly_core::query::{ListQuery, SortKey};

    const SCHEMA: ListingSchema = ListingSchema {
        from: "FROM docs d JOIN forms f ON f.id = d.form_id",
        id: "d.id",
        columns: &[
            ColumnSpec::direct("form.number", "f.number", ColumnKind::Text),
            ColumnSpec::direct("form.date", "f.date", ColumnKind::Date),
            ColumnSpec::related(
                "item.name",
                "i.name",
                "EXISTS (SELECT 1 FROM lines l JOIN items i ON i.id = l.item_id WHERE l.doc_id = d.id AND {})",
            ),
        ],
        groups: &["form.id"],
    };

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn related_columns_filter_but_do_not_sort() {
        let mut query = ListQuery::default();
        query.like = BTreeMap::from([("item.name".to_string(), "bolt".to_string())]);
        assert_eq!(SCHEMA.validate(&query), Ok(()));

        query.sort = vec![SortKey { column: "item.name".to_string(), descending: false }];
        assert!(matches!(
            SCHEMA.validate(&query),
            Err(StoreError::InvalidInput { ref field, .. }) if field == "sort_by"
        ));
    }

    #[test]
    fn unknown_columns_and_groups_are_rejected() {
        let mut query = ListQuery::default();
        query.equal = BTreeMap::from([("form.number; DROP TABLE forms".to_string(), "x".into())]);
        assert!(SCHEMA.validate(&query).is_err());

        let mut query = ListQuery::default();
        query.group_by = vec!["customer.id".to_string()];
        assert!(matches!(
            SCHEMA.validate(&query),
            Err(StoreError::InvalidInput { ref field, .. }) if field == "group_by"
        ));
    }
}
