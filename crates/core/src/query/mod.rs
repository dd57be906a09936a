//! Contract of the generic list endpoint: raw request parameters, their parsed
//! form, and the paginated response envelope.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::errors::ApplicationError;

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Query-string parameters as sent by clients.
///
/// `join` and `fields` are accepted for client compatibility; joins are derived
/// from the columns a request references and rows are always whole documents.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListParams {
    pub join: Option<String>,
    pub fields: Option<String>,
    pub sort_by: Option<String>,
    pub group_by: Option<String>,
    pub filter_form: Option<String>,
    pub filter_like: Option<String>,
    pub filter_equal: Option<String>,
    pub filter_date_min: Option<String>,
    pub filter_date_max: Option<String>,
    pub includes: Option<String>,
    pub limit: Option<u32>,
    pub page: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormFilter {
    NotArchived,
    Archived,
    Pending,
    ApprovalSent,
    Done,
    NotDone,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DateBound {
    pub column: String,
    pub value: NaiveDateTime,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Includes {
    pub customer: bool,
    pub warehouse: bool,
    pub items: bool,
    pub items_item: bool,
    pub items_allocation: bool,
}

impl Includes {
    pub fn all() -> Self {
        Self {
            customer: true,
            warehouse: true,
            items: true,
            items_item: true,
            items_allocation: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListQuery {
    pub sort: Vec<SortKey>,
    pub group_by: Vec<String>,
    pub form_filters: Vec<FormFilter>,
    pub like: BTreeMap<String, String>,
    pub equal: BTreeMap<String, String>,
    pub date_min: Option<DateBound>,
    pub date_max: Option<DateBound>,
    pub includes: Includes,
    pub limit: u32,
    pub page: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            sort: Vec::new(),
            group_by: Vec::new(),
            form_filters: Vec::new(),
            like: BTreeMap::new(),
            equal: BTreeMap::new(),
            date_min: None,
            date_max: None,
            includes: Includes::default(),
            limit: DEFAULT_LIMIT,
            page: 1,
        }
    }
}

impl ListQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    pub fn wants_archived(&self) -> bool {
        self.form_filters.contains(&FormFilter::Archived)
    }
}

impl TryFrom<ListParams> for ListQuery {
    type Error = ApplicationError;

    fn try_from(params: ListParams) -> Result<Self, Self::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 || limit > MAX_LIMIT {
            return Err(ApplicationError::validation(
                "limit",
                format!("limit must be in range 1..={MAX_LIMIT}"),
            ));
        }
        let page = params.page.unwrap_or(1);
        if page == 0 {
            return Err(ApplicationError::validation("page", "page must be at least 1"));
        }

        Ok(Self {
            sort: parse_sort(params.sort_by.as_deref()),
            group_by: split_list(params.group_by.as_deref(), ','),
            form_filters: parse_form_filters(params.filter_form.as_deref())?,
            like: parse_column_map("filter_like", params.filter_like.as_deref())?,
            equal: parse_column_map("filter_equal", params.filter_equal.as_deref())?,
            date_min: parse_date_bound("filter_date_min", params.filter_date_min.as_deref())?,
            date_max: parse_date_bound("filter_date_max", params.filter_date_max.as_deref())?,
            includes: parse_includes(params.includes.as_deref())?,
            limit,
            page,
        })
    }
}

fn split_list(raw: Option<&str>, separator: char) -> Vec<String> {
    raw.unwrap_or_default()
        .split(separator)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_sort(raw: Option<&str>) -> Vec<SortKey> {
    split_list(raw, ',')
        .into_iter()
        .map(|part| match part.strip_prefix('-') {
            Some(column) => SortKey { column: column.to_string(), descending: true },
            None => SortKey { column: part, descending: false },
        })
        .collect()
}

fn parse_form_filters(raw: Option<&str>) -> Result<Vec<FormFilter>, ApplicationError> {
    let mut filters = Vec::new();
    for token in split_list(raw, ';') {
        let filter = match token.as_str() {
            "null" => continue,
            "notArchived" => FormFilter::NotArchived,
            "archived" => FormFilter::Archived,
            "pending" => FormFilter::Pending,
            "approvalSent" => FormFilter::ApprovalSent,
            "done" => FormFilter::Done,
            "notDone" => FormFilter::NotDone,
            other => {
                return Err(ApplicationError::validation(
                    "filter_form",
                    format!("unknown form filter `{other}`"),
                ))
            }
        };
        if !filters.contains(&filter) {
            filters.push(filter);
        }
    }
    Ok(filters)
}

fn parse_column_map(
    field: &str,
    raw: Option<&str>,
) -> Result<BTreeMap<String, String>, ApplicationError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(BTreeMap::new());
    };

    let values: BTreeMap<String, serde_json::Value> = serde_json::from_str(raw)
        .map_err(|error| ApplicationError::validation(field, format!("invalid JSON object: {error}")))?;

    values
        .into_iter()
        .map(|(column, value)| {
            let value = match value {
                serde_json::Value::String(text) => text,
                serde_json::Value::Number(number) => number.to_string(),
                serde_json::Value::Bool(flag) => flag.to_string(),
                other => {
                    return Err(ApplicationError::validation(
                        field,
                        format!("unsupported value `{other}` for `{column}`"),
                    ))
                }
            };
            Ok((column, value))
        })
        .collect()
}

fn parse_date_bound(field: &str, raw: Option<&str>) -> Result<Option<DateBound>, ApplicationError> {
    let map = parse_column_map(field, raw)?;
    let mut entries = map.into_iter();
    let Some((column, value)) = entries.next() else {
        return Ok(None);
    };
    if entries.next().is_some() {
        return Err(ApplicationError::validation(field, "only one date column may be filtered"));
    }

    let value = NaiveDateTime::parse_from_str(&value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| {
            NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                .map(|date| date.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|_| {
            ApplicationError::validation(field, format!("`{value}` is not a valid date"))
        })?;

    Ok(Some(DateBound { column, value }))
}

fn parse_includes(raw: Option<&str>) -> Result<Includes, ApplicationError> {
    let mut includes = Includes::default();
    for token in split_list(raw, ';') {
        match token.as_str() {
            "form" => {}
            "customer" => includes.customer = true,
            "warehouse" => includes.warehouse = true,
            "items" => includes.items = true,
            "items.item" => {
                includes.items = true;
                includes.items_item = true;
            }
            "items.allocation" => {
                includes.items = true;
                includes.items_allocation = true;
            }
            other => {
                return Err(ApplicationError::validation(
                    "includes",
                    format!("unknown relation `{other}`"),
                ))
            }
        }
    }
    Ok(includes)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub current_page: u32,
    pub last_page: u32,
    pub per_page: u32,
    pub total: u64,
    pub from: Option<u64>,
    pub to: Option<u64>,
}

impl PageMeta {
    pub fn new(page: u32, per_page: u32, total: u64, returned: usize) -> Self {
        let per_page_wide = u64::from(per_page.max(1));
        let last_page = u32::try_from(total.div_ceil(per_page_wide)).unwrap_or(u32::MAX).max(1);
        let offset = u64::from(page.saturating_sub(1)) * per_page_wide;
        let (from, to) = if returned == 0 {
            (None, None)
        } else {
            (Some(offset + 1), Some(offset + returned as u64))
        };

        Self { current_page: page, last_page, per_page, total, from, to }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval_params() -> ListParams {
        ListParams {
            join: Some("form,customer,items,item".to_string()),
            fields: Some("sales_return.*".to_string()),
            sort_by: Some("-form.number".to_string()),
            group_by: Some("form.id".to_string()),
            filter_form: Some("notArchived;null".to_string()),
            filter_like: Some("{}".to_string()),
            filter_equal: None,
            filter_date_min: Some(r#"{"form.date":"2022-05-01 00:00:00"}"#.to_string()),
            filter_date_max: Some(r#"{"form.date":"2022-05-17 23:59:59"}"#.to_string()),
            includes: Some("form;customer;warehouse;items.item;items.allocation".to_string()),
            limit: Some(10),
            page: Some(1),
        }
    }

    #[test]
    fn parses_the_approval_list_request() {
        let query = ListQuery::try_from(approval_params()).expect("valid params");

        assert_eq!(query.sort, vec![SortKey { column: "form.number".to_string(), descending: true }]);
        assert_eq!(query.group_by, vec!["form.id".to_string()]);
        assert_eq!(query.form_filters, vec![FormFilter::NotArchived]);
        assert!(query.like.is_empty());
        assert_eq!(query.date_min.as_ref().map(|bound| bound.column.as_str()), Some("form.date"));
        assert_eq!(
            query.date_max.as_ref().map(|bound| bound.value.to_string()),
            Some("2022-05-17 23:59:59".to_string())
        );
        assert_eq!(query.includes, Includes::all());
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn rejects_out_of_range_limit_and_unknown_tokens() {
        let mut params = approval_params();
        params.limit = Some(0);
        assert!(matches!(
            ListQuery::try_from(params),
            Err(ApplicationError::Validation { ref field, .. }) if field == "limit"
        ));

        let mut params = approval_params();
        params.filter_form = Some("sideways".to_string());
        assert!(ListQuery::try_from(params).is_err());

        let mut params = approval_params();
        params.filter_like = Some("[1,2]".to_string());
        assert!(ListQuery::try_from(params).is_err());

        let mut params = approval_params();
        params.filter_date_min = Some(r#"{"form.date":"yesterday"}"#.to_string());
        assert!(ListQuery::try_from(params).is_err());
    }

    #[test]
    fn page_meta_reports_window() {
        let meta = PageMeta::new(2, 10, 25, 10);
        assert_eq!(meta.last_page, 3);
        assert_eq!(meta.from, Some(11));
        assert_eq!(meta.to, Some(20));

        let empty = PageMeta::new(1, 10, 0, 0);
        assert_eq!(empty.last_page, 1);
        assert_eq!(empty.from, None);
    }
}
