use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::approvals::Approvable;
use crate::domain::form::Form;
use crate::domain::{DocumentId, MasterRef};
use crate::errors::{ApplicationError, DomainError};
use crate::ledger::{
    sales_return_lines, JournalLine, PostingAccounts, SalesReturnAccounts, SALES_FEATURE,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReturnItem {
    pub item_id: i64,
    pub quantity: Decimal,
    pub price: Decimal,
    pub allocation_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<MasterRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<MasterRef>,
}

impl SalesReturnItem {
    pub fn total(&self) -> Decimal {
        self.quantity * self.price
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReturn {
    pub id: DocumentId,
    pub form: Form,
    pub customer_id: i64,
    pub warehouse_id: i64,
    pub amount: Decimal,
    pub tax: Decimal,
    pub items: Vec<SalesReturnItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<MasterRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<MasterRef>,
}

impl SalesReturn {
    pub fn net(&self) -> Decimal {
        self.amount - self.tax
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSalesReturnItem {
    pub item_id: i64,
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub allocation_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSalesReturn {
    pub date: NaiveDateTime,
    pub customer_id: i64,
    pub warehouse_id: i64,
    pub amount: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    pub items: Vec<NewSalesReturnItem>,
}

impl Approvable for SalesReturn {
    type Draft = NewSalesReturn;

    const TABLE_TYPE: &'static str = "SalesReturn";
    const SUBJECT: &'static str = "sales return";
    const NUMBER_PREFIX: &'static str = "SR";
    const JOURNAL_FEATURE: &'static str = SALES_FEATURE;
    const JOURNAL_SETTINGS: &'static [&'static str] = &SalesReturnAccounts::SETTINGS;

    fn id(&self) -> DocumentId {
        self.id
    }

    fn form(&self) -> &Form {
        &self.form
    }

    fn form_mut(&mut self) -> &mut Form {
        &mut self.form
    }

    fn amount(&self) -> Decimal {
        self.amount
    }

    fn tax(&self) -> Decimal {
        self.tax
    }

    fn validate_draft(draft: &NewSalesReturn) -> Result<(), ApplicationError> {
        if draft.items.is_empty() {
            return Err(ApplicationError::validation("items", "at least one item is required"));
        }
        for (index, item) in draft.items.iter().enumerate() {
            if item.quantity <= Decimal::ZERO {
                return Err(ApplicationError::validation(
                    format!("items.{index}.quantity"),
                    "quantity must be greater than zero",
                ));
            }
            if item.price.is_sign_negative() {
                return Err(ApplicationError::validation(
                    format!("items.{index}.price"),
                    "price must not be negative",
                ));
            }
        }
        if draft.amount.is_sign_negative() {
            return Err(ApplicationError::validation("amount", "amount must not be negative"));
        }
        if draft.tax.is_sign_negative() {
            return Err(ApplicationError::validation("tax", "tax must not be negative"));
        }
        if draft.tax > draft.amount {
            return Err(ApplicationError::validation("tax", "tax must not exceed amount"));
        }

        let items_total: Decimal =
            draft.items.iter().map(|item| item.quantity * item.price).sum();
        let net = draft.amount - draft.tax;
        if items_total != net {
            return Err(ApplicationError::validation(
                "amount",
                format!("amount minus tax ({net}) must equal the item total ({items_total})"),
            ));
        }

        Ok(())
    }

    fn draft_date(draft: &NewSalesReturn) -> NaiveDateTime {
        draft.date
    }

    fn from_draft(id: DocumentId, form: Form, draft: NewSalesReturn) -> Self {
        Self {
            id,
            form,
            customer_id: draft.customer_id,
            warehouse_id: draft.warehouse_id,
            amount: draft.amount,
            tax: draft.tax,
            items: draft
                .items
                .into_iter()
                .map(|item| SalesReturnItem {
                    item_id: item.item_id,
                    quantity: item.quantity,
                    price: item.price,
                    allocation_id: item.allocation_id,
                    item: None,
                    allocation: None,
                })
                .collect(),
            customer: None,
            warehouse: None,
        }
    }

    fn posting_lines(&self, accounts: &PostingAccounts) -> Result<Vec<JournalLine>, DomainError> {
        let accounts = SalesReturnAccounts::resolve(accounts)?;
        sales_return_lines(self.amount, self.tax, &accounts)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::form::{ApprovalStatus, FormId};
    use crate::domain::ActorId;
    use crate::ledger::{
        ChartOfAccountId, ACCOUNT_RECEIVABLE, INCOME_TAX_PAYABLE, SALES_INCOME,
    };

    fn draft() -> NewSalesReturn {
        NewSalesReturn {
            date: NaiveDate::from_ymd_opt(2022, 5, 10)
                .and_then(|date| date.and_hms_opt(8, 0, 0))
                .expect("valid date"),
            customer_id: 1,
            warehouse_id: 1,
            amount: Decimal::new(1000, 0),
            tax: Decimal::new(100, 0),
            items: vec![
                NewSalesReturnItem {
                    item_id: 1,
                    quantity: Decimal::new(5, 0),
                    price: Decimal::new(100, 0),
                    allocation_id: Some(1),
                },
                NewSalesReturnItem {
                    item_id: 2,
                    quantity: Decimal::new(2, 0),
                    price: Decimal::new(200, 0),
                    allocation_id: None,
                },
            ],
        }
    }

    fn form() -> Form {
        Form {
            id: FormId(9),
            number: "SR2205001".to_string(),
            date: draft().date,
            approval_status: ApprovalStatus::Pending,
            cancellation_status: None,
            close_status: None,
            done: false,
            archived_at: None,
            request_approval_by: None,
            request_approval_at: None,
            approval_by: None,
            approval_at: None,
            approval_reason: None,
            created_by: ActorId(1),
        }
    }

    #[test]
    fn consistent_draft_passes_validation() {
        assert_eq!(SalesReturn::validate_draft(&draft()), Ok(()));
    }

    #[test]
    fn net_must_match_item_total() {
        let mut mismatched = draft();
        mismatched.tax = Decimal::new(50, 0);

        let error = SalesReturn::validate_draft(&mismatched).expect_err("mismatch");
        assert!(matches!(error, ApplicationError::Validation { ref field, .. } if field == "amount"));
    }

    #[test]
    fn items_must_be_present_and_positive() {
        let mut empty = draft();
        empty.items.clear();
        assert!(matches!(
            SalesReturn::validate_draft(&empty),
            Err(ApplicationError::Validation { ref field, .. }) if field == "items"
        ));

        let mut zero = draft();
        zero.items[1].quantity = Decimal::ZERO;
        assert!(matches!(
            SalesReturn::validate_draft(&zero),
            Err(ApplicationError::Validation { ref field, .. }) if field == "items.1.quantity"
        ));
    }

    #[test]
    fn negative_tax_is_rejected() {
        let mut negative = draft();
        negative.tax = Decimal::new(-1, 0);
        assert!(SalesReturn::validate_draft(&negative).is_err());
    }

    #[test]
    fn posting_uses_configured_sales_accounts() {
        let document = SalesReturn::from_draft(DocumentId(3), form(), draft());
        let accounts = PostingAccounts::new(SALES_FEATURE)
            .with(ACCOUNT_RECEIVABLE, ChartOfAccountId(10))
            .with(SALES_INCOME, ChartOfAccountId(40))
            .with(INCOME_TAX_PAYABLE, ChartOfAccountId(21));

        let lines = document.posting_lines(&accounts).expect("posting");

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], JournalLine::credit(ChartOfAccountId(10), Decimal::new(1000, 0)));
        assert_eq!(document.net(), Decimal::new(900, 0));
        assert_eq!(document.items[0].total(), Decimal::new(500, 0));
    }

    #[test]
    fn document_view_serializes_amounts_and_form() {
        let document = SalesReturn::from_draft(DocumentId(3), form(), draft());
        let json = serde_json::to_value(&document).expect("json");

        assert_eq!(json["id"], 3);
        assert_eq!(json["amount"], "1000");
        assert_eq!(json["form"]["number"], "SR2205001");
        assert_eq!(json["form"]["approval_status"], 0);
        assert!(json.get("customer").is_none());
    }
}
