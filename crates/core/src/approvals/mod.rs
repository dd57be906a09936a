//! Generic approval engine shared by every transactional document type.
//!
//! A document type implements [`Approvable`]; [`ApprovalWorkflow`] then gives
//! it permission-gated create/show/send/approve/reject and the pending list,
//! backed by any [`store::ApprovalStore`].

pub mod bulk;
pub mod memory;
pub mod store;
pub mod workflow;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::form::Form;
use crate::domain::{ActorId, DocumentId};
use crate::errors::{ApplicationError, DomainError};
use crate::ledger::{JournalLine, PostingAccounts};

pub use bulk::{BulkOutcome, FailureKind, ItemOutcome, ItemStatus};
pub use store::{ApprovalStore, Decision, StoreError, Submission};
pub use workflow::ApprovalWorkflow;

pub trait Approvable: Clone + Send + Sync + 'static {
    /// Validated input for creating a new document.
    type Draft: Clone + Send + Sync + 'static;

    /// Value of `user_activities.table_type`.
    const TABLE_TYPE: &'static str;
    /// Permission subject, as in `approve <SUBJECT>`.
    const SUBJECT: &'static str;
    const NUMBER_PREFIX: &'static str;
    const JOURNAL_FEATURE: &'static str;
    const JOURNAL_SETTINGS: &'static [&'static str];

    fn id(&self) -> DocumentId;
    fn form(&self) -> &Form;
    fn form_mut(&mut self) -> &mut Form;
    fn amount(&self) -> Decimal;
    fn tax(&self) -> Decimal;

    fn validate_draft(draft: &Self::Draft) -> Result<(), ApplicationError>;
    fn draft_date(draft: &Self::Draft) -> NaiveDateTime;
    fn from_draft(id: DocumentId, form: Form, draft: Self::Draft) -> Self;

    /// Balanced journal lines booked when the document is approved.
    fn posting_lines(&self, accounts: &PostingAccounts) -> Result<Vec<JournalLine>, DomainError>;
}

/// Who is calling, and the id that ties their log lines together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub actor: ActorId,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(actor: ActorId, correlation_id: impl Into<String>) -> Self {
        Self { actor, correlation_id: correlation_id.into() }
    }

    pub fn generated(actor: ActorId) -> Self {
        Self::new(actor, Uuid::new_v4().to_string())
    }
}
