use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::activity::UserActivity;
use crate::approvals::Approvable;
use crate::domain::form::{ApprovalStatus, FormId};
use crate::domain::{ActorId, DocumentId};
use crate::ledger::{JournalLine, PostingAccounts};
use crate::query::{ListQuery, Page};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document `{0}` was not found")]
    NotFound(DocumentId),
    /// The form changed between read and write; the compare-and-swap lost.
    #[error("form `{0}` was modified concurrently")]
    StaleState(String),
    #[error("journal setting `{name}` for `{feature}` is not configured")]
    MissingJournalSetting { feature: String, name: String },
    #[error("invalid `{field}`: {message}")]
    InvalidInput { field: String, message: String },
    #[error("database error: {0}")]
    Database(String),
}

/// Terminal review outcome, committed together with its journal and activity rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub document_id: DocumentId,
    pub form_id: FormId,
    pub outcome: ApprovalStatus,
    pub actor: ActorId,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
    pub journal: Vec<JournalLine>,
    pub activity: UserActivity,
}

/// Request for review ("send approval").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub document_id: DocumentId,
    pub form_id: FormId,
    pub actor: ActorId,
    pub requested_at: DateTime<Utc>,
    pub activity: UserActivity,
}

/// Persistence seam for one approvable document type.
///
/// `commit_decision` and `commit_submission` must apply all of their writes in
/// one transaction, and only while the form is still pending, open and free of
/// an active cancellation. Losing that race is reported as
/// [`StoreError::StaleState`] with nothing written.
#[async_trait]
pub trait ApprovalStore<D: Approvable>: Send + Sync {
    async fn find(&self, id: DocumentId) -> Result<Option<D>, StoreError>;

    /// Resolves every named journal setting of `feature` or fails with
    /// [`StoreError::MissingJournalSetting`].
    async fn posting_accounts(
        &self,
        feature: &str,
        names: &[&str],
    ) -> Result<PostingAccounts, StoreError>;

    /// Inserts the form, the document and its `Created` activity atomically.
    async fn create(
        &self,
        draft: D::Draft,
        actor: ActorId,
        created_at: DateTime<Utc>,
    ) -> Result<D, StoreError>;

    async fn commit_decision(&self, decision: Decision) -> Result<(), StoreError>;

    async fn commit_submission(&self, submission: Submission) -> Result<(), StoreError>;

    async fn list_pending(&self, query: &ListQuery) -> Result<Page<D>, StoreError>;
}
