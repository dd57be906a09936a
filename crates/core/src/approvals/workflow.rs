use std::marker::PhantomData;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::activity::{ActivityKind, UserActivity};
use crate::approvals::store::{ApprovalStore, Decision, StoreError, Submission};
use crate::approvals::{Approvable, RequestContext};
use crate::domain::form::{ApprovalAction, ApprovalStage};
use crate::domain::DocumentId;
use crate::errors::{ApplicationError, DomainError};
use crate::permissions::{authorize, permission_name, PermissionGate};
use crate::query::{ListParams, ListQuery, Page};

pub const MAX_REASON_LENGTH: usize = 255;

/// Permission-gated lifecycle operations for one document type.
///
/// Every operation checks permission before it looks at its input, so callers
/// without the permission learn nothing about the document.
pub struct ApprovalWorkflow<D, S, G> {
    store: S,
    gate: G,
    guard: String,
    document: PhantomData<fn() -> D>,
}

impl<D, S, G> ApprovalWorkflow<D, S, G>
where
    D: Approvable,
    S: ApprovalStore<D>,
    G: PermissionGate,
{
    pub fn new(store: S, gate: G, guard: impl Into<String>) -> Self {
        Self { store, gate, guard: guard.into(), document: PhantomData }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        draft: D::Draft,
    ) -> Result<D, ApplicationError> {
        self.authorize(ctx, "create", None).await?;
        D::validate_draft(&draft)?;

        let document = self
            .store
            .create(draft, ctx.actor, Utc::now())
            .await
            .map_err(|error| self.store_failure(ctx, None, error))?;

        info!(
            event_name = "approval.document.created",
            correlation_id = %ctx.correlation_id,
            document_type = D::TABLE_TYPE,
            document_id = %document.id(),
            actor_id = %ctx.actor,
            number = %document.form().number,
            "document created"
        );
        Ok(document)
    }

    pub async fn show(&self, ctx: &RequestContext, id: DocumentId) -> Result<D, ApplicationError> {
        self.authorize(ctx, "read", Some(id)).await?;
        self.load(ctx, id).await
    }

    pub async fn approve(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
    ) -> Result<D, ApplicationError> {
        self.authorize(ctx, "approve", Some(id)).await?;

        let document = self.load(ctx, id).await?;
        let next = self.plan(ctx, &document, ApprovalAction::Approve)?;

        let accounts = self
            .store
            .posting_accounts(D::JOURNAL_FEATURE, D::JOURNAL_SETTINGS)
            .await
            .map_err(|error| self.store_failure(ctx, Some(id), error))?;
        let journal = document.posting_lines(&accounts).map_err(|error| match error {
            DomainError::MissingPostingAccount { .. } => {
                ApplicationError::Configuration(error.to_string())
            }
            other => ApplicationError::Domain(other),
        })?;

        let decided_at = Utc::now();
        let decision = Decision {
            document_id: id,
            form_id: document.form().id,
            outcome: next.status(),
            actor: ctx.actor,
            reason: None,
            decided_at,
            journal,
            activity: UserActivity::new(
                document.form().number.clone(),
                id,
                D::TABLE_TYPE,
                ActivityKind::Approved,
                ctx.actor,
                decided_at,
            ),
        };
        let line_count = decision.journal.len();
        self.store
            .commit_decision(decision)
            .await
            .map_err(|error| self.store_failure(ctx, Some(id), error))?;

        info!(
            event_name = "approval.document.approved",
            correlation_id = %ctx.correlation_id,
            document_type = D::TABLE_TYPE,
            document_id = %id,
            actor_id = %ctx.actor,
            journal_lines = line_count,
            "document approved and journal posted"
        );
        self.load(ctx, id).await
    }

    pub async fn reject(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
        reason: Option<&str>,
    ) -> Result<D, ApplicationError> {
        self.authorize(ctx, "approve", Some(id)).await?;
        let reason = validate_reason(reason).inspect_err(|error| {
            warn!(
                event_name = "approval.document.reject_invalid",
                correlation_id = %ctx.correlation_id,
                document_type = D::TABLE_TYPE,
                document_id = %id,
                actor_id = %ctx.actor,
                error = %error,
                "reject request failed validation"
            );
        })?;

        let document = self.load(ctx, id).await?;
        let next = self.plan(ctx, &document, ApprovalAction::Reject)?;

        let decided_at = Utc::now();
        let decision = Decision {
            document_id: id,
            form_id: document.form().id,
            outcome: next.status(),
            actor: ctx.actor,
            reason: Some(reason),
            decided_at,
            journal: Vec::new(),
            activity: UserActivity::new(
                document.form().number.clone(),
                id,
                D::TABLE_TYPE,
                ActivityKind::Rejected,
                ctx.actor,
                decided_at,
            ),
        };
        self.store
            .commit_decision(decision)
            .await
            .map_err(|error| self.store_failure(ctx, Some(id), error))?;

        info!(
            event_name = "approval.document.rejected",
            correlation_id = %ctx.correlation_id,
            document_type = D::TABLE_TYPE,
            document_id = %id,
            actor_id = %ctx.actor,
            "document rejected"
        );
        self.load(ctx, id).await
    }

    /// Moves one document into the approval queue.
    pub async fn send(&self, ctx: &RequestContext, id: DocumentId) -> Result<D, ApplicationError> {
        self.authorize(ctx, "create", Some(id)).await?;
        self.submit(ctx, id).await
    }

    pub async fn list_pending(
        &self,
        ctx: &RequestContext,
        params: ListParams,
    ) -> Result<Page<D>, ApplicationError> {
        self.authorize(ctx, "approve", None).await?;
        let query = ListQuery::try_from(params)?;

        let page = self
            .store
            .list_pending(&query)
            .await
            .map_err(|error| self.store_failure(ctx, None, error))?;

        info!(
            event_name = "approval.list.read",
            correlation_id = %ctx.correlation_id,
            document_type = D::TABLE_TYPE,
            actor_id = %ctx.actor,
            total = page.meta.total,
            page = page.meta.current_page,
            "pending approval list read"
        );
        Ok(page)
    }

    /// Submission without the permission check; the caller has already authorized.
    pub(crate) async fn submit(
        &self,
        ctx: &RequestContext,
        id: DocumentId,
    ) -> Result<D, ApplicationError> {
        let document = self.load(ctx, id).await?;
        let previous = document.form().stage();
        self.plan(ctx, &document, ApprovalAction::Send)?;

        let requested_at = Utc::now();
        let submission = Submission {
            document_id: id,
            form_id: document.form().id,
            actor: ctx.actor,
            requested_at,
            activity: UserActivity::new(
                document.form().number.clone(),
                id,
                D::TABLE_TYPE,
                ActivityKind::RequestApproval,
                ctx.actor,
                requested_at,
            ),
        };
        self.store
            .commit_submission(submission)
            .await
            .map_err(|error| self.store_failure(ctx, Some(id), error))?;

        info!(
            event_name = "approval.document.sent",
            correlation_id = %ctx.correlation_id,
            document_type = D::TABLE_TYPE,
            document_id = %id,
            actor_id = %ctx.actor,
            resend = previous == ApprovalStage::Queued,
            "document sent for approval"
        );
        self.load(ctx, id).await
    }

    /// Checks `action` against the caller's permissions. Transports call this
    /// before decoding a request so a denied caller never sees input errors.
    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        action: &str,
        id: Option<DocumentId>,
    ) -> Result<(), ApplicationError> {
        let permission = permission_name(action, D::SUBJECT);
        authorize(&self.gate, ctx.actor, &permission, &self.guard).await.inspect_err(|error| {
            warn!(
                event_name = "approval.permission.denied",
                correlation_id = %ctx.correlation_id,
                document_type = D::TABLE_TYPE,
                document_id = ?id.map(|id| id.0),
                actor_id = %ctx.actor,
                permission = %permission,
                error = %error,
                "permission check failed"
            );
        })
    }

    async fn load(&self, ctx: &RequestContext, id: DocumentId) -> Result<D, ApplicationError> {
        self.store
            .find(id)
            .await
            .map_err(|error| self.store_failure(ctx, Some(id), error))?
            .ok_or_else(|| ApplicationError::not_found(D::SUBJECT, id))
    }

    fn plan(
        &self,
        ctx: &RequestContext,
        document: &D,
        action: ApprovalAction,
    ) -> Result<ApprovalStage, ApplicationError> {
        document.form().plan(action).map_err(|error| {
            warn!(
                event_name = "approval.transition.refused",
                correlation_id = %ctx.correlation_id,
                document_type = D::TABLE_TYPE,
                document_id = %document.id(),
                actor_id = %ctx.actor,
                action = %action,
                error = %error,
                "document is not in a state that allows this action"
            );
            ApplicationError::Domain(error)
        })
    }

    fn store_failure(
        &self,
        ctx: &RequestContext,
        id: Option<DocumentId>,
        error: StoreError,
    ) -> ApplicationError {
        let mapped = match &error {
            StoreError::NotFound(missing) => ApplicationError::not_found(D::SUBJECT, missing),
            StoreError::StaleState(number) => ApplicationError::Conflict(format!(
                "form `{number}` was changed by a concurrent request"
            )),
            StoreError::MissingJournalSetting { .. } => {
                ApplicationError::Configuration(error.to_string())
            }
            StoreError::InvalidInput { field, message } => {
                ApplicationError::validation(field.clone(), message.clone())
            }
            StoreError::Database(message) => ApplicationError::Persistence(message.clone()),
        };

        match &mapped {
            ApplicationError::Persistence(_) | ApplicationError::Configuration(_) => error!(
                event_name = "approval.store.failed",
                correlation_id = %ctx.correlation_id,
                document_type = D::TABLE_TYPE,
                document_id = ?id.map(|id| id.0),
                actor_id = %ctx.actor,
                error = %error,
                "approval store operation failed"
            ),
            _ => warn!(
                event_name = "approval.store.refused",
                correlation_id = %ctx.correlation_id,
                document_type = D::TABLE_TYPE,
                document_id = ?id.map(|id| id.0),
                actor_id = %ctx.actor,
                error = %error,
                "approval store refused the operation"
            ),
        }
        mapped
    }
}

fn validate_reason(reason: Option<&str>) -> Result<String, ApplicationError> {
    let reason = reason.map(str::trim).unwrap_or_default();
    if reason.is_empty() {
        return Err(ApplicationError::validation("reason", "The reason field is required."));
    }
    if reason.chars().count() > MAX_REASON_LENGTH {
        return Err(ApplicationError::validation(
            "reason",
            format!("The reason may not be greater than {MAX_REASON_LENGTH} characters."),
        ));
    }
    Ok(reason.to_string())
}
