use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::approvals::store::ApprovalStore;
use crate::approvals::workflow::ApprovalWorkflow;
use crate::approvals::{Approvable, RequestContext};
use crate::domain::DocumentId;
use crate::errors::ApplicationError;
use crate::permissions::PermissionGate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Conflict,
    Validation,
    Unauthorized,
    Unavailable,
    Internal,
}

impl FailureKind {
    fn classify(error: &ApplicationError) -> Self {
        match error {
            ApplicationError::Unauthorized { .. } => Self::Unauthorized,
            ApplicationError::Validation { .. } => Self::Validation,
            ApplicationError::NotFound { .. } => Self::NotFound,
            ApplicationError::Conflict(_) => Self::Conflict,
            ApplicationError::Domain(domain) if domain.is_conflict() => Self::Conflict,
            ApplicationError::Domain(_) => Self::Validation,
            ApplicationError::Persistence(_) => Self::Unavailable,
            ApplicationError::Configuration(_) => Self::Internal,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    Sent { number: String },
    Failed { error: FailureKind, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub id: DocumentId,
    #[serde(flatten)]
    pub status: ItemStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<ItemOutcome>,
}

impl BulkOutcome {
    fn record(&mut self, id: DocumentId, status: ItemStatus) {
        match status {
            ItemStatus::Sent { .. } => self.sent += 1,
            ItemStatus::Failed { .. } => self.failed += 1,
        }
        self.results.push(ItemOutcome { id, status });
    }
}

/// Keeps first occurrences in request order.
fn unique_ids(ids: &[DocumentId]) -> Vec<DocumentId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

impl<D, S, G> ApprovalWorkflow<D, S, G>
where
    D: Approvable,
    S: ApprovalStore<D>,
    G: PermissionGate,
{
    /// Sends every id for approval in its own transaction. One failing id never
    /// blocks the rest; only an empty batch or a missing permission fails the call.
    pub async fn send_approval(
        &self,
        ctx: &RequestContext,
        ids: &[DocumentId],
    ) -> Result<BulkOutcome, ApplicationError> {
        self.authorize(ctx, "create", None).await?;
        if ids.is_empty() {
            return Err(ApplicationError::validation("ids", "The ids field is required."));
        }

        let mut outcome = BulkOutcome::default();
        for id in unique_ids(ids) {
            match self.submit(ctx, id).await {
                Ok(document) => {
                    outcome.record(id, ItemStatus::Sent { number: document.form().number.clone() })
                }
                Err(error) => {
                    warn!(
                        event_name = "approval.bulk.item_failed",
                        correlation_id = %ctx.correlation_id,
                        document_type = D::TABLE_TYPE,
                        document_id = %id,
                        actor_id = %ctx.actor,
                        error = %error,
                        "document could not be sent for approval"
                    );
                    let kind = FailureKind::classify(&error);
                    let exposed = error.into_interface(ctx.correlation_id.clone());
                    outcome.record(
                        id,
                        ItemStatus::Failed { error: kind, message: exposed.message().to_string() },
                    );
                }
            }
        }

        info!(
            event_name = "approval.bulk.completed",
            correlation_id = %ctx.correlation_id,
            document_type = D::TABLE_TYPE,
            actor_id = %ctx.actor,
            sent = outcome.sent,
            failed = outcome.failed,
            "bulk send approval finished"
        );
        Ok(outcome)
    }
}
