use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::activity::{ActivityKind, UserActivity};
use crate::approvals::store::{ApprovalStore, Decision, StoreError, Submission};
use crate::approvals::Approvable;
use crate::domain::form::{
    form_number, form_number_period, form_number_sequence, ApprovalStatus, Form, FormId,
};
use crate::domain::{ActorId, DocumentId};
use crate::ledger::{ChartOfAccountId, JournalLine, PostingAccounts};
use crate::query::{FormFilter, ListQuery, Page, PageMeta};

struct State<D> {
    documents: BTreeMap<DocumentId, D>,
    journals: Vec<(FormId, JournalLine)>,
    activities: Vec<UserActivity>,
    next_id: i64,
    commit_failure: Option<String>,
}

/// Process-local store with the same commit rules as the SQL one.
pub struct InMemoryApprovalStore<D> {
    state: RwLock<State<D>>,
    settings: HashMap<String, PostingAccounts>,
}

impl<D: Approvable> Default for InMemoryApprovalStore<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Approvable> InMemoryApprovalStore<D> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                documents: BTreeMap::new(),
                journals: Vec::new(),
                activities: Vec::new(),
                next_id: 1,
                commit_failure: None,
            }),
            settings: HashMap::new(),
        }
    }

    pub fn with_posting_accounts(
        mut self,
        feature: &str,
        accounts: &[(&str, ChartOfAccountId)],
    ) -> Self {
        let resolved = accounts
            .iter()
            .fold(PostingAccounts::new(feature), |resolved, (name, id)| resolved.with(*name, *id));
        self.settings.insert(feature.to_string(), resolved);
        self
    }

    /// Replaces a stored form, e.g. to simulate a closed period.
    pub async fn update_form(&self, id: DocumentId, update: impl FnOnce(&mut Form)) -> bool {
        let mut state = self.state.write().await;
        match state.documents.get_mut(&id) {
            Some(document) => {
                update(document.form_mut());
                true
            }
            None => false,
        }
    }

    /// Makes every later commit fail with `StoreError::Database(message)`.
    pub async fn fail_commits(&self, message: impl Into<String>) {
        self.state.write().await.commit_failure = Some(message.into());
    }

    pub async fn journal_for(&self, form: FormId) -> Vec<JournalLine> {
        let state = self.state.read().await;
        state
            .journals
            .iter()
            .filter(|(owner, _)| *owner == form)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub async fn activities(&self) -> Vec<UserActivity> {
        self.state.read().await.activities.clone()
    }
}

fn open_for_transition(form: &Form) -> bool {
    form.approval_status == ApprovalStatus::Pending
        && !form.is_closed()
        && !form.has_active_cancellation()
}

fn matches_filters(form: &Form, query: &ListQuery) -> bool {
    if form.approval_status != ApprovalStatus::Pending {
        return false;
    }
    let archived = form.archived_at.is_some();
    if query.wants_archived() {
        if !archived {
            return false;
        }
    } else if archived || form.is_closed() {
        return false;
    }

    let form_filters = query.form_filters.iter().all(|filter| match filter {
        FormFilter::NotArchived => !archived,
        FormFilter::Archived => archived,
        FormFilter::Pending => form.approval_status == ApprovalStatus::Pending,
        FormFilter::ApprovalSent => form.request_approval_at.is_some(),
        FormFilter::Done => form.done,
        FormFilter::NotDone => !form.done,
    });
    let after_min = query.date_min.as_ref().is_none_or(|bound| form.date >= bound.value);
    let before_max = query.date_max.as_ref().is_none_or(|bound| form.date <= bound.value);

    form_filters && after_min && before_max
}

fn unsupported(field: &str, column: &str) -> StoreError {
    StoreError::InvalidInput {
        field: field.to_string(),
        message: format!("column `{column}` is not sortable or filterable"),
    }
}

#[async_trait]
impl<D: Approvable> ApprovalStore<D> for InMemoryApprovalStore<D> {
    async fn find(&self, id: DocumentId) -> Result<Option<D>, StoreError> {
        Ok(self.state.read().await.documents.get(&id).cloned())
    }

    async fn posting_accounts(
        &self,
        feature: &str,
        names: &[&str],
    ) -> Result<PostingAccounts, StoreError> {
        let configured = self.settings.get(feature);
        for name in names {
            if configured.is_none_or(|accounts| !accounts.accounts.contains_key(*name)) {
                return Err(StoreError::MissingJournalSetting {
                    feature: feature.to_string(),
                    name: (*name).to_string(),
                });
            }
        }
        Ok(configured.cloned().unwrap_or_else(|| PostingAccounts::new(feature)))
    }

    async fn create(
        &self,
        draft: D::Draft,
        actor: ActorId,
        created_at: DateTime<Utc>,
    ) -> Result<D, StoreError> {
        let mut state = self.state.write().await;
        let date = D::draft_date(&draft);
        let period = form_number_period(D::NUMBER_PREFIX, date);
        let sequence = state
            .documents
            .values()
            .filter_map(|document| form_number_sequence(&period, &document.form().number))
            .max()
            .unwrap_or(0)
            + 1;

        let id = DocumentId(state.next_id);
        state.next_id += 1;
        let form = Form {
            id: FormId(id.0),
            number: form_number(D::NUMBER_PREFIX, date, sequence),
            date,
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
            created_by: actor,
        };
        let document = D::from_draft(id, form, draft);

        state.activities.push(UserActivity::new(
            document.form().number.clone(),
            id,
            D::TABLE_TYPE,
            ActivityKind::Created,
            actor,
            created_at,
        ));
        state.documents.insert(id, document.clone());
        Ok(document)
    }

    async fn commit_decision(&self, decision: Decision) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(message) = &state.commit_failure {
            return Err(StoreError::Database(message.clone()));
        }
        let document = state
            .documents
            .get_mut(&decision.document_id)
            .ok_or(StoreError::NotFound(decision.document_id))?;
        let form = document.form_mut();
        if !open_for_transition(form) {
            return Err(StoreError::StaleState(form.number.clone()));
        }

        form.approval_status = decision.outcome;
        form.approval_by = Some(decision.actor);
        form.approval_at = Some(decision.decided_at);
        form.approval_reason = decision.reason;
        form.done = decision.outcome == ApprovalStatus::Approved;

        state.journals.extend(decision.journal.into_iter().map(|line| (decision.form_id, line)));
        state.activities.push(decision.activity);
        Ok(())
    }

    async fn commit_submission(&self, submission: Submission) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(message) = &state.commit_failure {
            return Err(StoreError::Database(message.clone()));
        }
        let document = state
            .documents
            .get_mut(&submission.document_id)
            .ok_or(StoreError::NotFound(submission.document_id))?;
        let form = document.form_mut();
        if !open_for_transition(form) {
            return Err(StoreError::StaleState(form.number.clone()));
        }

        form.request_approval_by = Some(submission.actor);
        form.request_approval_at = Some(submission.requested_at);
        state.activities.push(submission.activity);
        Ok(())
    }

    async fn list_pending(&self, query: &ListQuery) -> Result<Page<D>, StoreError> {
        if let Some(column) = query.like.keys().chain(query.equal.keys()).next() {
            return Err(unsupported("filter_like", column));
        }
        for key in &query.sort {
            if !matches!(key.column.as_str(), "id" | "form.number" | "form.date") {
                return Err(unsupported("sort_by", &key.column));
            }
        }

        let state = self.state.read().await;
        let mut rows: Vec<D> = state
            .documents
            .values()
            .filter(|document| matches_filters(document.form(), query))
            .cloned()
            .collect();

        rows.sort_by(|left, right| {
            query
                .sort
                .iter()
                .map(|key| {
                    let ordering = match key.column.as_str() {
                        "form.number" => left.form().number.cmp(&right.form().number),
                        "form.date" => left.form().date.cmp(&right.form().date),
                        _ => left.id().cmp(&right.id()),
                    };
                    if key.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| left.id().cmp(&right.id()))
        });

        let total = rows.len() as u64;
        let data: Vec<D> = rows
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.limit as usize)
            .collect();
        let meta = PageMeta::new(query.page, query.limit, total, data.len());
        Ok(Page { data, meta })
    }
}
