use std::fmt;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ActorId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormId(pub i64);

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stored tri-state outcome of a review. The integer values are persisted as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ApprovalStatus {
    Rejected,
    Pending,
    Approved,
}

impl ApprovalStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Rejected => -1,
            Self::Pending => 0,
            Self::Approved => 1,
        }
    }
}

impl From<ApprovalStatus> for i64 {
    fn from(value: ApprovalStatus) -> Self {
        value.as_i64()
    }
}

impl TryFrom<i64> for ApprovalStatus {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Rejected),
            0 => Ok(Self::Pending),
            1 => Ok(Self::Approved),
            other => {
                Err(DomainError::InvariantViolation(format!("unknown approval status `{other}`")))
            }
        }
    }
}

/// Position of a document in its approval lifecycle.
///
/// `Draft` and `Queued` are both stored as `approval_status = 0`; a queued form
/// additionally carries `request_approval_at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStage {
    Draft,
    Queued,
    Approved,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Send,
    Approve,
    Reject,
}

impl ApprovalAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ApprovalStage {
    /// Transition table. Decided stages are terminal.
    pub fn apply(self, action: ApprovalAction) -> Result<ApprovalStage, DomainError> {
        use ApprovalAction::*;
        use ApprovalStage::*;

        match (self, action) {
            (Draft, Send) | (Queued, Send) => Ok(Queued),
            (Draft, Approve) | (Queued, Approve) => Ok(Approved),
            (Draft, Reject) | (Queued, Reject) => Ok(Rejected),
            (Approved, _) | (Rejected, _) => {
                Err(DomainError::InvalidApprovalTransition { from: self, action })
            }
        }
    }

    pub fn status(self) -> ApprovalStatus {
        match self {
            Self::Draft | Self::Queued => ApprovalStatus::Pending,
            Self::Approved => ApprovalStatus::Approved,
            Self::Rejected => ApprovalStatus::Rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub id: FormId,
    pub number: String,
    pub date: NaiveDateTime,
    pub approval_status: ApprovalStatus,
    pub cancellation_status: Option<ApprovalStatus>,
    pub close_status: Option<ApprovalStatus>,
    pub done: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub request_approval_by: Option<ActorId>,
    pub request_approval_at: Option<DateTime<Utc>>,
    pub approval_by: Option<ActorId>,
    pub approval_at: Option<DateTime<Utc>>,
    pub approval_reason: Option<String>,
    pub created_by: ActorId,
}

impl Form {
    pub fn stage(&self) -> ApprovalStage {
        match self.approval_status {
            ApprovalStatus::Approved => ApprovalStage::Approved,
            ApprovalStatus::Rejected => ApprovalStage::Rejected,
            ApprovalStatus::Pending if self.request_approval_at.is_some() => ApprovalStage::Queued,
            ApprovalStatus::Pending => ApprovalStage::Draft,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.close_status.is_some()
    }

    /// A requested or granted cancellation freezes the approval lifecycle.
    pub fn has_active_cancellation(&self) -> bool {
        matches!(self.cancellation_status, Some(ApprovalStatus::Pending | ApprovalStatus::Approved))
    }

    /// Checks every precondition for `action` and returns the resulting stage.
    pub fn plan(&self, action: ApprovalAction) -> Result<ApprovalStage, DomainError> {
        let next = self.stage().apply(action)?;

        if self.is_closed() {
            return Err(DomainError::PeriodClosed { number: self.number.clone() });
        }
        if self.has_active_cancellation() {
            return Err(DomainError::CancellationPending { number: self.number.clone() });
        }

        Ok(next)
    }
}

/// Renders `<PREFIX><YY><MM><SEQ>` with a three digit sequence.
pub fn form_number(prefix: &str, date: NaiveDateTime, sequence: u32) -> String {
    format!("{prefix}{:02}{:02}{sequence:03}", date.year() % 100, date.month())
}

/// The `<PREFIX><YY><MM>` part shared by every number of one month.
pub fn form_number_period(prefix: &str, date: NaiveDateTime) -> String {
    format!("{prefix}{:02}{:02}", date.year() % 100, date.month())
}

/// Extracts the sequence from a number produced by [`form_number`].
pub fn form_number_sequence(period: &str, number: &str) -> Option<u32> {
    number.strip_prefix(period)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;

    fn form(status: ApprovalStatus) -> Form {
        Form {
            id: FormId(1),
            number: "SR2205001".to_string(),
            date: NaiveDate::from_ymd_opt(2022, 5, 10)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .expect("valid date"),
            approval_status: status,
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
    fn pending_form_can_be_approved_or_rejected() {
        let pending = form(ApprovalStatus::Pending);
        assert_eq!(pending.plan(ApprovalAction::Approve), Ok(ApprovalStage::Approved));
        assert_eq!(pending.plan(ApprovalAction::Reject), Ok(ApprovalStage::Rejected));
    }

    #[test]
    fn decided_forms_are_terminal() {
        for status in [ApprovalStatus::Approved, ApprovalStatus::Rejected] {
            for action in [ApprovalAction::Send, ApprovalAction::Approve, ApprovalAction::Reject] {
                let error = form(status).plan(action).expect_err("decided form must not move");
                assert!(matches!(error, DomainError::InvalidApprovalTransition { .. }));
            }
        }
    }

    #[test]
    fn sending_queues_and_can_be_repeated() {
        let mut pending = form(ApprovalStatus::Pending);
        assert_eq!(pending.stage(), ApprovalStage::Draft);
        assert_eq!(pending.plan(ApprovalAction::Send), Ok(ApprovalStage::Queued));

        pending.request_approval_at = Some(Utc::now());
        assert_eq!(pending.stage(), ApprovalStage::Queued);
        assert_eq!(pending.plan(ApprovalAction::Send), Ok(ApprovalStage::Queued));
        assert_eq!(pending.plan(ApprovalAction::Approve), Ok(ApprovalStage::Approved));
    }

    #[test]
    fn closed_period_blocks_decisions() {
        let mut closed = form(ApprovalStatus::Pending);
        closed.close_status = Some(ApprovalStatus::Approved);

        let error = closed.plan(ApprovalAction::Approve).expect_err("closed form");
        assert_eq!(error, DomainError::PeriodClosed { number: "SR2205001".to_string() });
    }

    #[test]
    fn pending_cancellation_blocks_decisions_but_rejected_one_does_not() {
        let mut cancelling = form(ApprovalStatus::Pending);
        cancelling.cancellation_status = Some(ApprovalStatus::Pending);
        assert!(matches!(
            cancelling.plan(ApprovalAction::Send),
            Err(DomainError::CancellationPending { .. })
        ));

        cancelling.cancellation_status = Some(ApprovalStatus::Rejected);
        assert_eq!(cancelling.plan(ApprovalAction::Approve), Ok(ApprovalStage::Approved));
    }

    #[test]
    fn approval_status_round_trips_through_integer_encoding() {
        assert_eq!(ApprovalStatus::try_from(-1), Ok(ApprovalStatus::Rejected));
        assert_eq!(i64::from(ApprovalStatus::Approved), 1);
        assert!(ApprovalStatus::try_from(2).is_err());
        assert_eq!(serde_json::to_string(&ApprovalStatus::Pending).expect("json"), "0");
    }

    #[test]
    fn form_numbers_are_sequenced_per_month() {
        let date = NaiveDate::from_ymd_opt(2022, 5, 17)
            .and_then(|date| date.and_hms_opt(9, 30, 0))
            .expect("valid date");

        assert_eq!(form_number("SR", date, 7), "SR2205007");
        assert_eq!(form_number_period("SR", date), "SR2205");
        assert_eq!(form_number_sequence("SR2205", "SR2205042"), Some(42));
        assert_eq!(form_number_sequence("SR2205", "SO2205042"), None);
    }
}
