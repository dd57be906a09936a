use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::form::{ApprovalAction, ApprovalStage};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("cannot {action} a document in stage {from:?}")]
    InvalidApprovalTransition { from: ApprovalStage, action: ApprovalAction },
    #[error("form `{number}` belongs to a closed period")]
    PeriodClosed { number: String },
    #[error("form `{number}` has a cancellation request in progress")]
    CancellationPending { number: String },
    #[error("journal is not balanced: debit {debit} != credit {credit}")]
    UnbalancedJournal { debit: Decimal, credit: Decimal },
    #[error("journal setting `{name}` for `{feature}` is not configured")]
    MissingPostingAccount { feature: String, name: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    /// True when the document exists but is not in a state that accepts the request.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::InvalidApprovalTransition { .. }
                | Self::PeriodClosed { .. }
                | Self::CancellationPending { .. }
        )
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("{message}")]
    Unauthorized { message: String },
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },
    #[error("{resource} `{id}` was not found")]
    NotFound { resource: String, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn not_found(resource: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound { resource: resource.into(), id: id.to_string() }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

/// Failure classes exposed to API clients. Each variant carries a client-safe message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { field: String, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn message(&self) -> &str {
        match self {
            Self::Unauthorized { message, .. }
            | Self::Unprocessable { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. } => message,
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::Unauthorized { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Unauthorized { message } => {
                Self::Unauthorized { message, correlation_id }
            }
            ApplicationError::Validation { field, message } => {
                Self::Unprocessable { field, message, correlation_id }
            }
            ApplicationError::NotFound { resource, id } => {
                Self::NotFound { message: format!("{resource} `{id}` was not found"), correlation_id }
            }
            ApplicationError::Conflict(message) => Self::Conflict { message, correlation_id },
            ApplicationError::Domain(error) if error.is_conflict() => {
                Self::Conflict { message: error.to_string(), correlation_id }
            }
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                Self::Unprocessable { field: "document".to_owned(), message, correlation_id }
            }
            ApplicationError::Domain(error) => {
                Self::Internal { message: error.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::form::{ApprovalAction, ApprovalStage};
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let interface = ApplicationError::from(DomainError::InvalidApprovalTransition {
            from: ApprovalStage::Approved,
            action: ApprovalAction::Approve,
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Conflict { ref correlation_id, .. } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn unauthorized_keeps_permission_message() {
        let interface = ApplicationError::Unauthorized {
            message: "There is no permission named `approve sales return` for guard `api`."
                .to_owned(),
        }
        .into_interface("req-2");

        assert_eq!(
            interface.message(),
            "There is no permission named `approve sales return` for guard `api`."
        );
    }

    #[test]
    fn validation_error_keeps_field() {
        let interface =
            ApplicationError::validation("reason", "reason is required").into_interface("req-3");

        assert!(matches!(
            interface,
            InterfaceError::Unprocessable { ref field, .. } if field == "reason"
        ));
    }

    #[test]
    fn persistence_error_hides_detail() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn unbalanced_journal_is_internal() {
        let interface = ApplicationError::from(DomainError::UnbalancedJournal {
            debit: Decimal::new(900, 0),
            credit: Decimal::new(1000, 0),
        })
        .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.message(), "An unexpected internal error occurred.");
    }
}
