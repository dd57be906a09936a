pub mod activity;
pub mod approvals;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod permissions;
pub mod query;

pub use activity::{ActivityKind, UserActivity};
pub use approvals::{
    Approvable, ApprovalStore, ApprovalWorkflow, BulkOutcome, Decision, ItemOutcome, ItemStatus,
    RequestContext, StoreError, Submission,
};
pub use domain::form::{ApprovalAction, ApprovalStage, ApprovalStatus, Form, FormId};
pub use domain::sales_return::{NewSalesReturn, NewSalesReturnItem, SalesReturn, SalesReturnItem};
pub use domain::{ActorId, DocumentId, MasterRef};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use ledger::{ChartOfAccountId, JournalLine, PostingAccounts};
pub use permissions::{PermissionGate, StaticPermissionGate};
pub use query::{ListParams, ListQuery, Page, PageMeta};
