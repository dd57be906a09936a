use thiserror::Error;

use ledgerly_core::approvals::StoreError;

pub mod activity;
pub mod form;
pub mod journal;
pub mod listing;
pub mod permission;
pub mod sales_return;
pub mod settings;

pub use activity::SqlActivityRepository;
pub use journal::{JournalRow, SqlJournalRepository};
pub use permission::SqlPermissionGate;
pub use sales_return::SqlSalesReturnStore;
pub use settings::SqlJournalSettingsRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        StoreError::Database(error.to_string())
    }
}

pub(crate) fn decode_error(column: &str, error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(format!("{column}: {error}"))
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}
