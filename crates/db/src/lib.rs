pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool, TenantPools};
pub use fixtures::{ReferenceDataset, SeedResult, VerificationResult};
pub use repositories::{
    RepositoryError, SqlActivityRepository, SqlJournalRepository, SqlJournalSettingsRepository,
    SqlPermissionGate, SqlSalesReturnStore,
};
