use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::approvals::store::StoreError;
use crate::domain::ActorId;
use crate::errors::ApplicationError;

/// Answers "does actor X hold permission Y under guard G".
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn has_permission(
        &self,
        actor: ActorId,
        permission: &str,
        guard: &str,
    ) -> Result<bool, StoreError>;
}

/// `<action> <subject>`, e.g. `approve sales return`.
pub fn permission_name(action: &str, subject: &str) -> String {
    format!("{action} {subject}")
}

pub fn unauthorized_message(permission: &str, guard: &str) -> String {
    format!("There is no permission named `{permission}` for guard `{guard}`.")
}

pub async fn authorize(
    gate: &dyn PermissionGate,
    actor: ActorId,
    permission: &str,
    guard: &str,
) -> Result<(), ApplicationError> {
    let granted = gate
        .has_permission(actor, permission, guard)
        .await
        .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

    if granted {
        Ok(())
    } else {
        Err(ApplicationError::Unauthorized { message: unauthorized_message(permission, guard) })
    }
}

/// Fixed grants, for tests and single-user tooling.
#[derive(Clone, Debug, Default)]
pub struct StaticPermissionGate {
    guard: String,
    grants: HashMap<ActorId, HashSet<String>>,
}

impl StaticPermissionGate {
    pub fn new(guard: impl Into<String>) -> Self {
        Self { guard: guard.into(), grants: HashMap::new() }
    }

    pub fn grant(mut self, actor: ActorId, permission: impl Into<String>) -> Self {
        self.grants.entry(actor).or_default().insert(permission.into());
        self
    }

    pub fn grant_all(mut self, actor: ActorId, permissions: &[&str]) -> Self {
        let granted = self.grants.entry(actor).or_default();
        granted.extend(permissions.iter().map(|permission| permission.to_string()));
        self
    }
}

#[async_trait]
impl PermissionGate for StaticPermissionGate {
    async fn has_permission(
        &self,
        actor: ActorId,
        permission: &str,
        guard: &str,
    ) -> Result<bool, StoreError> {
        if guard != self.guard {
            return Ok(false);
        }
        Ok(self.grants.get(&actor).map(|granted| granted.contains(permission)).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn authorize_passes_for_granted_permission() {
        let gate = StaticPermissionGate::new("api").grant(ActorId(1), "approve sales return");

        authorize(&gate, ActorId(1), "approve sales return", "api").await.expect("granted");
    }

    #[tokio::test]
    async fn authorize_reports_missing_permission_with_guard() {
        let gate = StaticPermissionGate::new("api").grant(ActorId(1), "read sales return");

        let error = authorize(&gate, ActorId(1), "approve sales return", "api")
            .await
            .expect_err("missing permission");

        assert_eq!(
            error,
            ApplicationError::Unauthorized {
                message: "There is no permission named `approve sales return` for guard `api`."
                    .to_string()
            }
        );
    }

    #[tokio::test]
    async fn grants_do_not_leak_across_guards_or_actors() {
        let gate = StaticPermissionGate::new("api").grant(ActorId(1), "approve sales return");

        assert!(!gate.has_permission(ActorId(1), "approve sales return", "web").await.unwrap());
        assert!(!gate.has_permission(ActorId(2), "approve sales return", "api").await.unwrap());
    }

    #[test]
    fn permission_names_join_action_and_subject() {
        assert_eq!(permission_name("approve", "sales return"), "approve sales return");
    }
}
