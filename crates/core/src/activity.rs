use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ActorId, DocumentId};

/// Verb recorded in the `user_activities.activity` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    Created,
    RequestApproval,
    Approved,
    Rejected,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::RequestApproval => "Request Approval",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Created" => Some(Self::Created),
            "Request Approval" => Some(Self::RequestApproval),
            "Approved" => Some(Self::Approved),
            "Rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit row: who did what to which document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActivity {
    pub number: String,
    pub table_id: DocumentId,
    pub table_type: String,
    pub activity: ActivityKind,
    pub actor: ActorId,
    pub date: DateTime<Utc>,
}

impl UserActivity {
    pub fn new(
        number: impl Into<String>,
        table_id: DocumentId,
        table_type: impl Into<String>,
        activity: ActivityKind,
        actor: ActorId,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            number: number.into(),
            table_id,
            table_type: table_type.into(),
            activity,
            actor,
            date,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ActivityKind, UserActivity};
    use crate::domain::{ActorId, DocumentId};

    #[test]
    fn activity_verbs_round_trip() {
        for kind in [
            ActivityKind::Created,
            ActivityKind::RequestApproval,
            ActivityKind::Approved,
            ActivityKind::Rejected,
        ] {
            assert_eq!(ActivityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActivityKind::parse("Deleted"), None);
    }

    #[test]
    fn activity_keeps_document_coordinates() {
        let activity = UserActivity::new(
            "SR2205001",
            DocumentId(7),
            "SalesReturn",
            ActivityKind::Approved,
            ActorId(3),
            Utc::now(),
        );

        assert_eq!(activity.table_type, "SalesReturn");
        assert_eq!(activity.table_id, DocumentId(7));
        assert_eq!(activity.activity.to_string(), "Approved");
    }
}
