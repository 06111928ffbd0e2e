//! Append-only audit trail of approval actions
use super::types::TimeStamp;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    #[n(0)]
    Approved,
    #[n(1)]
    Rejected,
    #[n(2)]
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalAction {
    #[n(0)]
    pub approver_spec_id: String,
    #[n(1)]
    #[serde(default)]
    pub actor_id: String, // principal that acted, after any delegation
    #[n(2)]
    pub decision: Decision,
    #[n(3)]
    #[serde(default)]
    pub comment: Option<String>,
    #[n(4)]
    pub acted_at: TimeStamp,
    #[n(5)]
    #[serde(default)]
    pub signature_present: bool, // carried through, never verified
}

impl ApprovalAction {
    pub fn new(
        approver_spec_id: impl Into<String>,
        actor_id: impl Into<String>,
        decision: Decision,
    ) -> Self {
        Self {
            approver_spec_id: approver_spec_id.into(),
            actor_id: actor_id.into(),
            decision,
            comment: None,
            acted_at: TimeStamp::new(),
            signature_present: false,
        }
    }
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
    pub fn with_signature(mut self, present: bool) -> Self {
        self.signature_present = present;
        self
    }
    pub fn acted_at(mut self, at: TimeStamp) -> Self {
        self.acted_at = at;
        self
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AuditTrail {
    #[n(0)]
    entries: Vec<ApprovalAction>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the trail by value, so a snapshot a caller kept by cloning is
    /// never touched.
    pub fn append(mut self, action: ApprovalAction) -> Self {
        self.entries.push(action);
        self
    }

    pub fn action_for(&self, approver_spec_id: &str) -> Option<&ApprovalAction> {
        self.entries
            .iter()
            .find(|action| action.approver_spec_id == approver_spec_id)
    }

    /// Entries by `acted_at`, ties kept in insertion order.
    pub fn ordered_entries(&self) -> Vec<&ApprovalAction> {
        let mut ordered: Vec<&ApprovalAction> = self.entries.iter().collect();
        ordered.sort_by_key(|action| action.acted_at);
        ordered
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[ApprovalAction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
