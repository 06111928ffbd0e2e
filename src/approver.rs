//! Approver slots and the approval configuration attached to a form template
use super::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode, Serialize, Deserialize,
)]
pub enum ApprovalMode {
    /// Approvers act one at a time in ascending `order`.
    #[n(0)]
    #[serde(rename = "sequential")]
    Sequential,
    /// A single approval from any slot clears the request.
    #[n(1)]
    #[serde(rename = "any")]
    AnyOne,
}

/// One slot in an approval chain.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproverSpec {
    #[n(0)]
    pub id: String,
    #[n(1)]
    #[serde(rename = "userId")]
    pub principal_id: String, // user or role allowed to act on this slot
    #[n(2)]
    pub order: u32, // 1-based
    #[n(3)]
    #[serde(default = "required_by_default")]
    pub is_required: bool,
    #[n(4)]
    #[serde(default)]
    pub can_delegate: bool,
}

fn required_by_default() -> bool {
    true
}

impl ApproverSpec {
    /// A required, non-delegatable slot.
    pub fn new(id: impl Into<String>, principal_id: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            principal_id: principal_id.into(),
            order,
            is_required: true,
            can_delegate: false,
        }
    }
    pub fn optional(mut self) -> Self {
        self.is_required = false;
        self
    }
    pub fn delegatable(mut self) -> Self {
        self.can_delegate = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[n(0)]
    pub mode: ApprovalMode,
    #[n(1)]
    pub approvers: Vec<ApproverSpec>,
}

impl ApprovalConfig {
    pub fn new(mode: ApprovalMode) -> Self {
        Self {
            mode,
            approvers: vec![],
        }
    }
    pub fn sequential() -> Self {
        Self::new(ApprovalMode::Sequential)
    }
    pub fn any_one() -> Self {
        Self::new(ApprovalMode::AnyOne)
    }
    pub fn with_approver(mut self, spec: ApproverSpec) -> Self {
        self.approvers.push(spec);
        self
    }

    /// Parse the template's `{ mode, approvers }` JSON shape and reject it
    /// early if it is not a usable chain.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigurationError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.approvers.is_empty() {
            return Err(ConfigurationError::Empty);
        }

        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        for spec in &self.approvers {
            if spec.order == 0 {
                return Err(ConfigurationError::InvalidOrder(spec.id.clone()));
            }
            if !ids.insert(spec.id.as_str()) {
                return Err(ConfigurationError::DuplicateSlotId(spec.id.clone()));
            }
            // ties only matter when order decides whose turn it is
            if self.mode == ApprovalMode::Sequential && !orders.insert(spec.order) {
                return Err(ConfigurationError::DuplicateOrder(spec.order));
            }
        }

        Ok(())
    }

    pub fn slot(&self, slot_id: &str) -> Option<&ApproverSpec> {
        self.approvers.iter().find(|spec| spec.id == slot_id)
    }

    /// Slots sorted by `order`. The sort is stable so AnyOne chains with
    /// repeated orders keep their configured sequence.
    pub fn slots_in_order(&self) -> Vec<&ApproverSpec> {
        let mut slots: Vec<&ApproverSpec> = self.approvers.iter().collect();
        slots.sort_by_key(|spec| spec.order);
        slots
    }

    pub fn slots_for<'a, 'p>(
        &'a self,
        principal_id: &'p str,
    ) -> impl Iterator<Item = &'a ApproverSpec> + use<'a, 'p> {
        self.slots_in_order()
            .into_iter()
            .filter(move |spec| spec.principal_id == principal_id)
    }

    pub fn has_required_slots(&self) -> bool {
        self.approvers.iter().any(|spec| spec.is_required)
    }

    /// SHA-256 over the CBOR encoding. Used to pin the snapshot taken at
    /// submission.
    pub fn fingerprint(&self) -> Result<String, ConfigurationError> {
        let cbor = minicbor::to_vec(self).map_err(|e| ConfigurationError::Malformed(e.to_string()))?;
        Ok(sha256::digest(&cbor))
    }
}
