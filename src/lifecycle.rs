//! Request lifecycle
//!
//! A request starts as a draft, is submitted for approval, and ends approved,
//! rejected or cancelled. Every transition takes `&self` and hands back a new
//! [`RequestLifecycle`], so a failed call leaves the caller's value exactly as
//! it was.
use super::approver::{ApprovalConfig, ApproverSpec};
use super::engine::{self, Outcome, Resolution};
use super::error::{ApprovalError, ConfigurationError, WorkflowError};
use super::template::FormData;
use super::trail::{ApprovalAction, AuditTrail, Decision};
use super::types::TimeStamp;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    #[n(0)]
    Draft,
    #[n(1)]
    Pending,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Approved | RequestState::Rejected | RequestState::Cancelled
        )
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Draft => "draft",
            RequestState::Pending => "pending",
            RequestState::Approved => "approved",
            RequestState::Rejected => "rejected",
            RequestState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Outcome> for RequestState {
    fn from(value: Outcome) -> Self {
        match value {
            Outcome::Approved => RequestState::Approved,
            Outcome::Rejected => RequestState::Rejected,
        }
    }
}

/// Names the lifecycle operation in an `InvalidTransition` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Submit,
    Edit,
    RecordAction,
    Cancel,
    ReplaceConfig,
    Delegate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Submit => "submit",
            Operation::Edit => "edit",
            Operation::RecordAction => "record an action on",
            Operation::Cancel => "cancel",
            Operation::ReplaceConfig => "change the approvers of",
            Operation::Delegate => "delegate an approver on",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub requester_id: String,
    #[n(3)]
    pub template_id: String,
    #[n(4)]
    pub form_data: FormData,
    #[n(5)]
    pub created_at: TimeStamp,
}

impl Request {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        requester_id: impl Into<String>,
        template_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            requester_id: requester_id.into(),
            template_id: template_id.into(),
            form_data: FormData::new(),
            created_at: TimeStamp::new(),
        }
    }
    pub fn with_form_data(mut self, form_data: FormData) -> Self {
        self.form_data = form_data;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    #[n(0)]
    pub actor_id: String,
    #[n(1)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    #[n(0)]
    pub slot_id: String,
    #[n(1)]
    pub from_principal: String,
    #[n(2)]
    pub to_principal: String,
    #[n(3)]
    pub delegated_at: TimeStamp,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLifecycle {
    #[n(0)]
    request: Request,
    #[n(1)]
    config: ApprovalConfig, // live while drafting, the frozen snapshot once submitted
    #[n(2)]
    config_fingerprint: Option<String>,
    #[n(3)]
    trail: AuditTrail,
    #[n(4)]
    state: RequestState,
    #[n(5)]
    submitted_at: Option<TimeStamp>,
    #[n(6)]
    completed_at: Option<TimeStamp>,
    #[n(7)]
    cancellation: Option<Cancellation>,
    #[n(8)]
    delegations: Vec<Delegation>,
    #[n(9)]
    revision: u64, // bumped by the store on every successful save
}

impl RequestLifecycle {
    pub fn new(request: Request, config: ApprovalConfig) -> Self {
        Self {
            request,
            config,
            config_fingerprint: None,
            trail: AuditTrail::new(),
            state: RequestState::Draft,
            submitted_at: None,
            completed_at: None,
            cancellation: None,
            delegations: vec![],
            revision: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.request.id
    }
    pub fn request(&self) -> &Request {
        &self.request
    }
    pub fn config(&self) -> &ApprovalConfig {
        &self.config
    }
    pub fn config_fingerprint(&self) -> Option<&str> {
        self.config_fingerprint.as_deref()
    }
    pub fn trail(&self) -> &AuditTrail {
        &self.trail
    }
    pub fn state(&self) -> RequestState {
        self.state
    }
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
    pub fn submitted_at(&self) -> Option<TimeStamp> {
        self.submitted_at
    }
    pub fn completed_at(&self) -> Option<TimeStamp> {
        self.completed_at
    }
    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }
    pub fn delegations(&self) -> &[Delegation] {
        &self.delegations
    }
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// Empty unless the request is pending.
    pub fn pending_approvers(&self) -> Result<Vec<&ApproverSpec>, ConfigurationError> {
        if self.state != RequestState::Pending {
            return Ok(vec![]);
        }
        engine::pending_approvers(&self.config, &self.trail)
    }

    pub fn resolution(&self) -> Result<Resolution, ConfigurationError> {
        engine::is_resolved(&self.config, &self.trail)
    }

    pub fn ordered_entries(&self) -> Vec<&ApprovalAction> {
        self.trail.ordered_entries()
    }

    /// True while drafting, or when the stored snapshot still hashes to the
    /// fingerprint taken at submission.
    pub fn verify_snapshot(&self) -> bool {
        match &self.config_fingerprint {
            None => true,
            Some(expected) => self
                .config
                .fingerprint()
                .is_ok_and(|actual| actual == *expected),
        }
    }

    pub fn submit(&self) -> Result<Self, WorkflowError> {
        self.require(RequestState::Draft, Operation::Submit)?;
        self.config.validate()?;

        let mut next = self.clone();
        next.config_fingerprint = Some(self.config.fingerprint()?);
        next.trail = AuditTrail::new();
        next.state = RequestState::Pending;
        next.submitted_at = Some(TimeStamp::new());
        Ok(next)
    }

    pub fn edit(&self, form_data: FormData) -> Result<Self, WorkflowError> {
        self.require(RequestState::Draft, Operation::Edit)?;

        let mut next = self.clone();
        next.request.form_data = form_data;
        Ok(next)
    }

    /// Picks up template edits made before submission.
    pub fn replace_config(&self, config: ApprovalConfig) -> Result<Self, WorkflowError> {
        self.require(RequestState::Draft, Operation::ReplaceConfig)?;
        config.validate()?;

        let mut next = self.clone();
        next.config = config;
        Ok(next)
    }

    pub fn record_action(
        &self,
        approver_id: &str,
        decision: Decision,
        comment: Option<String>,
        signature_present: bool,
    ) -> Result<Self, WorkflowError> {
        self.record_action_at(
            approver_id,
            decision,
            comment,
            signature_present,
            TimeStamp::new(),
        )
    }

    pub fn record_action_at(
        &self,
        approver_id: &str,
        decision: Decision,
        comment: Option<String>,
        signature_present: bool,
        acted_at: TimeStamp,
    ) -> Result<Self, WorkflowError> {
        self.require(RequestState::Pending, Operation::RecordAction)?;
        let slot = self.slot_for(approver_id)?;

        let mut action = ApprovalAction::new(slot.id.clone(), approver_id, decision)
            .with_signature(signature_present)
            .acted_at(acted_at);
        action.comment = comment;

        let trail = engine::apply_action(&self.config, &self.trail, action)?;
        let resolution = engine::is_resolved(&self.config, &trail)?;

        let mut next = self.clone();
        next.trail = trail;
        if let Some(outcome) = resolution.outcome() {
            next.state = outcome.into();
            next.completed_at = Some(acted_at);
        }
        Ok(next)
    }

    /// `authorize` decides whether `actor_id` may cancel this request.
    pub fn cancel<F>(&self, actor_id: &str, reason: &str, authorize: F) -> Result<Self, WorkflowError>
    where
        F: FnOnce(&Request, &str) -> bool,
    {
        if self.state.is_terminal() {
            return Err(WorkflowError::InvalidTransition {
                from: self.state,
                operation: Operation::Cancel,
            });
        }
        if !authorize(&self.request, actor_id) {
            return Err(WorkflowError::Unauthorized(actor_id.to_string()));
        }

        let mut next = self.clone();
        next.state = RequestState::Cancelled;
        next.completed_at = Some(TimeStamp::new());
        next.cancellation = Some(Cancellation {
            actor_id: actor_id.to_string(),
            reason: reason.to_string(),
        });
        Ok(next)
    }

    /// Hands an un-acted slot to another principal. The snapshot is rewritten
    /// and re-fingerprinted; the original holder is kept in `delegations`.
    pub fn delegate(
        &self,
        slot_id: &str,
        from_principal: &str,
        to_principal: &str,
    ) -> Result<Self, WorkflowError> {
        self.require(RequestState::Pending, Operation::Delegate)?;

        let slot = self
            .config
            .slot(slot_id)
            .ok_or_else(|| ApprovalError::UnknownSlot(slot_id.to_string()))?;
        if slot.principal_id != from_principal {
            return Err(ApprovalError::NotSlotHolder {
                slot: slot_id.to_string(),
                principal: from_principal.to_string(),
            }
            .into());
        }
        if !slot.can_delegate {
            return Err(ApprovalError::DelegationNotAllowed(slot_id.to_string()).into());
        }
        if self.trail.action_for(slot_id).is_some() {
            return Err(ApprovalError::AlreadyActed(slot_id.to_string()).into());
        }

        let mut config = self.config.clone();
        for spec in config.approvers.iter_mut().filter(|spec| spec.id == slot_id) {
            spec.principal_id = to_principal.to_string();
        }

        let mut next = self.clone();
        next.config_fingerprint = Some(config.fingerprint()?);
        next.config = config;
        next.delegations.push(Delegation {
            slot_id: slot_id.to_string(),
            from_principal: from_principal.to_string(),
            to_principal: to_principal.to_string(),
            delegated_at: TimeStamp::new(),
        });
        Ok(next)
    }

    fn require(&self, state: RequestState, operation: Operation) -> Result<(), WorkflowError> {
        if self.state != state {
            return Err(WorkflowError::InvalidTransition {
                from: self.state,
                operation,
            });
        }
        Ok(())
    }

    // A principal may hold several slots. Prefer the one whose turn it is,
    // then the first they have not acted on; the engine reports the rest.
    fn slot_for(&self, principal_id: &str) -> Result<&ApproverSpec, WorkflowError> {
        let pending = engine::pending_approvers(&self.config, &self.trail)?;
        if let Some(slot) = pending
            .into_iter()
            .find(|spec| spec.principal_id == principal_id)
        {
            return Ok(slot);
        }

        let mut held = self.config.slots_for(principal_id).peekable();
        let first = held
            .peek()
            .copied()
            .ok_or_else(|| WorkflowError::UnknownApprover(principal_id.to_string()))?;
        Ok(held
            .find(|spec| self.trail.action_for(&spec.id).is_none())
            .unwrap_or(first))
    }
}
