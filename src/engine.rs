//! Approval chain state machine
//!
//! Everything here is a pure function of an [`ApprovalConfig`] and an
//! [`AuditTrail`]: whose turn it is, whether the chain has reached an outcome,
//! and whether a proposed action is legal. Nothing is stored and nothing is
//! logged, so callers can re-run these checks against the latest persisted
//! trail inside whatever transaction their store provides.
use super::approver::{ApprovalConfig, ApprovalMode, ApproverSpec};
use super::error::{ApprovalError, ConfigurationError, WorkflowError};
use super::trail::{ApprovalAction, AuditTrail, Decision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Unresolved,
    Resolved(Outcome),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Resolution::Resolved(outcome) => Some(*outcome),
            Resolution::Unresolved => None,
        }
    }
}

/// Slots that may act right now.
///
/// Sequential chains yield at most one slot: the lowest `order` slot that has
/// not acted. An optional slot that a later slot has already acted past counts
/// as satisfied and is not offered again. AnyOne chains yield every slot that
/// has not acted. A resolved chain yields nothing.
pub fn pending_approvers<'a>(
    config: &'a ApprovalConfig,
    trail: &AuditTrail,
) -> Result<Vec<&'a ApproverSpec>, ConfigurationError> {
    config.validate()?;

    if resolve(config, trail).is_resolved() {
        return Ok(vec![]);
    }

    let pending = match config.mode {
        ApprovalMode::Sequential => next_in_sequence(config, trail).into_iter().collect(),
        ApprovalMode::AnyOne => config
            .slots_in_order()
            .into_iter()
            .filter(|spec| trail.action_for(&spec.id).is_none())
            .collect(),
    };

    Ok(pending)
}

pub fn is_resolved(
    config: &ApprovalConfig,
    trail: &AuditTrail,
) -> Result<Resolution, ConfigurationError> {
    config.validate()?;
    Ok(resolve(config, trail))
}

/// Checks, in order: configuration, resolution, slot membership, prior
/// action, skip eligibility and (sequential only) turn order.
pub fn validate_action(
    config: &ApprovalConfig,
    trail: &AuditTrail,
    approver_spec_id: &str,
    decision: Decision,
) -> Result<(), WorkflowError> {
    config.validate()?;

    if resolve(config, trail).is_resolved() {
        return Err(ApprovalError::AlreadyResolved.into());
    }

    let spec = config
        .slot(approver_spec_id)
        .ok_or_else(|| ApprovalError::UnknownSlot(approver_spec_id.to_string()))?;

    if trail.action_for(approver_spec_id).is_some() {
        return Err(ApprovalError::AlreadyActed(approver_spec_id.to_string()).into());
    }

    if decision == Decision::Skipped && spec.is_required {
        return Err(ApprovalError::RequiredSlotSkipped(approver_spec_id.to_string()).into());
    }

    if config.mode == ApprovalMode::Sequential {
        let next = next_in_sequence(config, trail).map(|spec| spec.id.as_str());
        if next != Some(approver_spec_id) {
            return Err(ApprovalError::OutOfSequence(approver_spec_id.to_string()).into());
        }
    }

    Ok(())
}

/// Appends without validating. Pair with [`validate_action`], or use
/// [`apply_action`].
pub fn record_action(trail: AuditTrail, action: ApprovalAction) -> AuditTrail {
    trail.append(action)
}

/// Validate then append. On error the caller's trail is untouched.
pub fn apply_action(
    config: &ApprovalConfig,
    trail: &AuditTrail,
    action: ApprovalAction,
) -> Result<AuditTrail, WorkflowError> {
    validate_action(config, trail, &action.approver_spec_id, action.decision)?;
    Ok(record_action(trail.clone(), action))
}

fn next_in_sequence<'a>(config: &'a ApprovalConfig, trail: &AuditTrail) -> Option<&'a ApproverSpec> {
    let slots = config.slots_in_order();
    let last_acted = slots
        .iter()
        .rposition(|spec| trail.action_for(&spec.id).is_some());

    slots
        .iter()
        .enumerate()
        .find(|(pos, spec)| {
            if trail.action_for(&spec.id).is_some() {
                return false;
            }
            let passed_over = !spec.is_required && last_acted.is_some_and(|last| last > *pos);
            !passed_over
        })
        .map(|(_, spec)| *spec)
}

// Assumes a validated config.
fn resolve(config: &ApprovalConfig, trail: &AuditTrail) -> Resolution {
    let decision_of =
        |spec: &ApproverSpec| trail.action_for(&spec.id).map(|action| action.decision);

    let any_approved = config
        .approvers
        .iter()
        .any(|spec| decision_of(spec) == Some(Decision::Approved));
    let all_closed = config
        .approvers
        .iter()
        .all(|spec| decision_of(spec).is_some());

    let outcome = match config.mode {
        ApprovalMode::Sequential if config.has_required_slots() => {
            let mut required = config.approvers.iter().filter(|spec| spec.is_required);
            if required
                .clone()
                .any(|spec| decision_of(spec) == Some(Decision::Rejected))
            {
                Some(Outcome::Rejected)
            } else if required.all(|spec| decision_of(spec) == Some(Decision::Approved)) {
                Some(Outcome::Approved)
            } else {
                None
            }
        }
        // AnyOne chains, and sequential chains made only of optional slots
        _ if any_approved => Some(Outcome::Approved),
        _ if all_closed => Some(Outcome::Rejected),
        _ => None,
    };

    outcome.map_or(Resolution::Unresolved, Resolution::Resolved)
}
