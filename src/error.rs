use crate::lifecycle::{Operation, RequestState};

/// A malformed approval configuration. These must be fixed where the template
/// is edited; nothing at request time can recover from them.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("invalid configuration: no approvers configured")]
    Empty,
    #[error("invalid configuration: more than one approver has order {0}")]
    DuplicateOrder(u32),
    #[error("invalid configuration: approver slot `{0}` appears more than once")]
    DuplicateSlotId(String),
    #[error("invalid configuration: approver slot `{0}` has order 0, orders are 1-based")]
    InvalidOrder(String),
    #[error("invalid configuration: {0}")]
    Malformed(String),
}

/// An action that the approval chain will not accept in its current state.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("the approval chain has already been resolved")]
    AlreadyResolved,
    #[error("approver slot `{0}` is not part of this chain")]
    UnknownSlot(String),
    #[error("approver slot `{0}` has already acted")]
    AlreadyActed(String),
    #[error("approver slot `{0}` is not next in sequence")]
    OutOfSequence(String),
    #[error("approver slot `{0}` is required and cannot be skipped")]
    RequiredSlotSkipped(String),
    #[error("approver slot `{0}` does not allow delegation")]
    DelegationNotAllowed(String),
    #[error("`{principal}` does not hold approver slot `{slot}`")]
    NotSlotHolder { slot: String, principal: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("cannot {operation} a request that is {from}")]
    InvalidTransition {
        from: RequestState,
        operation: Operation,
    },
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("`{0}` is not a configured approver for this request")]
    UnknownApprover(String),
    #[error("`{0}` is not allowed to cancel this request")]
    Unauthorized(String),
}
