//! Approval chains for form-based requests.
//!
//! [`engine`] decides whose turn it is and when a chain is resolved,
//! [`lifecycle`] moves a request from draft to its final state, and
//! [`service`] ties both to a [`repository`].

pub mod approver;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod repository;
pub mod service;
pub mod template;
pub mod trail;
pub mod types;
pub mod utils;

pub use approver::{ApprovalConfig, ApprovalMode, ApproverSpec};
pub use engine::{Outcome, Resolution};
pub use error::{ApprovalError, ConfigurationError, WorkflowError};
pub use lifecycle::{Request, RequestLifecycle, RequestState};
pub use trail::{ApprovalAction, AuditTrail, Decision};
