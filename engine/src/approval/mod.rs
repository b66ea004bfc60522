//! Approval of capability calls: risk classification, memoized decisions and
//! interactive prompting.

pub mod gate;
pub mod prompter;
pub mod risk;

pub use gate::{ApprovalDecision, ApprovalGate, ApprovalStats, DecisionKind, GateOutcome};
pub use prompter::{
    ApprovalPrompter, ApprovalReply, ApprovalRequest, ApprovalScope, DenyAllPrompter,
    TerminalPrompter,
};
pub use risk::{RiskAssessor, RiskLevel};
