//! Approval gate
//!
//! Decides whether a capability call may run. Decisions are taken in order:
//!
//! 1. global auto-approve
//! 2. per-capability memo (always allow / always deny)
//! 3. per-call memo keyed by the canonical call signature
//! 4. the prompter
//!
//! Memos live as long as the gate.

use sdk::types::{call_signature, CallParams};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use super::prompter::{ApprovalPrompter, ApprovalReply, ApprovalRequest, ApprovalScope};
use super::risk::{RiskAssessor, RiskLevel};

/// How a decision was reached, seen from the memo's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    AllowOnce,
    DenyOnce,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub remember: bool,
    pub classification: DecisionKind,
}

impl ApprovalDecision {
    fn from_memo(approved: bool) -> Self {
        Self {
            approved,
            remember: true,
            classification: if approved {
                DecisionKind::Always
            } else {
                DecisionKind::Never
            },
        }
    }

    fn from_reply(reply: ApprovalReply) -> Self {
        let remember = reply.scope != ApprovalScope::Once;
        let classification = match (reply.approved, remember) {
            (true, false) => DecisionKind::AllowOnce,
            (false, false) => DecisionKind::DenyOnce,
            (true, true) => DecisionKind::Always,
            (false, true) => DecisionKind::Never,
        };
        Self {
            approved: reply.approved,
            remember,
            classification,
        }
    }
}

/// Outcome of [`ApprovalGate::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    pub decision: ApprovalDecision,
    pub risk: RiskLevel,
}

/// Snapshot of the gate's memos
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApprovalStats {
    pub always_allow: Vec<String>,
    pub always_deny: Vec<String>,
    pub remembered_calls: usize,
}

pub struct ApprovalGate {
    auto_approve: bool,
    assessor: RiskAssessor,
    prompter: Arc<dyn ApprovalPrompter>,
    always_allow: BTreeSet<String>,
    always_deny: BTreeSet<String>,
    remembered: HashMap<String, bool>,
}

impl ApprovalGate {
    pub fn new(auto_approve: bool, prompter: Arc<dyn ApprovalPrompter>) -> Self {
        Self {
            auto_approve,
            assessor: RiskAssessor::new(),
            prompter,
            always_allow: BTreeSet::new(),
            always_deny: BTreeSet::new(),
            remembered: HashMap::new(),
        }
    }

    pub fn auto_approve(&self) -> bool {
        self.auto_approve
    }

    pub fn set_auto_approve(&mut self, enabled: bool) {
        self.auto_approve = enabled;
    }

    /// Risk level of a call without deciding anything
    pub fn assess(&self, name: &str, params: &CallParams) -> RiskLevel {
        self.assessor.assess(name, params)
    }

    /// Decide whether `name(params)` may run
    pub async fn check(&mut self, name: &str, params: &CallParams) -> GateOutcome {
        let risk = self.assessor.assess(name, params);

        if self.auto_approve {
            return GateOutcome {
                decision: ApprovalDecision {
                    approved: true,
                    remember: false,
                    classification: DecisionKind::AllowOnce,
                },
                risk,
            };
        }

        if self.always_allow.contains(name) {
            debug!("'{}' is always allowed", name);
            return GateOutcome {
                decision: ApprovalDecision::from_memo(true),
                risk,
            };
        }
        if self.always_deny.contains(name) {
            debug!("'{}' is always denied", name);
            return GateOutcome {
                decision: ApprovalDecision::from_memo(false),
                risk,
            };
        }

        let signature = call_signature(name, params);
        if let Some(&approved) = self.remembered.get(&signature) {
            debug!("Using remembered decision for {}", signature);
            return GateOutcome {
                decision: ApprovalDecision::from_memo(approved),
                risk,
            };
        }

        let request = ApprovalRequest {
            capability: name.to_string(),
            args: params.clone(),
            risk,
            signature: signature.clone(),
        };
        let reply = match self.prompter.ask(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Approval prompt failed for '{}': {}", name, e);
                ApprovalReply::deny_once()
            }
        };

        match reply.scope {
            ApprovalScope::Once => {}
            ApprovalScope::Call => {
                self.remembered.insert(signature, reply.approved);
            }
            ApprovalScope::Capability => {
                if reply.approved {
                    self.always_deny.remove(name);
                    self.always_allow.insert(name.to_string());
                } else {
                    self.always_allow.remove(name);
                    self.always_deny.insert(name.to_string());
                }
            }
        }

        GateOutcome {
            decision: ApprovalDecision::from_reply(reply),
            risk,
        }
    }

    /// Forget every memoized decision
    pub fn clear_remembered(&mut self) {
        self.always_allow.clear();
        self.always_deny.clear();
        self.remembered.clear();
    }

    pub fn stats(&self) -> ApprovalStats {
        ApprovalStats {
            always_allow: self.always_allow.iter().cloned().collect(),
            always_deny: self.always_deny.iter().cloned().collect(),
            remembered_calls: self.remembered.len(),
        }
    }
}
