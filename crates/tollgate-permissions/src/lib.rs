//! Permission system for Tollgate.
//!
//! Outcomes: allow / deny / ask / ask_destructive
//! Layers: read-only > destructive > session grants > settings deny > settings allow > ask

pub mod approval;
pub mod audit;
pub mod channel;
pub mod destructive;
pub mod engine;
pub mod matcher;
pub mod types;

pub use approval::{ApprovalCorrelator, DEFAULT_APPROVAL_TIMEOUT, PendingApproval, Resolution};
pub use audit::{
    AuditEntry, AuditResult, AuditSink, AuditSummary, DecisionCount, JsonlAuditLog, MemoryAuditLog,
};
pub use channel::ApprovalChannel;
pub use engine::{PermissionEngine, READ_ONLY_TOOLS};
pub use matcher::{CompiledRules, Pattern, PatternError, matches_pattern};
pub use types::*;
