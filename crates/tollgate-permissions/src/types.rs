//! Core types for the permission system.

use serde::{Deserialize, Serialize};

/// Merged allow/deny pattern lists from all settings scopes.
///
/// Order is kept for audit reporting only; deny always beats allow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRules {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl PolicyRules {
    /// Append another scope's rules after this one's.
    pub fn extend(&mut self, other: PolicyRules) {
        self.allow.extend(other.allow);
        self.deny.extend(other.deny);
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// What the engine decided for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    Deny,
    Ask,
    AskDestructive,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Ask => "ask",
            Self::AskDestructive => "ask_destructive",
        }
    }
}

/// Which layer of the engine produced the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    ReadOnly,
    Destructive,
    SessionGrant,
    SettingsDeny,
    SettingsAllow,
    NoMatch,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::Destructive => "destructive",
            Self::SessionGrant => "session_grant",
            Self::SettingsDeny => "settings_deny",
            Self::SettingsAllow => "settings_allow",
            Self::NoMatch => "no_match",
        }
    }
}

/// Full result of an evaluation: outcome, deciding layer and settings pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDetail {
    pub outcome: Outcome,
    pub provenance: Provenance,
    /// The settings pattern that matched, if any.
    pub pattern: Option<String>,
}

impl CheckDetail {
    pub(crate) fn new(outcome: Outcome, provenance: Provenance) -> Self {
        Self {
            outcome,
            provenance,
            pattern: None,
        }
    }

    pub(crate) fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }
}

/// Trust granted by an explicit "allow for this session" decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub tool_name: String,
    /// For shell grants: the approved command, matched as a prefix.
    pub command_prefix: Option<String>,
}

/// The disposition applied to a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Allow this invocation only.
    Allow,
    /// Allow, and trust this tool (or command prefix) for the rest of the session.
    AllowForSession,
    /// Refuse the invocation.
    Deny { reason: String },
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Deny { .. })
    }
}

/// A pending request for a human decision, published to the approval channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique id, echoed back by the channel's callback.
    pub id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    /// Destructive requests should not offer an "allow for session" choice.
    pub is_destructive: bool,
}

/// Decision kind as sent by the approval channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Allow,
    AllowSession,
    Deny,
}

/// Callback payload delivered by the approval channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPayload {
    pub id: String,
    pub decision: DecisionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DecisionPayload {
    pub fn decision(&self) -> Decision {
        match self.decision {
            DecisionKind::Allow => Decision::Allow,
            DecisionKind::AllowSession => Decision::AllowForSession,
            DecisionKind::Deny => {
                Decision::deny(self.message.clone().unwrap_or_else(|| "User denied".into()))
            }
        }
    }
}
