//! Permission engine: the layered decision function.

use crate::destructive;
use crate::matcher::CompiledRules;
use crate::types::*;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tollgate_types::Action;

/// Tools that only read and are always allowed, whatever the settings say.
pub const READ_ONLY_TOOLS: &[&str] = &["Read", "Glob", "Grep", "WebSearch", "WebFetch"];

/// Evaluates actions against the read-only allowlist, destructive signatures,
/// session grants and the settings rules.
pub struct PermissionEngine {
    deny: CompiledRules,
    allow: CompiledRules,
    /// Grants added via "allow for this session" responses.
    session_grants: Mutex<Vec<SessionGrant>>,
}

impl PermissionEngine {
    /// Create an engine from merged settings rules. Malformed patterns are
    /// logged and ignored.
    pub fn new(rules: PolicyRules) -> Self {
        let deny = CompiledRules::compile(&rules.deny, "deny");
        let allow = CompiledRules::compile(&rules.allow, "allow");
        if deny.is_empty() && allow.is_empty() {
            tracing::debug!("no settings rules, unlisted tools will ask");
        } else {
            tracing::debug!(deny = deny.len(), allow = allow.len(), "compiled settings rules");
        }
        Self {
            deny,
            allow,
            session_grants: Mutex::new(Vec::new()),
        }
    }

    /// Decide an action.
    ///
    /// Evaluation order, first match wins:
    /// 1. Read-only tools: allow.
    /// 2. Destructive shell commands: ask_destructive.
    /// 3. Session grants: allow.
    /// 4. Settings deny patterns: deny.
    /// 5. Settings allow patterns: allow.
    /// 6. Default: ask.
    pub fn evaluate(&self, action: &Action) -> CheckDetail {
        let detail = self.resolve(action);
        tracing::debug!(
            tool = %action.tool_name,
            outcome = detail.outcome.as_str(),
            source = detail.provenance.as_str(),
            pattern = detail.pattern.as_deref(),
            "permission check"
        );
        detail
    }

    /// Like [`evaluate`](Self::evaluate), returning only the outcome.
    pub fn check(&self, tool_name: &str, input: &serde_json::Value) -> Outcome {
        self.evaluate(&Action::new(tool_name, input.clone())).outcome
    }

    fn resolve(&self, action: &Action) -> CheckDetail {
        if READ_ONLY_TOOLS.contains(&action.tool_name.as_str()) {
            return CheckDetail::new(Outcome::Allow, Provenance::ReadOnly);
        }

        if let Some(hit) = action.shell_command().and_then(destructive::detect) {
            tracing::debug!(signature = hit.id, "destructive command: {}", hit.reason);
            return CheckDetail::new(Outcome::AskDestructive, Provenance::Destructive);
        }

        if self.matches_session_grant(action) {
            return CheckDetail::new(Outcome::Allow, Provenance::SessionGrant);
        }

        if let Some(pattern) = self.deny.first_match(action) {
            return CheckDetail::new(Outcome::Deny, Provenance::SettingsDeny).with_pattern(pattern);
        }
        if let Some(pattern) = self.allow.first_match(action) {
            return CheckDetail::new(Outcome::Allow, Provenance::SettingsAllow)
                .with_pattern(pattern);
        }

        CheckDetail::new(Outcome::Ask, Provenance::NoMatch)
    }

    /// Record an "allow for this session" decision.
    ///
    /// Shell grants remember the approved command and later match any
    /// command it prefixes. Other grants cover the whole tool.
    pub fn record_session_grant(&self, tool_name: &str, input: &serde_json::Value) {
        let action = Action::new(tool_name, input.clone());
        let grant = SessionGrant {
            tool_name: tool_name.to_string(),
            command_prefix: action.shell_command().map(str::to_string),
        };
        tracing::info!(
            tool = %grant.tool_name,
            prefix = grant.command_prefix.as_deref(),
            "session grant recorded"
        );
        self.grants().push(grant);
    }

    /// Drop all session grants (e.g. on session restart).
    pub fn reset_session_grants(&self) {
        self.grants().clear();
    }

    pub fn session_grants(&self) -> Vec<SessionGrant> {
        self.grants().clone()
    }

    fn matches_session_grant(&self, action: &Action) -> bool {
        self.grants().iter().any(|grant| {
            if grant.tool_name != action.tool_name {
                return false;
            }
            match (&grant.command_prefix, action.is_shell()) {
                (Some(prefix), true) => action
                    .command()
                    .is_some_and(|command| command.starts_with(prefix.as_str())),
                (Some(_), false) => false,
                (None, _) => true,
            }
        })
    }

    fn grants(&self) -> MutexGuard<'_, Vec<SessionGrant>> {
        self.session_grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
