//! Boundary to the wrapped agent runtime.
//!
//! The runtime streams raw events for one turn and calls back into a
//! [`ToolAuthorizer`] before running any tool. It blocks its own forward
//! progress until that callback returns.

use crate::RuntimeError;
use futures_core::Stream;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

/// Raw events emitted by the agent runtime during a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// The runtime started (or resumed) a session.
    Init { session_id: String },
    /// A tool-use content block started.
    ToolUseStart {
        name: String,
        input: serde_json::Value,
    },
    /// A chunk of assistant text.
    TextDelta { text: String },
    /// The current content block (tool use or text) finished.
    ContentBlockStop,
    /// The turn finished with a final result.
    Result {
        content: String,
        session_id: Option<String>,
    },
}

/// A boxed stream of raw runtime events.
pub type RuntimeStream = Pin<Box<dyn Stream<Item = Result<RuntimeEvent, RuntimeError>> + Send>>;

/// Answer to the runtime's per-call authorization hook.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPermission {
    /// Run the tool with this (possibly rewritten) input.
    Allow { updated_input: serde_json::Value },
    /// Refuse the tool. The agent sees `message` as the tool result.
    Deny { message: String },
}

impl ToolPermission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// The per-call authorization hook handed to the runtime.
///
/// Uses `Pin<Box<dyn Future>>` for dyn-compatibility.
pub trait ToolAuthorizer: Send + Sync {
    fn authorize<'a>(
        &'a self,
        tool_name: &'a str,
        input: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = ToolPermission> + Send + 'a>>;
}

/// A single turn submitted to the runtime.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub prompt: String,
    /// Runtime session to resume, if any.
    pub resume: Option<String>,
    pub cwd: PathBuf,
    pub system_prompt: Option<String>,
}

/// The agent runtime that owns the model conversation and executes tools.
pub trait AgentRuntime: Send + Sync {
    /// Start a turn. Every tool call in the turn must go through `authorizer`.
    fn query<'a>(
        &'a self,
        request: QueryRequest,
        authorizer: Arc<dyn ToolAuthorizer>,
    ) -> Pin<Box<dyn Future<Output = Result<RuntimeStream, RuntimeError>> + Send + 'a>>;

    /// Runtime name for logging.
    fn name(&self) -> &str;
}
