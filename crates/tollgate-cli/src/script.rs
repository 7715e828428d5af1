//! A runtime that replays a JSON Lines script instead of talking to a model.
//!
//! One event per line:
//!
//! ```text
//! {"type": "init", "session_id": "abc"}
//! {"type": "text", "text": "Running the tests."}
//! {"type": "tool", "name": "Bash", "input": {"command": "npm test"}}
//! {"type": "error", "message": "connection reset"}
//! {"type": "result", "content": "done"}
//! ```
//!
//! `tool` lines go through the authorization hook before the tool block
//! closes, the same way a live runtime suspends on it.

use anyhow::{Context, Result};
use futures_util::stream;
use serde::Deserialize;
use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tollgate_types::{
    AgentRuntime, QueryRequest, RuntimeError, RuntimeEvent, RuntimeStream, ToolAuthorizer,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptLine {
    Init {
        session_id: String,
    },
    Text {
        text: String,
    },
    Tool {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    Result {
        content: String,
        #[serde(default)]
        session_id: Option<String>,
    },
    Error {
        message: String,
    },
}

/// Replays a script once. A second turn fails to start.
pub struct ScriptedRuntime {
    script: Mutex<Option<Vec<ScriptLine>>>,
}

impl ScriptedRuntime {
    pub fn new(lines: Vec<ScriptLine>) -> Self {
        Self {
            script: Mutex::new(Some(lines)),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Ok(Self::new(parse_script(&content)?))
    }
}

/// Parse a JSON Lines script. Blank lines and `#` comments are ignored.
pub fn parse_script(content: &str) -> Result<Vec<ScriptLine>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid script line {}", index + 1))
        })
        .collect()
}

struct Replay {
    lines: VecDeque<ScriptLine>,
    authorizer: Arc<dyn ToolAuthorizer>,
    open_tool: Option<(String, serde_json::Value)>,
}

impl AgentRuntime for ScriptedRuntime {
    fn query<'a>(
        &'a self,
        request: QueryRequest,
        authorizer: Arc<dyn ToolAuthorizer>,
    ) -> Pin<Box<dyn Future<Output = Result<RuntimeStream, RuntimeError>> + Send + 'a>> {
        let script = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Box::pin(async move {
            let lines =
                script.ok_or_else(|| RuntimeError::Spawn("script already replayed".into()))?;
            tracing::debug!(
                lines = lines.len(),
                resume = request.resume.as_deref(),
                "replaying script"
            );
            let replay = Replay {
                lines: lines.into(),
                authorizer,
                open_tool: None,
            };
            let events = stream::unfold(replay, |mut replay| async move {
                if let Some((name, input)) = replay.open_tool.take() {
                    let permission = replay.authorizer.authorize(&name, &input).await;
                    tracing::debug!(tool = %name, allowed = permission.is_allowed(), "hook answered");
                    return Some((Ok(RuntimeEvent::ContentBlockStop), replay));
                }
                let event = match replay.lines.pop_front()? {
                    ScriptLine::Init { session_id } => Ok(RuntimeEvent::Init { session_id }),
                    ScriptLine::Text { text } => Ok(RuntimeEvent::TextDelta { text }),
                    ScriptLine::Tool { name, input } => {
                        replay.open_tool = Some((name.clone(), input.clone()));
                        Ok(RuntimeEvent::ToolUseStart { name, input })
                    }
                    ScriptLine::Result {
                        content,
                        session_id,
                    } => Ok(RuntimeEvent::Result {
                        content,
                        session_id,
                    }),
                    ScriptLine::Error { message } => Err(RuntimeError::Terminated(message)),
                };
                Some((event, replay))
            });
            Ok(Box::pin(events) as RuntimeStream)
        })
    }

    fn name(&self) -> &str {
        "script"
    }
}
