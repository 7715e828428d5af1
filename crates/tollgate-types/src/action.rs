//! The action an agent asks permission to perform.

use serde::{Deserialize, Serialize};

/// Name of the shell-execution tool. Its `command` input field feeds the
/// destructive-command check, session-grant prefixes and `Tool(prefix:*)` rules.
pub const SHELL_TOOL: &str = "Bash";

/// A single tool invocation: the tool name plus its opaque JSON input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool_name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

impl Action {
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
        }
    }

    /// The `command` string field of the input, if any.
    pub fn command(&self) -> Option<&str> {
        self.input.get("command").and_then(serde_json::Value::as_str)
    }

    /// Whether this action runs a shell command.
    pub fn is_shell(&self) -> bool {
        self.tool_name == SHELL_TOOL
    }

    /// The command string, but only for shell actions.
    pub fn shell_command(&self) -> Option<&str> {
        if self.is_shell() { self.command() } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_reads_string_field() {
        let action = Action::new("Bash", json!({"command": "npm test"}));
        assert_eq!(action.command(), Some("npm test"));
        assert_eq!(action.shell_command(), Some("npm test"));
    }

    #[test]
    fn command_ignores_non_string() {
        let action = Action::new("Bash", json!({"command": 42}));
        assert_eq!(action.command(), None);
    }

    #[test]
    fn shell_command_only_for_shell_tool() {
        let action = Action::new("Custom", json!({"command": "ls"}));
        assert_eq!(action.command(), Some("ls"));
        assert_eq!(action.shell_command(), None);
    }

    #[test]
    fn deserialize_without_input() {
        let action: Action = serde_json::from_str(r#"{"tool_name": "Read"}"#).unwrap();
        assert_eq!(action.tool_name, "Read");
        assert!(action.input.is_null());
    }
}
