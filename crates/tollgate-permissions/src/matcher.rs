//! Pattern matcher: evaluates settings patterns against actions.

use std::str::FromStr;
use thiserror::Error;
use tollgate_types::Action;

/// A parsed settings pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `Read`: exact tool name.
    Tool(String),
    /// `Bash(git commit:*)`: tool name plus command prefix.
    CommandPrefix { tool: String, prefix: String },
    /// `mcp__chrome__*`: tool-name prefix.
    ToolPrefix(String),
}

/// A settings entry that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("empty permission pattern")]
    Empty,

    #[error("malformed command pattern '{0}': expected Tool(prefix:*)")]
    MalformedCommand(String),
}

impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        if pattern.trim().is_empty() {
            return Err(PatternError::Empty);
        }

        if let Some(open) = pattern.find('(') {
            let tool = &pattern[..open];
            let prefix = pattern[open + 1..].strip_suffix(":*)");
            return match prefix {
                Some(prefix)
                    if !tool.is_empty() && !prefix.is_empty() && !tool.contains('*') =>
                {
                    Ok(Self::CommandPrefix {
                        tool: tool.to_string(),
                        prefix: prefix.to_string(),
                    })
                }
                _ => Err(PatternError::MalformedCommand(pattern.to_string())),
            };
        }

        match pattern.strip_suffix('*') {
            Some(prefix) => Ok(Self::ToolPrefix(prefix.to_string())),
            None => Ok(Self::Tool(pattern.to_string())),
        }
    }
}

impl Pattern {
    /// Check whether this pattern matches the action.
    pub fn matches(&self, action: &Action) -> bool {
        match self {
            Self::Tool(name) => action.tool_name == *name,
            Self::ToolPrefix(prefix) => action.tool_name.starts_with(prefix.as_str()),
            Self::CommandPrefix { tool, prefix } => {
                action.tool_name == *tool
                    && action
                        .command()
                        .is_some_and(|command| command.starts_with(prefix.as_str()))
            }
        }
    }
}

/// Match a raw pattern string. Malformed patterns never match.
pub fn matches_pattern(pattern: &str, action: &Action) -> bool {
    pattern
        .parse::<Pattern>()
        .is_ok_and(|parsed| parsed.matches(action))
}

/// An ordered list of patterns, parsed once.
///
/// Entries that fail to parse are logged and dropped so a single bad
/// settings line cannot block all tool use.
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    entries: Vec<(String, Pattern)>,
}

impl CompiledRules {
    pub fn compile(patterns: &[String], list: &str) -> Self {
        let entries = patterns
            .iter()
            .filter_map(|raw| match raw.parse::<Pattern>() {
                Ok(pattern) => Some((raw.clone(), pattern)),
                Err(e) => {
                    tracing::warn!("Ignoring {list} pattern {raw:?}: {e}");
                    None
                }
            })
            .collect();
        Self { entries }
    }

    /// The first pattern (as written in settings) matching the action.
    pub fn first_match(&self, action: &Action) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, pattern)| pattern.matches(action))
            .map(|(raw, _)| raw.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bash(command: &str) -> Action {
        Action::new("Bash", json!({ "command": command }))
    }

    fn tool(name: &str) -> Action {
        Action::new(name, serde_json::Value::Null)
    }

    #[test]
    fn test_exact_tool_match() {
        assert!(matches_pattern("Read", &tool("Read")));
        assert!(!matches_pattern("Read", &tool("Write")));
    }

    #[test]
    fn test_command_prefix_match() {
        let action = bash("git commit -m 'test'");
        assert!(matches_pattern("Bash(git commit:*)", &action));
        assert!(!matches_pattern("Bash(git push:*)", &action));
    }

    #[test]
    fn test_command_prefix_only_for_named_tool() {
        assert!(!matches_pattern("Bash(git commit:*)", &tool("Read")));
    }

    #[test]
    fn test_command_prefix_other_tool() {
        let action = Action::new("Shell", json!({ "command": "make test" }));
        assert!(matches_pattern("Shell(make:*)", &action));
        assert!(!matches_pattern("Bash(make:*)", &action));
    }

    #[test]
    fn test_command_prefix_missing_command() {
        let action = Action::new("Bash", json!({ "description": "no command" }));
        assert!(!matches_pattern("Bash(git:*)", &action));
    }

    #[test]
    fn test_wildcard_tool_match() {
        assert!(matches_pattern("mcp__chrome__*", &tool("mcp__chrome__click")));
        assert!(!matches_pattern("mcp__chrome__*", &tool("mcp__other__click")));
    }

    #[test]
    fn test_exact_mcp_tool_name() {
        let action = tool("mcp__context7__resolve-library-id");
        assert!(matches_pattern("mcp__context7__resolve-library-id", &action));
    }

    #[test]
    fn test_parse_shapes() {
        assert_eq!("Read".parse::<Pattern>(), Ok(Pattern::Tool("Read".into())));
        assert_eq!("mcp__*".parse::<Pattern>(), Ok(Pattern::ToolPrefix("mcp__".into())));
        assert_eq!(
            "Bash(npm test:*)".parse::<Pattern>(),
            Ok(Pattern::CommandPrefix {
                tool: "Bash".into(),
                prefix: "npm test".into(),
            })
        );
    }

    #[test]
    fn test_malformed_patterns_rejected() {
        assert_eq!("".parse::<Pattern>(), Err(PatternError::Empty));
        assert_eq!("   ".parse::<Pattern>(), Err(PatternError::Empty));
        for raw in ["Bash(", "Bash(git push)", "Bash(:*)", "(git:*)", "Ba*sh(git:*)"] {
            assert!(
                matches!(raw.parse::<Pattern>(), Err(PatternError::MalformedCommand(_))),
                "{raw} should be malformed"
            );
        }
    }

    #[test]
    fn test_malformed_pattern_never_matches() {
        assert!(!matches_pattern("Bash(", &bash("anything")));
        assert!(!matches_pattern("", &tool("")));
    }

    #[test]
    fn test_compiled_rules_skip_malformed() {
        let patterns = vec![
            "Bash(".to_string(),
            "Bash(npm:*)".to_string(),
            "Bash(npm test:*)".to_string(),
        ];
        let rules = CompiledRules::compile(&patterns, "allow");
        assert_eq!(rules.len(), 2);
        assert!(!rules.is_empty());
        assert_eq!(rules.first_match(&bash("npm test")), Some("Bash(npm:*)"));
        assert_eq!(rules.first_match(&bash("cargo test")), None);
    }

    #[test]
    fn test_compiled_rules_empty() {
        let rules = CompiledRules::compile(&[], "deny");
        assert!(rules.is_empty());
        assert_eq!(rules.first_match(&tool("Read")), None);
    }
}
