//! Destructive shell command signatures.
//!
//! A match forces `ask_destructive` no matter what settings or session
//! grants say.

use regex::Regex;
use std::sync::LazyLock;

/// A destructive signature that matched a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestructiveMatch {
    pub id: &'static str,
    pub reason: &'static str,
}

struct Signature {
    id: &'static str,
    pattern: &'static LazyLock<Regex>,
    /// Clears a match when it appears later on the same line.
    unless_followed_by: Option<&'static LazyLock<Regex>>,
    reason: &'static str,
}

static RM_RECURSIVE_OR_FORCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\brm\s+(-\w*r\w*|-\w*f\w*)\b").unwrap());
static GIT_PUSH_FORCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgit\s+push\s+.*--force\b").unwrap());
static GIT_PUSH_F: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgit\s+push\s+.*-f\b").unwrap());
static GIT_RESET_HARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgit\s+reset\s+--hard\b").unwrap());
static GIT_CLEAN_FORCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgit\s+clean\s+.*-f").unwrap());
static GIT_CHECKOUT_DOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgit\s+checkout\s+\.\s*$").unwrap());
static GIT_RESTORE_DOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgit\s+restore\s+\.\s*$").unwrap());
static SUDO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bsudo\b").unwrap());
static SQL_DROP_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDROP\s+TABLE\b").unwrap());
static SQL_DELETE_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDELETE\s+FROM\b").unwrap());
static SQL_WHERE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").unwrap());

static SIGNATURES: &[Signature] = &[
    Signature {
        id: "rm-recursive-or-force",
        pattern: &RM_RECURSIVE_OR_FORCE,
        unless_followed_by: None,
        reason: "rm -r/-f deletes files without confirmation",
    },
    Signature {
        id: "git-push-force",
        pattern: &GIT_PUSH_FORCE,
        unless_followed_by: None,
        reason: "Force push rewrites remote history",
    },
    Signature {
        id: "git-push-f",
        pattern: &GIT_PUSH_F,
        unless_followed_by: None,
        reason: "Force push rewrites remote history",
    },
    Signature {
        id: "git-reset-hard",
        pattern: &GIT_RESET_HARD,
        unless_followed_by: None,
        reason: "git reset --hard discards uncommitted changes",
    },
    Signature {
        id: "git-clean-force",
        pattern: &GIT_CLEAN_FORCE,
        unless_followed_by: None,
        reason: "git clean -f removes untracked files permanently",
    },
    Signature {
        id: "git-checkout-dot",
        pattern: &GIT_CHECKOUT_DOT,
        unless_followed_by: None,
        reason: "git checkout . discards all unstaged changes",
    },
    Signature {
        id: "git-restore-dot",
        pattern: &GIT_RESTORE_DOT,
        unless_followed_by: None,
        reason: "git restore . discards all unstaged changes",
    },
    Signature {
        id: "sudo",
        pattern: &SUDO,
        unless_followed_by: None,
        reason: "sudo escalates privileges",
    },
    Signature {
        id: "sql-drop-table",
        pattern: &SQL_DROP_TABLE,
        unless_followed_by: None,
        reason: "DROP TABLE permanently destroys a table",
    },
    Signature {
        id: "sql-delete-without-where",
        pattern: &SQL_DELETE_FROM,
        unless_followed_by: Some(&SQL_WHERE),
        reason: "DELETE without WHERE removes all rows",
    },
];

impl Signature {
    fn is_match(&self, command: &str) -> bool {
        let Some(guard) = self.unless_followed_by else {
            return self.pattern.is_match(command);
        };
        self.pattern.find_iter(command).any(|m| {
            let rest = &command[m.end()..];
            let line = rest.split(['\n', '\r']).next().unwrap_or(rest);
            !guard.is_match(line)
        })
    }
}

/// Find the first destructive signature matching a shell command.
pub fn detect(command: &str) -> Option<DestructiveMatch> {
    SIGNATURES
        .iter()
        .find(|sig| sig.is_match(command))
        .map(|sig| DestructiveMatch {
            id: sig.id,
            reason: sig.reason,
        })
}

pub fn is_destructive(command: &str) -> bool {
    detect(command).is_some()
}
