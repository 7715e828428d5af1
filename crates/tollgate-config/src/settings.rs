//! Discovery and merging of `.claude/settings*.json` permission rules.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tollgate_permissions::PolicyRules;

#[derive(Debug, Default, Deserialize)]
struct SettingsJson {
    #[serde(default)]
    permissions: PolicyRules,
}

/// Settings files in merge order: project local, project shared, user
/// local, user shared.
pub fn settings_paths(project_dir: &Path, home_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut roots = vec![project_dir.to_path_buf()];
    if let Some(home) = home_dir {
        if home != project_dir {
            roots.push(home.to_path_buf());
        }
    }
    roots
        .iter()
        .flat_map(|root| {
            let dir = root.join(".claude");
            [dir.join("settings.local.json"), dir.join("settings.json")]
        })
        .collect()
}

/// Read and merge allow/deny patterns from every settings file that exists.
///
/// Missing files are skipped quietly; unreadable or malformed ones are
/// skipped with a warning.
pub fn load_policy_rules(project_dir: &Path, home_dir: Option<&Path>) -> PolicyRules {
    let mut rules = PolicyRules::default();
    for path in settings_paths(project_dir, home_dir) {
        if let Some(found) = read_settings(&path) {
            tracing::debug!(
                path = %path.display(),
                allow = found.allow.len(),
                deny = found.deny.len(),
                "loaded settings"
            );
            rules.extend(found);
        }
    }
    rules
}

fn read_settings(path: &Path) -> Option<PolicyRules> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<SettingsJson>(&content) {
        Ok(settings) => Some(settings.permissions),
        Err(e) => {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, name: &str, content: &str) {
        let dir = root.join(".claude");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_paths_order() {
        let paths = settings_paths(Path::new("/work"), Some(Path::new("/home/me")));
        let expected: Vec<PathBuf> = [
            "/work/.claude/settings.local.json",
            "/work/.claude/settings.json",
            "/home/me/.claude/settings.local.json",
            "/home/me/.claude/settings.json",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        assert_eq!(paths, expected);
    }

    #[test]
    fn test_paths_project_is_home() {
        let paths = settings_paths(Path::new("/home/me"), Some(Path::new("/home/me")));
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_merge_all_scopes() {
        let project = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        write(
            project.path(),
            "settings.local.json",
            r#"{"permissions": {"allow": ["Bash(npm test:*)"]}}"#,
        );
        write(
            project.path(),
            "settings.json",
            r#"{"permissions": {"allow": ["Edit"], "deny": ["Bash(npm publish:*)"]}}"#,
        );
        write(
            home.path(),
            "settings.json",
            r#"{"model": "x", "permissions": {"allow": ["mcp__chrome__*"], "deny": []}}"#,
        );

        let rules = load_policy_rules(project.path(), Some(home.path()));
        assert_eq!(rules.allow, vec!["Bash(npm test:*)", "Edit", "mcp__chrome__*"]);
        assert_eq!(rules.deny, vec!["Bash(npm publish:*)"]);
    }

    #[test]
    fn test_invalid_file_skipped() {
        let project = tempfile::tempdir().unwrap();
        write(project.path(), "settings.local.json", "{ not json");
        write(
            project.path(),
            "settings.json",
            r#"{"permissions": {"deny": ["Write"]}}"#,
        );

        let rules = load_policy_rules(project.path(), None);
        assert!(rules.allow.is_empty());
        assert_eq!(rules.deny, vec!["Write"]);
    }

    #[test]
    fn test_wrong_shape_skipped() {
        let project = tempfile::tempdir().unwrap();
        write(
            project.path(),
            "settings.json",
            r#"{"permissions": {"allow": "Edit"}}"#,
        );
        assert!(load_policy_rules(project.path(), None).is_empty());
    }

    #[test]
    fn test_no_files() {
        let project = tempfile::tempdir().unwrap();
        assert!(load_policy_rules(project.path(), None).is_empty());
    }

    #[test]
    fn test_missing_permissions_key() {
        let project = tempfile::tempdir().unwrap();
        write(project.path(), "settings.json", r#"{"env": {"FOO": "1"}}"#);
        assert!(load_policy_rules(project.path(), None).is_empty());
    }
}
