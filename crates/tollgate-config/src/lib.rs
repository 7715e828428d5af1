//! Configuration for Tollgate.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > `~/.tollgate/config.toml` > defaults
//!
//! Permission rules come from the `.claude/settings*.json` files, see
//! [`settings`].

pub mod settings;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tollgate_permissions::PolicyRules;
use tollgate_types::ConfigError;

/// Seconds an approval request may stay unanswered before it is denied.
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 300;

/// Resolved configuration for a Tollgate session.
#[derive(Debug, Clone)]
pub struct TollgateConfig {
    pub config_dir: PathBuf,
    pub project_dir: PathBuf,
    pub approval_timeout: Duration,
    pub audit_log_path: PathBuf,
    pub policy_rules: PolicyRules,
}

/// Settings that can be read from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub approval: ApprovalSettings,
    #[serde(default)]
    pub audit: AuditSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalSettings {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSettings {
    pub log_path: Option<PathBuf>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub project_dir: Option<PathBuf>,
    pub approval_timeout_secs: Option<u64>,
    pub audit_log_path: Option<PathBuf>,
}

impl TollgateConfig {
    /// Load configuration from the process environment and the user's home.
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::load_from(
            overrides,
            |key| std::env::var(key).ok(),
            dirs_next::home_dir(),
        )
    }

    /// Load configuration with an explicit environment lookup and home dir.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Config file (`<config_dir>/config.toml`)
    /// 4. Defaults
    pub fn load_from(
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
        home_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let config_dir = env("TOLLGATE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_config_dir(home_dir.as_deref()));
        let file = load_settings_file(&config_dir.join("config.toml"))?;

        // Resolve approval timeout: CLI > env > config file > default
        let env_timeout = env("TOLLGATE_APPROVAL_TIMEOUT_SECS")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "TOLLGATE_APPROVAL_TIMEOUT_SECS".into(),
                        message: e.to_string(),
                    })
            })
            .transpose()?;
        let timeout_secs = overrides
            .approval_timeout_secs
            .or(env_timeout)
            .or(file.approval.timeout_secs)
            .unwrap_or(DEFAULT_APPROVAL_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "approval.timeout_secs".into(),
                message: "must be greater than zero".into(),
            });
        }

        // Resolve audit log path
        let audit_log_path = overrides
            .audit_log_path
            .or_else(|| env("TOLLGATE_AUDIT_LOG").map(PathBuf::from))
            .or(file.audit.log_path)
            .unwrap_or_else(|| config_dir.join("logs").join("permissions.jsonl"));

        let project_dir = overrides
            .project_dir
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let policy_rules = settings::load_policy_rules(&project_dir, home_dir.as_deref());

        Ok(TollgateConfig {
            config_dir,
            project_dir,
            approval_timeout: Duration::from_secs(timeout_secs),
            audit_log_path,
            policy_rules,
        })
    }
}

fn default_config_dir(home_dir: Option<&Path>) -> PathBuf {
    home_dir.unwrap_or_else(|| Path::new(".")).join(".tollgate")
}

/// Load and parse the TOML config file. A missing file yields defaults.
fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SettingsFile::default()),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            Ok(SettingsFile::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn project_override(dir: &Path) -> CliOverrides {
        CliOverrides {
            project_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = SettingsFile::default();
        assert!(settings.approval.timeout_secs.is_none());
        assert!(settings.audit.log_path.is_none());
    }

    #[test]
    fn test_settings_toml_parse() {
        let toml_str = r#"
[approval]
timeout_secs = 60

[audit]
log_path = "/var/log/tollgate.jsonl"
"#;
        let settings: SettingsFile = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.approval.timeout_secs, Some(60));
        assert_eq!(
            settings.audit.log_path.as_deref(),
            Some(Path::new("/var/log/tollgate.jsonl"))
        );
    }

    #[test]
    fn test_defaults() {
        let home = tempfile::tempdir().unwrap();
        let config = TollgateConfig::load_from(
            project_override(home.path()),
            env_of(&[]),
            Some(home.path().to_path_buf()),
        )
        .unwrap();
        assert_eq!(config.config_dir, home.path().join(".tollgate"));
        assert_eq!(config.approval_timeout, Duration::from_secs(300));
        assert_eq!(
            config.audit_log_path,
            home.path().join(".tollgate/logs/permissions.jsonl")
        );
        assert!(config.policy_rules.is_empty());
    }

    #[test]
    fn test_precedence() {
        let home = tempfile::tempdir().unwrap();
        let config_dir = home.path().join(".tollgate");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            "[approval]\ntimeout_secs = 60\n[audit]\nlog_path = \"/from/file.jsonl\"\n",
        )
        .unwrap();
        let home_dir = Some(home.path().to_path_buf());

        let from_file =
            TollgateConfig::load_from(project_override(home.path()), env_of(&[]), home_dir.clone())
                .unwrap();
        assert_eq!(from_file.approval_timeout, Duration::from_secs(60));
        assert_eq!(from_file.audit_log_path, PathBuf::from("/from/file.jsonl"));

        let env = env_of(&[
            ("TOLLGATE_APPROVAL_TIMEOUT_SECS", "90"),
            ("TOLLGATE_AUDIT_LOG", "/from/env.jsonl"),
        ]);
        let from_env =
            TollgateConfig::load_from(project_override(home.path()), &env, home_dir.clone())
                .unwrap();
        assert_eq!(from_env.approval_timeout, Duration::from_secs(90));
        assert_eq!(from_env.audit_log_path, PathBuf::from("/from/env.jsonl"));

        let overrides = CliOverrides {
            approval_timeout_secs: Some(5),
            audit_log_path: Some(PathBuf::from("/from/cli.jsonl")),
            ..project_override(home.path())
        };
        let from_cli = TollgateConfig::load_from(overrides, &env, home_dir).unwrap();
        assert_eq!(from_cli.approval_timeout, Duration::from_secs(5));
        assert_eq!(from_cli.audit_log_path, PathBuf::from("/from/cli.jsonl"));
    }

    #[test]
    fn test_config_dir_env() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_of(&[("TOLLGATE_CONFIG_DIR", dir.path().to_str().unwrap())]);
        let config =
            TollgateConfig::load_from(project_override(dir.path()), env, None).unwrap();
        assert_eq!(config.config_dir, dir.path());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let home = tempfile::tempdir().unwrap();
        let overrides = CliOverrides {
            approval_timeout_secs: Some(0),
            ..project_override(home.path())
        };
        let err = TollgateConfig::load_from(overrides, env_of(&[]), Some(home.path().to_path_buf()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_bad_env_timeout_rejected() {
        let home = tempfile::tempdir().unwrap();
        let err = TollgateConfig::load_from(
            project_override(home.path()),
            env_of(&[("TOLLGATE_APPROVAL_TIMEOUT_SECS", "soon")]),
            Some(home.path().to_path_buf()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("TOLLGATE_APPROVAL_TIMEOUT_SECS"));
    }

    #[test]
    fn test_malformed_config_file() {
        let home = tempfile::tempdir().unwrap();
        let config_dir = home.path().join(".tollgate");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[approval\n").unwrap();
        let err = TollgateConfig::load_from(
            project_override(home.path()),
            env_of(&[]),
            Some(home.path().to_path_buf()),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_policy_rules_loaded_from_project() {
        let project = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let claude = project.path().join(".claude");
        std::fs::create_dir_all(&claude).unwrap();
        std::fs::write(
            claude.join("settings.json"),
            r#"{"permissions": {"allow": ["Bash(git commit:*)"]}}"#,
        )
        .unwrap();

        let config = TollgateConfig::load_from(
            project_override(project.path()),
            env_of(&[]),
            Some(home.path().to_path_buf()),
        )
        .unwrap();
        assert_eq!(config.policy_rules.allow, vec!["Bash(git commit:*)"]);
    }
}
