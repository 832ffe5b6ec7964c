//! Service settings loaded from a TOML file plus environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::downstream::gitee::DEFAULT_GITEE_API;
use crate::scheduler::SchedulerConfig;
use crate::upstream::github::DEFAULT_GITHUB_API;

pub const ENV_GITHUB_TOKEN: &str = "PATCH_TRACKER_GITHUB_TOKEN";
pub const ENV_GITEE_TOKEN: &str = "PATCH_TRACKER_GITEE_TOKEN";
pub const ENV_DATABASE_URL: &str = "PATCH_TRACKER_DATABASE_URL";
pub const ENV_GIT_BASE_PATH: &str = "PATCH_TRACKER_GIT_BASE_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid settings: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Tracker service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub github_access_token: String,
    pub gitee_access_token: String,
    /// Seconds between scans of the enabled trackings.
    pub scan_interval_secs: u64,
    /// Seconds between checks for trackings with an empty watermark.
    pub empty_watermark_check_secs: u64,
    /// Directory holding the upstream mirrors.
    pub git_base_path: PathBuf,
    pub max_workers: usize,
    pub database_url: String,
    pub github_api_base: String,
    pub gitee_api_base: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            github_access_token: String::new(),
            gitee_access_token: String::new(),
            scan_interval_secs: 3600,
            empty_watermark_check_secs: 600,
            git_base_path: PathBuf::from(".patch-tracker/mirrors"),
            max_workers: 100,
            database_url: "surrealkv://.patch-tracker/db".to_string(),
            github_api_base: DEFAULT_GITHUB_API.to_string(),
            gitee_api_base: DEFAULT_GITEE_API.to_string(),
        }
    }
}

impl Settings {
    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::from_toml_str(&text)?;
        settings.apply_overrides(|name| std::env::var(name).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `lookup` (normally the process environment).
    /// Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(token) = get(ENV_GITHUB_TOKEN) {
            self.github_access_token = token;
        }
        if let Some(token) = get(ENV_GITEE_TOKEN) {
            self.gitee_access_token = token;
        }
        if let Some(url) = get(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Some(path) = get(ENV_GIT_BASE_PATH) {
            self.git_base_path = PathBuf::from(path);
        }
    }

    /// Trim tokens and check every field, reporting all problems at once.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.github_access_token = self.github_access_token.trim().to_string();
        self.gitee_access_token = self.gitee_access_token.trim().to_string();

        let mut problems = Vec::new();
        if self.github_access_token.is_empty() {
            problems.push("github_access_token is empty".to_string());
        }
        if self.gitee_access_token.is_empty() {
            problems.push("gitee_access_token is empty".to_string());
        }
        if self.scan_interval_secs == 0 {
            problems.push("scan_interval_secs must be greater than 0".to_string());
        }
        if self.empty_watermark_check_secs == 0 {
            problems.push("empty_watermark_check_secs must be greater than 0".to_string());
        }
        if self.max_workers == 0 {
            problems.push("max_workers must be greater than 0".to_string());
        }
        if self.database_url.trim().is_empty() {
            problems.push("database_url is empty".to_string());
        }
        if self.git_base_path.as_os_str().is_empty() {
            problems.push("git_base_path is empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            scan_interval: Duration::from_secs(self.scan_interval_secs),
            empty_watermark_interval: Duration::from_secs(self.empty_watermark_check_secs),
            max_workers: self.max_workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_fields_take_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            github_access_token = "gh"
            gitee_access_token = "ge"
            scan_interval_secs = 300
            "#,
        )
        .unwrap();
        assert_eq!(settings.scan_interval_secs, 300);
        assert_eq!(settings.empty_watermark_check_secs, 600);
        assert_eq!(settings.max_workers, 100);
        assert_eq!(settings.database_url, "surrealkv://.patch-tracker/db");
        assert_eq!(settings.scheduler_config().scan_interval, Duration::from_secs(300));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut settings = Settings::from_toml_str(r#"gitee_access_token = "from-file""#).unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_GITEE_TOKEN, "from-env"),
            (ENV_GITHUB_TOKEN, "  "),
            (ENV_GIT_BASE_PATH, "/srv/mirrors"),
        ]
        .into_iter()
        .collect();
        settings.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.gitee_access_token, "from-env");
        assert_eq!(settings.github_access_token, "");
        assert_eq!(settings.git_base_path, PathBuf::from("/srv/mirrors"));
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut settings = Settings {
            github_access_token: "  ".to_string(),
            scan_interval_secs: 0,
            max_workers: 0,
            ..Settings::default()
        };
        let Err(ConfigError::Invalid(problems)) = settings.validate() else {
            panic!("expected invalid settings");
        };
        assert_eq!(problems.len(), 4, "{problems:?}");
        assert!(problems.iter().any(|p| p.contains("github_access_token")));
        assert!(problems.iter().any(|p| p.contains("gitee_access_token")));
        assert!(problems.iter().any(|p| p.contains("scan_interval_secs")));
        assert!(problems.iter().any(|p| p.contains("max_workers")));
    }

    #[test]
    fn tokens_are_trimmed() {
        let mut settings = Settings {
            github_access_token: " gh\n".to_string(),
            gitee_access_token: "ge ".to_string(),
            ..Settings::default()
        };
        settings.validate().unwrap();
        assert_eq!(settings.github_access_token, "gh");
        assert_eq!(settings.gitee_access_token, "ge");
    }

    #[test]
    fn mistyped_value_is_a_parse_error() {
        assert!(matches!(
            Settings::from_toml_str("scan_interval_secs = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(&dir.path().join("settings.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
