//! Configuration and credential loading.
//!
//! Settings resolve once at startup from fixed defaults, an optional
//! credentials file, and environment-variable fallback for the username and
//! password. The credentials file is either `key=value` lines or a JSON
//! object with case-insensitive keys.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_AUTHORITY: &str = "https://adfs.example.com";
pub const DEFAULT_CLIENT_ID: &str = "adfs-cli";
pub const DEFAULT_REDIRECT_URI: &str = "https://localhost/adfs-cli/redirect";
pub const DEFAULT_SCOPE: &str = "openid";

pub const DEFAULT_USERNAME_VAR: &str = "ADFS_USERNAME";
pub const DEFAULT_PASSWORD_VAR: &str = "ADFS_PASSWORD";

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_REFRESH_LEAD_SECS: u64 = 300;

/// Resolved application settings. Statically typed; nothing is introspected
/// at runtime after load.
#[derive(Debug, Clone)]
pub struct Settings {
    pub authority: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub headless: bool,
    pub slow_mo_ms: Option<u64>,
    /// Overall timeout budget for one authentication attempt, seconds.
    pub timeout_secs: u64,
    /// Accepted from the credentials file; capture itself is not part of the
    /// core flow.
    pub screenshots: bool,
    pub auto_refresh: bool,
    pub refresh_lead_secs: u64,
    /// Token cache location; `None` disables persistence.
    pub cache_path: Option<PathBuf>,
    pub username_var: String,
    pub password_var: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            authority: DEFAULT_AUTHORITY.into(),
            client_id: DEFAULT_CLIENT_ID.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.into(),
            scope: DEFAULT_SCOPE.into(),
            username: None,
            password: None,
            headless: true,
            slow_mo_ms: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            screenshots: false,
            auto_refresh: true,
            refresh_lead_secs: DEFAULT_REFRESH_LEAD_SECS,
            cache_path: default_cache_path(),
            username_var: DEFAULT_USERNAME_VAR.into(),
            password_var: DEFAULT_PASSWORD_VAR.into(),
        }
    }
}

impl Settings {
    /// Resolve settings: defaults, then the credentials file (explicit path,
    /// or the default location if one exists there), then environment
    /// variables for any credential still missing.
    pub fn resolve(config_file: Option<&Path>) -> Result<Self> {
        let mut settings = Self::default();

        match config_file {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("failed to read credentials file {}", path.display()))?;
                settings.apply_file(&content)?;
                debug!(path = %path.display(), "credentials file loaded");
            }
            None => {
                if let Some(path) = default_credentials_path() {
                    if path.exists() {
                        let content = fs::read_to_string(&path).with_context(|| {
                            format!("failed to read credentials file {}", path.display())
                        })?;
                        settings.apply_file(&content)?;
                        debug!(path = %path.display(), "credentials file loaded");
                    }
                }
            }
        }

        settings.apply_env();
        Ok(settings)
    }

    /// Layer one credentials file onto the current settings. JSON object or
    /// `key=value` lines, keys case-insensitive.
    pub fn apply_file(&mut self, content: &str) -> Result<()> {
        if content.trim_start().starts_with('{') {
            let value: serde_json::Value =
                serde_json::from_str(content).context("failed to parse JSON credentials file")?;
            let object = value
                .as_object()
                .context("credentials file must be a JSON object")?;
            for (key, value) in object {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => continue,
                };
                self.apply_key(key, &value);
            }
        } else {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    self.apply_key(key.trim(), value.trim());
                }
            }
        }
        Ok(())
    }

    fn apply_key(&mut self, key: &str, value: &str) {
        // Normalized so `RedirectUri`, `redirect_uri` and `redirecturi` all land.
        let normalized: String = key
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "username" => self.username = Some(value.to_string()),
            "password" => self.password = Some(value.to_string()),
            "authority" => self.authority = value.to_string(),
            "clientid" => self.client_id = value.to_string(),
            "redirecturi" => self.redirect_uri = value.to_string(),
            "scope" => self.scope = value.to_string(),
            "headless" => self.headless = parse_bool(value, self.headless),
            "slowmo" => self.slow_mo_ms = value.parse().ok(),
            "timeout" => {
                if let Ok(secs) = value.parse() {
                    self.timeout_secs = secs;
                }
            }
            "screenshots" => self.screenshots = parse_bool(value, self.screenshots),
            "autorefresh" => self.auto_refresh = parse_bool(value, self.auto_refresh),
            "refreshlead" => {
                if let Ok(secs) = value.parse() {
                    self.refresh_lead_secs = secs;
                }
            }
            "usernamevar" => self.username_var = value.to_string(),
            "passwordvar" => self.password_var = value.to_string(),
            other => debug!(key = other, "ignoring unknown credentials file key"),
        }
    }

    /// Fill missing credentials from the configured environment variables.
    pub fn apply_env(&mut self) {
        if self.username.is_none() {
            self.username = std::env::var(&self.username_var).ok().filter(|v| !v.is_empty());
        }
        if self.password.is_none() {
            self.password = std::env::var(&self.password_var).ok().filter(|v| !v.is_empty());
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => true,
        "false" | "no" | "0" | "off" => false,
        _ => default,
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "adfs-cli", "adfs-cli")
}

/// Default location of the persisted token cache.
pub fn default_cache_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("tokens.json"))
}

/// Default location of the credentials file.
pub fn default_credentials_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("credentials"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_file_layers_over_defaults() {
        let mut settings = Settings::default();
        settings
            .apply_file(
                "# ADFS credentials\nusername=alice\npassword=s3cret\n\
                 Authority=https://sts.corp.example.com\nClientId=portal\n",
            )
            .unwrap();
        assert_eq!(settings.username.as_deref(), Some("alice"));
        assert_eq!(settings.password.as_deref(), Some("s3cret"));
        assert_eq!(settings.authority, "https://sts.corp.example.com");
        assert_eq!(settings.client_id, "portal");
        assert_eq!(settings.scope, DEFAULT_SCOPE);
    }

    #[test]
    fn json_file_keys_are_case_insensitive() {
        let mut settings = Settings::default();
        settings
            .apply_file(
                r#"{"Username":"bob","PASSWORD":"pw","RedirectUri":"https://app/r",
                    "Screenshots":true,"Timeout":30,"Headless":false}"#,
            )
            .unwrap();
        assert_eq!(settings.username.as_deref(), Some("bob"));
        assert_eq!(settings.password.as_deref(), Some("pw"));
        assert_eq!(settings.redirect_uri, "https://app/r");
        assert!(settings.screenshots);
        assert_eq!(settings.timeout_secs, 30);
        assert!(!settings.headless);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut settings = Settings::default();
        settings.apply_file("frobnicate=yes\nusername=carol\n").unwrap();
        assert_eq!(settings.username.as_deref(), Some("carol"));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let mut settings = Settings::default();
        assert!(settings.apply_file("{not json").is_err());
    }

    #[test]
    fn env_fallback_fills_missing_credentials_only() {
        let mut settings = Settings {
            username: Some("from-file".into()),
            username_var: "ADFS_CLI_TEST_USER".into(),
            password_var: "ADFS_CLI_TEST_PASS".into(),
            ..Settings::default()
        };
        std::env::set_var("ADFS_CLI_TEST_USER", "from-env");
        std::env::set_var("ADFS_CLI_TEST_PASS", "env-pass");
        settings.apply_env();
        assert_eq!(settings.username.as_deref(), Some("from-file"));
        assert_eq!(settings.password.as_deref(), Some("env-pass"));
        std::env::remove_var("ADFS_CLI_TEST_USER");
        std::env::remove_var("ADFS_CLI_TEST_PASS");
    }
}
