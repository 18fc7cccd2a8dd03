//! Configuration for the Firebase project

use crate::firebase::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_AUTH_URL: &str = "https://identitytoolkit.googleapis.com";
pub const DEFAULT_TOKEN_URL: &str = "https://securetoken.googleapis.com";
pub const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com";
pub const DEFAULT_DATABASE_ID: &str = "(default)";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirebaseConfig {
    /// Web API key of the project
    pub api_key: String,
    pub project_id: String,
    #[serde(default = "default_database_id")]
    pub database_id: String,
    /// Identity Toolkit base URL; point at an emulator or mock in tests
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_firestore_url")]
    pub firestore_url: String,
    /// Where credentials are persisted between runs; no persistence if unset
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

fn default_database_id() -> String {
    DEFAULT_DATABASE_ID.to_string()
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_firestore_url() -> String {
    DEFAULT_FIRESTORE_URL.to_string()
}

impl FirebaseConfig {
    pub fn new(api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Routes all three services to one base URL (emulator or test server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        let url = url.trim_end_matches('/').to_string();
        self.auth_url = url.clone();
        self.token_url = url.clone();
        self.firestore_url = url;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: FirebaseConfig = toml::from_str(text)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Applies `PNL_FIREBASE_API_KEY`, `PNL_FIREBASE_PROJECT_ID` and
    /// `PNL_SESSION_FILE` on top of the loaded values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup("PNL_FIREBASE_API_KEY") {
            self.api_key = key;
        }
        if let Some(project) = lookup("PNL_FIREBASE_PROJECT_ID") {
            self.project_id = project;
        }
        if let Some(path) = lookup("PNL_SESSION_FILE") {
            self.session_file = Some(PathBuf::from(path));
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("api_key"));
        }
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::Missing("project_id"));
        }
        Ok(())
    }

    /// Root of the document tree, e.g.
    /// `https://firestore.googleapis.com/v1/projects/p/databases/(default)/documents`
    pub fn documents_root(&self) -> String {
        format!(
            "{}/v1/projects/{}/databases/{}/documents",
            self.firestore_url.trim_end_matches('/'),
            self.project_id,
            self.database_id
        )
    }
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            project_id: String::new(),
            database_id: default_database_id(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            firestore_url: default_firestore_url(),
            session_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let config = FirebaseConfig::from_toml_str(
            r#"
            api_key = "k"
            project_id = "pnl-manager"
            "#,
        )
        .unwrap();

        assert_eq!(config.database_id, "(default)");
        assert_eq!(config.auth_url, DEFAULT_AUTH_URL);
        assert!(config.session_file.is_none());
        assert_eq!(
            config.documents_root(),
            "https://firestore.googleapis.com/v1/projects/pnl-manager/databases/(default)/documents"
        );
    }

    #[test]
    fn test_validate_requires_api_key_and_project() {
        let err = FirebaseConfig::new("", "p").validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("api_key")));

        let err = FirebaseConfig::new("k", " ").validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("project_id")));

        assert!(FirebaseConfig::new("k", "p").validate().is_ok());
    }

    #[test]
    fn test_overrides_replace_loaded_values() {
        let env: HashMap<&str, &str> = [
            ("PNL_FIREBASE_API_KEY", "from-env"),
            ("PNL_SESSION_FILE", "/tmp/pnl-session.json"),
        ]
        .into_iter()
        .collect();

        let config = FirebaseConfig::new("from-file", "p")
            .with_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_key, "from-env");
        assert_eq!(config.project_id, "p");
        assert_eq!(
            config.session_file,
            Some(PathBuf::from("/tmp/pnl-session.json"))
        );
    }

    #[test]
    fn test_base_url_routes_every_service() {
        let config = FirebaseConfig::new("k", "p").with_base_url("http://127.0.0.1:9099/");
        assert_eq!(config.auth_url, "http://127.0.0.1:9099");
        assert_eq!(config.token_url, "http://127.0.0.1:9099");
        assert!(config
            .documents_root()
            .starts_with("http://127.0.0.1:9099/v1/projects/p/"));
    }
}
