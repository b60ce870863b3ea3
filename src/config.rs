// src/config.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_PAGE_LIMIT: u32 = 20;
const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;
const DEFAULT_EXPIRY_CHECK_SECS: u64 = 60;
const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 15 * 60;
const DEFAULT_UNREAD_POLL_SECS: u64 = 30 * 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Where the session file lives. Relative paths resolve against the
    /// current working directory; the default is under the user config dir.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_expiry_check")]
    pub expiry_check_interval_secs: u64,
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_unread_poll")]
    pub unread_poll_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    local: ClientConfig,
    production: ClientConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            storage_path: default_storage_path(),
            page_limit: default_page_limit(),
            session_ttl_secs: default_session_ttl(),
            expiry_check_interval_secs: default_expiry_check(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            unread_poll_interval_secs: default_unread_poll(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ClientConfig {
    /// Load configuration based on environment. A missing config.yaml
    /// falls back to built-in defaults so the CLI works out of the box.
    pub fn load() -> Result<Self> {
        let environment = Self::get_environment();
        info!("Loading configuration for environment: {}", environment);

        let mut config = Self::load_from_file(&environment)?.unwrap_or_default();

        if let Ok(url) = std::env::var("JOBPULSE_API_URL") {
            config.api_base_url = url;
        }
        config.storage_path = Self::resolve_path(&config.storage_path)?;

        Ok(config)
    }

    fn get_environment() -> String {
        std::env::var("JOBPULSE_ENV")
            .or_else(|_| std::env::var("ENVIRONMENT"))
            .or_else(|_| std::env::var("ENV"))
            .unwrap_or_else(|_| "local".to_string())
    }

    fn load_from_file(environment: &str) -> Result<Option<Self>> {
        let config_path = PathBuf::from("config.yaml");
        if !config_path.exists() {
            return Ok(None);
        }

        let config_content =
            std::fs::read_to_string(&config_path).context("Failed to read config.yaml")?;

        let config_file: ConfigFile =
            serde_yaml::from_str(&config_content).context("Failed to parse config.yaml")?;

        let env_config = match environment {
            "production" => config_file.production,
            _ => config_file.local,
        };

        Ok(Some(env_config))
    }

    fn resolve_path(path: &PathBuf) -> Result<PathBuf> {
        if path.is_absolute() {
            Ok(path.clone())
        } else {
            let current_dir = std::env::current_dir().context("Failed to get current directory")?;
            Ok(current_dir.join(path))
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn expiry_check_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_check_interval_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn unread_poll_interval(&self) -> Duration {
        Duration::from_secs(self.unread_poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_storage_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobpulse")
        .join("session.json")
}

fn default_page_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_expiry_check() -> u64 {
    DEFAULT_EXPIRY_CHECK_SECS
}

fn default_inactivity_timeout() -> u64 {
    DEFAULT_INACTIVITY_TIMEOUT_SECS
}

fn default_unread_poll() -> u64 {
    DEFAULT_UNREAD_POLL_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
