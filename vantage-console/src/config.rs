//! Console configuration, loaded from a TOML file with `VANTAGE_`
//! environment overrides layered on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::ConsoleError;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub approvals: ApprovalsConfig,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ApprovalsConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        ApprovalsConfig {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api: ApiConfig::default(),
            approvals: ApprovalsConfig::default(),
            log_dir: default_log_dir(),
        }
    }
}

impl Config {
    /// Load from `path` if it exists, then apply `VANTAGE_*` environment
    /// overrides. Nested keys use `__`, e.g. `VANTAGE_API__BASE_URL`.
    pub fn load(path: &Path) -> Result<Self, ConsoleError> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("VANTAGE_").split("__"))
            .extract()
            .map_err(|err| ConsoleError::Validation(format!("invalid configuration: {err}")))
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("vantage.toml")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.approvals.poll_interval_secs)
    }
}

/// A commented starting point written by `init-config`.
pub fn default_config_template() -> &'static str {
    r#"# Vantage console configuration.
# Every value can be overridden with VANTAGE_* environment variables,
# e.g. VANTAGE_API__BASE_URL.

[api]
base_url = "http://localhost:8000/api"
timeout_secs = 10

[approvals]
poll_interval_secs = 5

# Directory for rolling daemon logs.
log_dir = "logs"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000/api");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vantage.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            "[api]\nbase_url = \"https://console.example.com/api\"\n\n\
             [approvals]\npoll_interval_secs = 2\n"
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api.base_url, "https://console.example.com/api");
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        // untouched sections keep their defaults
        assert_eq!(config.api.timeout_secs, 10);
    }

    #[test]
    fn template_parses_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vantage.toml");
        std::fs::write(&path, default_config_template()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api.base_url, Config::default().api.base_url);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
    }
}
