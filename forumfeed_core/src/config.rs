use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "FORUMFEED_CONFIG";
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Base URL of the remote feed API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Posts requested per page (`limit`).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// How often the refresh scheduler re-checks the first page.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Per-request timeout handed to the HTTP client.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            page_size: default_page_size(),
            refresh_interval_secs: default_refresh_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl FeedConfig {
    /// Loads `path` (or the discovered default file, if any), then applies
    /// environment overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => match default_config_path().filter(|path| path.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            bail!("api_url may not be empty");
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            bail!("page_size must be between 1 and {MAX_PAGE_SIZE}, got {}", self.page_size);
        }
        if self.refresh_interval_secs == 0 {
            bail!("refresh_interval_secs must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn apply_env(&mut self) {
        if let Some(url) = env::var("FORUMFEED_API_URL").ok().and_then(|raw| {
            if raw.trim().is_empty() {
                None
            } else {
                Some(raw)
            }
        }) {
            self.api_url = url;
        }
        if let Some(size) = parsed_env("FORUMFEED_PAGE_SIZE") {
            self.page_size = size;
        }
        if let Some(secs) = parsed_env("FORUMFEED_REFRESH_SECS") {
            self.refresh_interval_secs = secs;
        }
        if let Some(secs) = parsed_env("FORUMFEED_TIMEOUT_SECS") {
            self.request_timeout_secs = secs;
        }
    }
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("forumfeed").join("config.toml"))
}

fn default_api_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_page_size() -> usize {
    20
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "api_url = \"https://forum.example\"\npage_size = 5").unwrap();

        let config = FeedConfig::from_file(file.path()).expect("config");
        assert_eq!(config.api_url, "https://forum.example");
        assert_eq!(config.page_size, 5);
        assert_eq!(config.refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "page_size = \"lots\"").unwrap();

        let err = FeedConfig::from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = FeedConfig::default();
        assert!(config.validate().is_ok());

        config.page_size = 0;
        assert!(config.validate().is_err());

        config.page_size = MAX_PAGE_SIZE + 1;
        assert!(config.validate().is_err());

        config = FeedConfig {
            refresh_interval_secs: 0,
            ..FeedConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
