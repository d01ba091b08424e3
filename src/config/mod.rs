use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::language::LanguagePreference;
use crate::pipeline::RuntimeProfile;
use crate::transcript::Method;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which adapters may run and in what order
    pub runtime: RuntimeConfig,

    /// Default language preference when the caller gives none
    pub languages: LanguagePreference,

    /// YouTube Data API credentials
    pub credentials: CredentialsConfig,

    /// Per-adapter time budgets
    pub timeouts: TimeoutConfig,

    /// External programs
    pub tools: ToolsConfig,

    /// HTTP client settings
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// `auto`, `restricted` or `unrestricted`
    pub profile: RuntimeProfile,

    /// Explicit adapter order; empty keeps the default order
    pub adapter_order: Vec<Method>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// API keys, tried in order
    pub api_keys: Vec<String>,

    /// OAuth bearer tokens, tried after the API keys
    pub oauth_tokens: Vec<String>,
}

impl CredentialsConfig {
    pub fn count(&self) -> usize {
        self.api_keys.len() + self.oauth_tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Budget for each HTTP-only adapter, in seconds
    pub http_secs: u64,

    /// Budget for the headless browser adapter, in seconds
    pub browser_secs: u64,

    /// Budget for the yt-dlp adapter, in seconds
    pub process_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http_secs: 8,
            browser_secs: 45,
            process_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn http(&self) -> Duration {
        Duration::from_secs(self.http_secs)
    }

    pub fn browser(&self) -> Duration {
        Duration::from_secs(self.browser_secs)
    }

    pub fn process(&self) -> Duration {
        Duration::from_secs(self.process_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// yt-dlp executable name or path
    pub yt_dlp_path: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Cookie header sent with watch-page requests
    pub cookies: Option<String>,

    /// Largest response body accepted, in bytes
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            cookies: None,
            max_body_bytes: crate::runtime::http::DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Config {
    /// Load configuration from file or create default, then apply the environment overlay
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Read a config file, writing defaults there when it does not exist yet
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs_err::read_to_string(path).context("Failed to read config file")?;

            let config: Config =
                serde_yaml::from_str(&content).context("Failed to parse config file")?;

            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs_err::create_dir_all(parent)?;
            }
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // A config in the working directory takes precedence
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("subtitle-chain").join("config.yaml"))
    }

    /// Overlay credentials, profile and cookies from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut keys: Vec<String> = [
            "YOUTUBE_API_KEY_PRIMARY",
            "YOUTUBE_API_KEY_BACKUP",
            "YOUTUBE_API_KEY_ADDITIONAL",
        ]
        .iter()
        .filter_map(|name| lookup(name))
        .collect();

        if let Some(list) = lookup("YOUTUBE_API_KEYS") {
            keys.extend(list.split(',').map(str::to_string));
        }

        for key in keys {
            push_unique(&mut self.credentials.api_keys, &key);
        }

        if let Some(token) = lookup("YOUTUBE_OAUTH_TOKEN") {
            push_unique(&mut self.credentials.oauth_tokens, &token);
        }

        if let Some(profile) = lookup("SUBTITLE_CHAIN_PROFILE") {
            match profile.parse::<RuntimeProfile>() {
                Ok(profile) => self.runtime.profile = profile,
                Err(e) => tracing::warn!("Ignoring SUBTITLE_CHAIN_PROFILE: {}", e),
            }
        }

        if let Some(cookies) = lookup("YOUTUBE_COOKIES").filter(|c| !c.trim().is_empty()) {
            self.http.cookies = Some(cookies);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.languages.primary.trim().is_empty() {
            anyhow::bail!("languages.primary must not be empty");
        }

        if self.timeouts.http_secs == 0
            || self.timeouts.browser_secs == 0
            || self.timeouts.process_secs == 0
        {
            anyhow::bail!("Adapter timeouts must be greater than zero");
        }

        if self.tools.yt_dlp_path.trim().is_empty() {
            anyhow::bail!("tools.yt_dlp_path must not be empty");
        }

        if self.http.max_body_bytes == 0 {
            anyhow::bail!("http.max_body_bytes must be greater than zero");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Profile: {}", self.runtime.profile);
        if !self.runtime.adapter_order.is_empty() {
            let order: Vec<&str> = self.runtime.adapter_order.iter().map(Method::as_str).collect();
            println!("  Adapter Order: {}", order.join(", "));
        }
        println!("  Languages: {}", self.languages.ordered_languages().join(", "));
        if let Some(region) = &self.languages.region {
            println!("  Region: {}", region);
        }
        println!(
            "  Credentials: {} API key(s), {} OAuth token(s)",
            self.credentials.api_keys.len(),
            self.credentials.oauth_tokens.len()
        );
        println!(
            "  Timeouts: http {}s, browser {}s, yt-dlp {}s",
            self.timeouts.http_secs, self.timeouts.browser_secs, self.timeouts.process_secs
        );
        println!("  yt-dlp: {}", self.tools.yt_dlp_path);
        println!("  Cookies: {}", if self.http.cookies.is_some() { "set" } else { "not set" });
    }
}

fn push_unique(values: &mut Vec<String>, candidate: &str) {
    let candidate = candidate.trim();
    if !candidate.is_empty() && !values.iter().any(|v| v == candidate) {
        values.push(candidate.to_string());
    }
}
