use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod browser;
pub mod library;
pub mod official;
pub mod page;
pub mod youtube;
pub mod ytdlp;

use crate::config::Config;
use crate::language::LanguagePreference;
use crate::runtime::{BrowserError, BrowserRuntime, FetchError, HttpFetch, ProcessError, ProcessRunner};
use crate::transcript::{Method, Transcript, VideoId};
use crate::AdapterError;

/// One subtitle extraction technique
#[async_trait]
pub trait SubtitleAdapter: Send + Sync {
    /// Name reported when this adapter wins
    fn method(&self) -> Method;

    /// Time budget the orchestrator enforces around `attempt`
    fn timeout(&self) -> Duration;

    /// Needs child processes or a browser, which serverless hosts lack
    fn requires_unrestricted_host(&self) -> bool {
        false
    }

    /// Try to produce a transcript for the video
    async fn attempt(&self, video: &VideoId, prefs: &LanguagePreference) -> Result<Transcript, AdapterError>;
}

impl From<FetchError> for AdapterError {
    fn from(err: FetchError) -> Self {
        AdapterError::transport(err.to_string())
    }
}

impl From<ProcessError> for AdapterError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotFound(_) => AdapterError::tool_missing(err.to_string()),
            ProcessError::Io { .. } => AdapterError::tool_missing(err.to_string()),
        }
    }
}

impl From<BrowserError> for AdapterError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Unavailable(_) => AdapterError::tool_missing(err.to_string()),
            BrowserError::Navigation(_) => AdapterError::transport(err.to_string()),
            BrowserError::Script(_) => AdapterError::parse(err.to_string()),
        }
    }
}

/// Runtimes shared by the adapters of one chain
#[derive(Clone)]
pub struct Collaborators {
    pub http: Arc<dyn HttpFetch>,
    pub process: Arc<dyn ProcessRunner>,
    pub browser: Option<Arc<dyn BrowserRuntime>>,
}

/// Ordered set of adapters
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn SubtitleAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every adapter in default priority order.
    /// The official adapter is only included when credentials are configured.
    pub fn from_config(config: &Config, collaborators: &Collaborators) -> Self {
        let mut registry = Self::new();
        let http_timeout = config.timeouts.http();

        let credentials = official::Credential::from_config(&config.credentials);
        if credentials.is_empty() {
            tracing::debug!("No YouTube API credentials configured, skipping official captions");
        } else {
            registry.register(Arc::new(official::OfficialCaptionsAdapter::new(
                collaborators.http.clone(),
                credentials,
                http_timeout,
            )));
        }

        registry.register(Arc::new(library::TranscriptLibraryAdapter::new(
            collaborators.http.clone(),
            http_timeout,
        )));

        registry.register(Arc::new(
            page::PageScrapeAdapter::new(collaborators.http.clone(), http_timeout)
                .with_cookies(config.http.cookies.clone()),
        ));

        registry.register(Arc::new(browser::HeadlessBrowserAdapter::new(
            collaborators.browser.clone(),
            collaborators.http.clone(),
            config.timeouts.browser(),
        )));

        registry.register(Arc::new(ytdlp::YtDlpAdapter::new(
            collaborators.process.clone(),
            config.tools.yt_dlp_path.clone(),
            config.timeouts.process(),
        )));

        registry
    }

    /// Register a new adapter at the end of the chain
    pub fn register(&mut self, adapter: Arc<dyn SubtitleAdapter>) {
        self.adapters.push(adapter);
    }

    /// List the registered methods in order
    pub fn list_methods(&self) -> Vec<Method> {
        self.adapters.iter().map(|adapter| adapter.method()).collect()
    }

    /// Adapters allowed on this host, reordered by `order` when it is not empty.
    /// Methods missing from a non-empty `order` are left out.
    pub fn into_chain(self, allow_unrestricted: bool, order: &[Method]) -> Vec<Arc<dyn SubtitleAdapter>> {
        let allowed: Vec<Arc<dyn SubtitleAdapter>> = self
            .adapters
            .into_iter()
            .filter(|adapter| allow_unrestricted || !adapter.requires_unrestricted_host())
            .collect();

        if order.is_empty() {
            return allowed;
        }

        let mut chain = Vec::new();
        for method in order {
            if chain.iter().any(|a: &Arc<dyn SubtitleAdapter>| a.method() == *method) {
                continue;
            }
            match allowed.iter().find(|adapter| adapter.method() == *method) {
                Some(adapter) => chain.push(adapter.clone()),
                None => tracing::debug!("Adapter {} is not available in this chain", method),
            }
        }
        chain
    }
}
