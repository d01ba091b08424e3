use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::extractors::{AdapterRegistry, Collaborators, SubtitleAdapter};
use crate::language::LanguagePreference;
use crate::runtime::{BrowserRuntime, ReqwestFetcher, TokioProcessRunner};
use crate::transcript::{Method, Transcript, VideoId};
use crate::{AdapterError, ErrorKind};

/// Host class deciding which adapters may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeProfile {
    /// Detect from the environment
    #[default]
    Auto,
    /// Serverless host: HTTP-only adapters
    Restricted,
    /// Full host: child processes and a browser are allowed
    Unrestricted,
}

impl RuntimeProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeProfile::Auto => "auto",
            RuntimeProfile::Restricted => "restricted",
            RuntimeProfile::Unrestricted => "unrestricted",
        }
    }

    /// Resolve `Auto` from the process environment
    pub fn resolve(self) -> Self {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve `Auto`: serverless markers select `Restricted`
    pub fn resolve_with<F>(self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if self != RuntimeProfile::Auto {
            return self;
        }

        let serverless = ["VERCEL", "VERCEL_ENV", "AWS_LAMBDA_FUNCTION_NAME"]
            .iter()
            .any(|name| lookup(name).is_some_and(|value| !value.is_empty()))
            || lookup("NODE_ENV").as_deref() == Some("production");

        if serverless {
            RuntimeProfile::Restricted
        } else {
            RuntimeProfile::Unrestricted
        }
    }

    pub fn allows_unrestricted(&self) -> bool {
        matches!(self, RuntimeProfile::Unrestricted)
    }
}

impl fmt::Display for RuntimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(RuntimeProfile::Auto),
            "restricted" => Ok(RuntimeProfile::Restricted),
            "unrestricted" => Ok(RuntimeProfile::Unrestricted),
            other => Err(format!("Unknown runtime profile: {}", other)),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Language codes in preference order; empty uses the configured default
    pub preferred_languages: Vec<String>,
}

/// One adapter's failure as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub method: Method,
    pub kind: ErrorKind,
    pub message: String,
}

/// Why an extraction produced no transcript
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ExtractionFailure {
    pub kind: ErrorKind,
    /// Most specific per-adapter kind, when adapters ran
    pub cause: Option<ErrorKind>,
    pub message: String,
    /// Methods in invocation order
    pub attempted_methods: Vec<Method>,
    pub failures: Vec<AttemptFailure>,
}

impl ExtractionFailure {
    /// Kind that decides retry semantics: the cause when there is one
    pub fn effective_kind(&self) -> ErrorKind {
        self.cause.unwrap_or(self.kind)
    }

    pub fn is_retryable(&self) -> bool {
        self.effective_kind().is_retryable()
    }
}

/// Outcome of one extraction
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    Success(Transcript),
    Failure(ExtractionFailure),
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionResult::Success(_))
    }

    pub fn into_result(self) -> Result<Transcript, ExtractionFailure> {
        match self {
            ExtractionResult::Success(transcript) => Ok(transcript),
            ExtractionResult::Failure(failure) => Err(failure),
        }
    }
}

/// Raised by [`SubtitleExtractor::extract_until`] when shutdown wins
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Extraction cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    Pending,
    TryingAdapter(usize),
    Succeeded(Method),
    AllFailed,
}

type AttemptObserver = Arc<dyn Fn(Method) + Send + Sync>;

/// Runs adapters in priority order until one yields a transcript
pub struct SubtitleExtractor {
    adapters: Vec<Arc<dyn SubtitleAdapter>>,
    default_prefs: LanguagePreference,
    observer: Option<AttemptObserver>,
}

impl SubtitleExtractor {
    pub fn new(adapters: Vec<Arc<dyn SubtitleAdapter>>, default_prefs: LanguagePreference) -> Self {
        Self {
            adapters,
            default_prefs,
            observer: None,
        }
    }

    /// Build the production chain for a profile
    pub fn from_config(config: &Config, profile: RuntimeProfile) -> Result<Self> {
        let profile = profile.resolve();
        let collaborators = Self::collaborators(config)?;
        let chain = AdapterRegistry::from_config(config, &collaborators)
            .into_chain(profile.allows_unrestricted(), &config.runtime.adapter_order);

        let methods: Vec<&str> = chain.iter().map(|adapter| adapter.method().as_str()).collect();
        tracing::info!("Adapter chain ({}): {}", profile, methods.join(" -> "));

        Ok(Self::new(chain, config.languages.clone()))
    }

    fn collaborators(config: &Config) -> Result<Collaborators> {
        let http = ReqwestFetcher::new(config.timeouts.http(), config.http.max_body_bytes)
            .context("Failed to build HTTP client")?;

        Ok(Collaborators {
            http: Arc::new(http),
            process: Arc::new(TokioProcessRunner::new()),
            browser: Self::browser_runtime(config),
        })
    }

    #[cfg(feature = "browser")]
    fn browser_runtime(config: &Config) -> Option<Arc<dyn BrowserRuntime>> {
        Some(Arc::new(crate::runtime::ChromeRuntime::new(config.timeouts.browser())))
    }

    #[cfg(not(feature = "browser"))]
    fn browser_runtime(_config: &Config) -> Option<Arc<dyn BrowserRuntime>> {
        None
    }

    /// Call `observer` with each method just before it is tried
    pub fn on_attempt<F>(mut self, observer: F) -> Self
    where
        F: Fn(Method) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Methods in chain order
    pub fn methods(&self) -> Vec<Method> {
        self.adapters.iter().map(|adapter| adapter.method()).collect()
    }

    /// Resolve the identifier and run the chain
    pub async fn extract(&self, input: &str, options: &ExtractOptions) -> ExtractionResult {
        let video = match VideoId::parse(input) {
            Ok(video) => video,
            Err(e) => {
                tracing::warn!("{}", e);
                return ExtractionResult::Failure(ExtractionFailure {
                    kind: ErrorKind::InvalidVideoId,
                    cause: None,
                    message: e.to_string(),
                    attempted_methods: Vec::new(),
                    failures: Vec::new(),
                });
            }
        };

        let prefs = if options.preferred_languages.is_empty() {
            self.default_prefs.clone()
        } else {
            LanguagePreference::from_codes(&options.preferred_languages)
        };

        let span = tracing::info_span!("extract", run = %Uuid::new_v4(), video = %video);
        self.run_chain(&video, &prefs).instrument(span).await
    }

    /// Like [`extract`](Self::extract), but gives up when `shutdown` completes first.
    /// The in-flight adapter is dropped, which kills its child process or browser.
    pub async fn extract_until<F>(
        &self,
        input: &str,
        options: &ExtractOptions,
        shutdown: F,
    ) -> Result<ExtractionResult, Cancelled>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.extract(input, options) => Ok(result),
            _ = shutdown => {
                tracing::warn!("Extraction cancelled");
                Err(Cancelled)
            }
        }
    }

    async fn run_chain(&self, video: &VideoId, prefs: &LanguagePreference) -> ExtractionResult {
        let mut state = ChainState::Pending;
        tracing::debug!("{:?}", state);

        if self.adapters.is_empty() {
            tracing::warn!("No extraction adapters available");
            return ExtractionResult::Failure(ExtractionFailure {
                kind: ErrorKind::AllMethodsFailed,
                cause: Some(ErrorKind::ToolNotAvailable),
                message: "no extraction adapters are available in this environment".to_string(),
                attempted_methods: Vec::new(),
                failures: Vec::new(),
            });
        }

        let mut attempted_methods = Vec::new();
        let mut failures: Vec<AttemptFailure> = Vec::new();

        for (index, adapter) in self.adapters.iter().enumerate() {
            state = ChainState::TryingAdapter(index);
            let method = adapter.method();
            tracing::info!("{:?}: trying {}", state, method);

            if let Some(observer) = &self.observer {
                observer(method);
            }
            attempted_methods.push(method);

            match Self::run_adapter(adapter.as_ref(), video, prefs).await {
                Ok(transcript) => {
                    state = ChainState::Succeeded(method);
                    tracing::info!("{:?}: {} lines", state, transcript.len());
                    return ExtractionResult::Success(transcript.with_method(method));
                }
                Err(err) => {
                    tracing::warn!("{} failed: {}", method, err);
                    failures.push(AttemptFailure {
                        method,
                        kind: err.kind,
                        message: err.message,
                    });
                }
            }
        }

        state = ChainState::AllFailed;
        tracing::warn!("{:?} after {} adapters", state, attempted_methods.len());

        // strictly greater keeps the earliest failure on ties
        let mut cause: Option<&AttemptFailure> = None;
        for failure in &failures {
            if cause.map_or(true, |best| failure.kind.specificity() > best.kind.specificity()) {
                cause = Some(failure);
            }
        }

        let message = match cause {
            Some(failure) => format!("{} ({}: {})", failure.kind.describe(), failure.method, failure.message),
            None => ErrorKind::AllMethodsFailed.describe().to_string(),
        };

        ExtractionResult::Failure(ExtractionFailure {
            kind: ErrorKind::AllMethodsFailed,
            cause: cause.map(|failure| failure.kind),
            message,
            attempted_methods,
            failures,
        })
    }

    async fn run_adapter(
        adapter: &dyn SubtitleAdapter,
        video: &VideoId,
        prefs: &LanguagePreference,
    ) -> Result<Transcript, AdapterError> {
        let budget = adapter.timeout();
        let transcript = tokio::time::timeout(budget, adapter.attempt(video, prefs))
            .await
            .map_err(|_| AdapterError::transport(format!("timed out after {}s", budget.as_secs_f64())))??;

        if transcript.is_empty() {
            return Err(AdapterError::parse("adapter returned a transcript without lines"));
        }

        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::CanonicalLine;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    enum Behavior {
        Succeed(Vec<CanonicalLine>),
        Fail(ErrorKind),
        Hang,
    }

    struct StubAdapter {
        method: Method,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
        timeout: Duration,
        dropped: Arc<AtomicBool>,
    }

    impl StubAdapter {
        fn new(method: Method, behavior: Behavior) -> Self {
            Self {
                method,
                behavior,
                calls: Arc::new(AtomicUsize::new(0)),
                timeout: Duration::from_secs(5),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SubtitleAdapter for StubAdapter {
        fn method(&self) -> Method {
            self.method
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        async fn attempt(&self, _video: &VideoId, _prefs: &LanguagePreference) -> Result<Transcript, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed(lines) => Ok(Transcript::from_lines(lines.clone())),
                Behavior::Fail(kind) => Err(AdapterError::new(*kind, "stub failure")),
                Behavior::Hang => {
                    let _guard = DropFlag(self.dropped.clone());
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(AdapterError::transport("unreachable"))
                }
            }
        }
    }

    fn lines() -> Vec<CanonicalLine> {
        vec![CanonicalLine::new(1.0, "hello").unwrap()]
    }

    fn extractor(adapters: Vec<StubAdapter>) -> SubtitleExtractor {
        let adapters = adapters
            .into_iter()
            .map(|a| Arc::new(a) as Arc<dyn SubtitleAdapter>)
            .collect();
        SubtitleExtractor::new(adapters, LanguagePreference::default())
    }

    const VIDEO: &str = "https://youtu.be/dQw4w9WgXcQ";

    #[test]
    fn test_invalid_identifier_runs_no_adapter() {
        let stub = StubAdapter::new(Method::PageScrape, Behavior::Succeed(lines()));
        let calls = stub.calls.clone();
        let extractor = extractor(vec![stub]);

        let result = tokio_test::block_on(extractor.extract("not a video", &ExtractOptions::default()));
        let failure = result.into_result().unwrap_err();

        assert_eq!(failure.kind, ErrorKind::InvalidVideoId);
        assert!(failure.attempted_methods.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_success_stops_the_chain() {
        let first = StubAdapter::new(Method::TranscriptLibrary, Behavior::Fail(ErrorKind::NoCaptionsAvailable));
        let second = StubAdapter::new(Method::HeadlessBrowser, Behavior::Fail(ErrorKind::TransportError));
        let third = StubAdapter::new(Method::PageScrape, Behavior::Succeed(lines()));
        let fourth = StubAdapter::new(Method::ExternalDownloader, Behavior::Succeed(lines()));
        let second_calls = second.calls.clone();
        let fourth_calls = fourth.calls.clone();

        let result = extractor(vec![first, second, third, fourth])
            .extract(VIDEO, &ExtractOptions::default())
            .await;

        let transcript = result.into_result().unwrap();
        assert_eq!(transcript.method, Some(Method::PageScrape));
        assert_eq!(transcript.lines[0].text, "hello");
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fourth_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_failed_reports_most_specific_cause() {
        let result = extractor(vec![
            StubAdapter::new(Method::TranscriptLibrary, Behavior::Fail(ErrorKind::TransportError)),
            StubAdapter::new(Method::PageScrape, Behavior::Fail(ErrorKind::NoCaptionsAvailable)),
            StubAdapter::new(Method::ExternalDownloader, Behavior::Fail(ErrorKind::ToolNotAvailable)),
        ])
        .extract(VIDEO, &ExtractOptions::default())
        .await;

        let failure = result.into_result().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::AllMethodsFailed);
        assert_eq!(failure.cause, Some(ErrorKind::NoCaptionsAvailable));
        assert_eq!(
            failure.attempted_methods,
            vec![Method::TranscriptLibrary, Method::PageScrape, Method::ExternalDownloader]
        );
        assert_eq!(failure.failures.len(), 3);
        assert!(!failure.is_retryable());
    }

    #[tokio::test]
    async fn test_specificity_ties_keep_earliest() {
        let result = extractor(vec![
            StubAdapter::new(Method::OfficialCaptions, Behavior::Fail(ErrorKind::QuotaExceeded)),
            StubAdapter::new(Method::TranscriptLibrary, Behavior::Fail(ErrorKind::QuotaExceeded)),
        ])
        .extract(VIDEO, &ExtractOptions::default())
        .await;

        let failure = result.into_result().unwrap_err();
        assert_eq!(failure.cause, Some(ErrorKind::QuotaExceeded));
        assert!(failure.message.contains("official-captions"));
        assert!(failure.is_retryable());
    }

    #[tokio::test]
    async fn test_zero_line_success_is_parse_error() {
        let result = extractor(vec![
            StubAdapter::new(Method::PageScrape, Behavior::Succeed(Vec::new())),
            StubAdapter::new(Method::ExternalDownloader, Behavior::Fail(ErrorKind::ToolNotAvailable)),
        ])
        .extract(VIDEO, &ExtractOptions::default())
        .await;

        let failure = result.into_result().unwrap_err();
        assert_eq!(failure.failures[0].kind, ErrorKind::ParseError);
        assert_eq!(failure.cause, Some(ErrorKind::ParseError));
    }

    #[tokio::test]
    async fn test_empty_chain_is_tool_not_available() {
        let result = extractor(Vec::new())
            .extract("dQw4w9WgXcQ", &ExtractOptions::default())
            .await;

        let failure = result.into_result().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::AllMethodsFailed);
        assert_eq!(failure.cause, Some(ErrorKind::ToolNotAvailable));
    }

    #[tokio::test]
    async fn test_timeout_is_transport_error_and_chain_continues() {
        let mut slow = StubAdapter::new(Method::HeadlessBrowser, Behavior::Hang);
        slow.timeout = Duration::from_millis(50);
        let dropped = slow.dropped.clone();
        let fallback = StubAdapter::new(Method::ExternalDownloader, Behavior::Succeed(lines()));

        let result = extractor(vec![slow, fallback])
            .extract(VIDEO, &ExtractOptions::default())
            .await;

        let transcript = result.into_result().unwrap();
        assert_eq!(transcript.method, Some(Method::ExternalDownloader));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timeout_failure_kind() {
        let mut slow = StubAdapter::new(Method::HeadlessBrowser, Behavior::Hang);
        slow.timeout = Duration::from_millis(20);

        let failure = extractor(vec![slow])
            .extract(VIDEO, &ExtractOptions::default())
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(failure.failures[0].kind, ErrorKind::TransportError);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_adapter() {
        let slow = StubAdapter::new(Method::ExternalDownloader, Behavior::Hang);
        let dropped = slow.dropped.clone();
        let extractor = extractor(vec![slow]);

        let outcome = extractor
            .extract_until(
                VIDEO,
                &ExtractOptions::default(),
                tokio::time::sleep(Duration::from_millis(20)),
            )
            .await;

        assert_eq!(outcome, Err(Cancelled));
        assert!(dropped.load(Ordering::SeqCst));
    }

    /// Running and not yet a zombie
    #[cfg(target_os = "linux")]
    fn process_alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z'),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_shutdown_kills_real_yt_dlp_child() {
        use crate::extractors::ytdlp::YtDlpAdapter;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let script = dir.path().join("yt-dlp");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let adapter = YtDlpAdapter::new(
            Arc::new(TokioProcessRunner::new()),
            script.to_string_lossy(),
            Duration::from_secs(60),
        );
        let adapters: Vec<Arc<dyn SubtitleAdapter>> = vec![Arc::new(adapter)];
        let extractor = SubtitleExtractor::new(adapters, LanguagePreference::default());

        let watched = pid_file.clone();
        let child_started = async move {
            loop {
                let pid = std::fs::read_to_string(&watched)
                    .ok()
                    .and_then(|raw| raw.trim().parse::<u32>().ok());
                if let Some(pid) = pid {
                    if process_alive(pid) {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        let shutdown = async move {
            tokio::time::timeout(Duration::from_secs(10), child_started)
                .await
                .expect("fake yt-dlp never started");
        };

        let outcome = extractor.extract_until(VIDEO, &ExtractOptions::default(), shutdown).await;
        assert_eq!(outcome, Err(Cancelled));

        let pid: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        let mut alive = process_alive(pid);
        for _ in 0..100 {
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            alive = process_alive(pid);
        }
        assert!(!alive, "child {} survived cancellation", pid);
    }

    #[tokio::test]
    async fn test_observer_sees_each_attempt() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let extractor = extractor(vec![
            StubAdapter::new(Method::TranscriptLibrary, Behavior::Fail(ErrorKind::ParseError)),
            StubAdapter::new(Method::PageScrape, Behavior::Succeed(lines())),
        ])
        .on_attempt(move |method| sink.lock().unwrap().push(method));

        assert!(extractor.extract(VIDEO, &ExtractOptions::default()).await.is_success());
        assert_eq!(*seen.lock().unwrap(), vec![Method::TranscriptLibrary, Method::PageScrape]);
    }

    #[test]
    fn test_profile_detection() {
        let env = |pairs: &'static [(&'static str, &'static str)]| {
            let map: HashMap<&str, &str> = pairs.iter().copied().collect();
            move |name: &str| map.get(name).map(|v| v.to_string())
        };

        assert_eq!(RuntimeProfile::Auto.resolve_with(env(&[("VERCEL", "1")])), RuntimeProfile::Restricted);
        assert_eq!(
            RuntimeProfile::Auto.resolve_with(env(&[("AWS_LAMBDA_FUNCTION_NAME", "fn")])),
            RuntimeProfile::Restricted
        );
        assert_eq!(
            RuntimeProfile::Auto.resolve_with(env(&[("NODE_ENV", "production")])),
            RuntimeProfile::Restricted
        );
        assert_eq!(
            RuntimeProfile::Auto.resolve_with(env(&[("NODE_ENV", "development")])),
            RuntimeProfile::Unrestricted
        );
        assert_eq!(
            RuntimeProfile::Unrestricted.resolve_with(env(&[("VERCEL", "1")])),
            RuntimeProfile::Unrestricted
        );
        assert_eq!("Restricted".parse::<RuntimeProfile>(), Ok(RuntimeProfile::Restricted));
        assert!("maybe".parse::<RuntimeProfile>().is_err());
    }
}
