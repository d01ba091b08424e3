use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    #[error("Browser runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Page script failed: {0}")]
    Script(String),
}

/// Loads a page in a real browser and evaluates a script in it.
///
/// The script's completion value is returned as JSON. Dropping the returned
/// future (timeout or cancellation) closes the browser even when the
/// underlying driver is blocking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserRuntime: Send + Sync {
    async fn evaluate(&self, url: &str, script: &str) -> Result<serde_json::Value, BrowserError>;
}

/// Decode a script result that was returned through `JSON.stringify`
pub fn decode_script_value(value: serde_json::Value) -> Result<serde_json::Value, BrowserError> {
    match value {
        serde_json::Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|e| BrowserError::Script(format!("script returned invalid JSON: {}", e))),
        other => Ok(other),
    }
}

struct SessionSlot<T> {
    resource: Mutex<Option<T>>,
    cancelled: AtomicBool,
}

/// Owned by the awaiting future. Dropping it marks the session cancelled and
/// drops the installed resource, which for Chrome kills the browser process.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub(crate) struct SessionGuard<T> {
    slot: Arc<SessionSlot<T>>,
}

/// The blocking side of a [`SessionGuard`]
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub(crate) struct SessionHandle<T> {
    slot: Arc<SessionSlot<T>>,
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
impl<T> SessionGuard<T> {
    pub(crate) fn new() -> (Self, SessionHandle<T>) {
        let slot = Arc::new(SessionSlot {
            resource: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        });
        (Self { slot: Arc::clone(&slot) }, SessionHandle { slot })
    }
}

impl<T> Drop for SessionGuard<T> {
    fn drop(&mut self) {
        self.slot.cancelled.store(true, Ordering::SeqCst);
        let resource = match self.slot.resource.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if resource.is_some() {
            tracing::debug!("Browser session released before completion");
        }
        drop(resource);
    }
}

#[cfg_attr(not(feature = "browser"), allow(dead_code))]
impl<T> SessionHandle<T> {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.slot.cancelled.load(Ordering::SeqCst)
    }

    /// Err when the session was cancelled between steps
    pub(crate) fn ensure_active(&self) -> Result<(), BrowserError> {
        if self.is_cancelled() {
            return Err(BrowserError::Unavailable("browser session cancelled".to_string()));
        }
        Ok(())
    }

    /// Hand the resource to the guard; dropped at once if already cancelled
    pub(crate) fn install(&self, resource: T) -> Result<(), BrowserError> {
        let mut slot = match self.slot.resource.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.ensure_active()?;
        *slot = Some(resource);
        Ok(())
    }

    /// Run `f` against the installed resource while the session is live
    pub(crate) fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, BrowserError> {
        self.ensure_active()?;
        let slot = match self.slot.resource.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot.as_ref() {
            Some(resource) => Ok(f(resource)),
            None => Err(BrowserError::Unavailable("browser session closed".to_string())),
        }
    }
}

#[cfg(feature = "browser")]
pub use chrome::ChromeRuntime;

#[cfg(feature = "browser")]
mod chrome {
    use async_trait::async_trait;
    use headless_chrome::{Browser, LaunchOptions};
    use std::time::Duration;

    use super::{decode_script_value, BrowserError, BrowserRuntime, SessionGuard, SessionHandle};

    /// Headless Chrome driven over the DevTools protocol
    pub struct ChromeRuntime {
        budget: Duration,
    }

    impl ChromeRuntime {
        /// `budget` bounds navigation, evaluation and the browser's idle lifetime
        pub fn new(budget: Duration) -> Self {
            Self { budget }
        }

        fn evaluate_blocking(
            session: &SessionHandle<Browser>,
            url: &str,
            script: &str,
            budget: Duration,
        ) -> Result<serde_json::Value, BrowserError> {
            let options = LaunchOptions::default_builder()
                .headless(true)
                .sandbox(false)
                .idle_browser_timeout(budget)
                .build()
                .map_err(|e| BrowserError::Unavailable(e.to_string()))?;

            session.ensure_active()?;
            let browser = Browser::new(options).map_err(|e| BrowserError::Unavailable(e.to_string()))?;
            session.install(browser)?;

            // the tab holds no handle on the Chrome process, so releasing the
            // session still kills it mid-navigation
            let tab = session
                .with(|browser| browser.new_tab())?
                .map_err(|e| BrowserError::Unavailable(e.to_string()))?;
            tab.set_default_timeout(budget);

            session.ensure_active()?;
            tab.navigate_to(url)
                .and_then(|tab| tab.wait_until_navigated())
                .map_err(|e| BrowserError::Navigation(e.to_string()))?;

            session.ensure_active()?;
            let result = tab
                .evaluate(script, true)
                .map_err(|e| BrowserError::Script(e.to_string()))?;

            let value = result
                .value
                .ok_or_else(|| BrowserError::Script("script produced no value".to_string()))?;

            decode_script_value(value)
        }
    }

    #[async_trait]
    impl BrowserRuntime for ChromeRuntime {
        async fn evaluate(&self, url: &str, script: &str) -> Result<serde_json::Value, BrowserError> {
            let url = url.to_string();
            let script = script.to_string();
            let budget = self.budget;

            tracing::debug!("Launching headless Chrome for {}", url);

            // `_guard` lives in this future: a timeout or cancellation drops it
            // and closes Chrome while the blocking thread is still waiting
            let (_guard, session) = SessionGuard::new();
            tokio::task::spawn_blocking(move || Self::evaluate_blocking(&session, &url, &script, budget))
                .await
                .map_err(|e| BrowserError::Unavailable(format!("browser task failed: {}", e)))?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_stringified_result() {
        let value = decode_script_value(json!("{\"segmentsHtml\":\"\",\"captionTracks\":[]}")).unwrap();
        assert_eq!(value["captionTracks"], json!([]));

        let object = decode_script_value(json!({"a": 1})).unwrap();
        assert_eq!(object["a"], 1);

        assert!(matches!(
            decode_script_value(json!("not json")),
            Err(BrowserError::Script(_))
        ));
    }

    struct Tracked(Arc<AtomicBool>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_dropping_guard_releases_resource() {
        let released = Arc::new(AtomicBool::new(false));
        let (guard, session) = SessionGuard::new();
        session.install(Tracked(Arc::clone(&released))).unwrap();
        assert_eq!(session.with(|_| 7).unwrap(), 7);

        drop(guard);

        assert!(released.load(Ordering::SeqCst));
        assert!(session.is_cancelled());
        assert!(session.with(|_| ()).is_err());
    }

    #[test]
    fn test_install_after_cancel_drops_immediately() {
        let released = Arc::new(AtomicBool::new(false));
        let (guard, session) = SessionGuard::new();
        drop(guard);

        assert!(session.install(Tracked(Arc::clone(&released))).is_err());
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timeout_releases_resource_held_by_blocking_work() {
        let released = Arc::new(AtomicBool::new(false));
        let resource = Tracked(Arc::clone(&released));

        let work = async move {
            let (_guard, session) = SessionGuard::new();
            tokio::task::spawn_blocking(move || {
                session.install(resource)?;
                while session.ensure_active().is_ok() {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                session.ensure_active()
            })
            .await
        };

        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), work).await;

        assert!(outcome.is_err());
        assert!(released.load(Ordering::SeqCst));
    }
}
