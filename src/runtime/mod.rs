//! Collaborators injected into the extraction adapters: HTTP fetch,
//! external process execution and a headless browser.

pub mod browser;
pub mod http;
pub mod process;

pub use browser::{BrowserError, BrowserRuntime};
pub use http::{FetchError, HttpFetch, HttpMethod, HttpRequest, HttpResponse, ReqwestFetcher};
pub use process::{ProcessError, ProcessInvocation, ProcessOutput, ProcessRunner, TokioProcessRunner};

#[cfg(feature = "browser")]
pub use browser::ChromeRuntime;

#[cfg(test)]
pub use browser::MockBrowserRuntime;
#[cfg(test)]
pub use http::MockHttpFetch;
#[cfg(test)]
pub use process::MockProcessRunner;
