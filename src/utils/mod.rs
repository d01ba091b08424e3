use crate::config::Config;
use crate::runtime::{ProcessInvocation, ProcessRunner};

/// Executables checked for the headless browser adapter
const CHROME_CANDIDATES: [&str; 4] = ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"];

/// Availability of one external tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: String,
    /// First line of `--version`, when the tool answered
    pub version: Option<String>,
    pub purpose: &'static str,
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        self.version.is_some()
    }
}

/// Run `<program> --version` and return its first output line
pub async fn tool_version(runner: &dyn ProcessRunner, program: &str) -> Option<String> {
    let output = runner
        .run(&ProcessInvocation::new(program, ["--version"]))
        .await
        .ok()
        .filter(|output| output.success())?;

    let line = output.stdout.lines().next().unwrap_or_default().trim().to_string();
    Some(if line.is_empty() { "unknown version".to_string() } else { line })
}

/// Check if the current environment has the external tools adapters rely on
pub async fn check_dependencies(runner: &dyn ProcessRunner, config: &Config) -> Vec<ToolStatus> {
    let yt_dlp = ToolStatus {
        name: config.tools.yt_dlp_path.clone(),
        version: tool_version(runner, &config.tools.yt_dlp_path).await,
        purpose: "yt-dlp adapter",
    };

    let mut chrome = ToolStatus {
        name: "chrome".to_string(),
        version: None,
        purpose: "headless browser adapter",
    };
    for candidate in CHROME_CANDIDATES {
        if let Some(version) = tool_version(runner, candidate).await {
            chrome.name = candidate.to_string();
            chrome.version = Some(version);
            break;
        }
    }

    vec![yt_dlp, chrome]
}

/// Whether this build can drive a browser at all
pub fn browser_support_compiled() -> bool {
    cfg!(feature = "browser")
}
