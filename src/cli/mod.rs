use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::pipeline::RuntimeProfile;

#[derive(Parser)]
#[command(
    name = "subtitle-chain",
    about = "Subtitle Chain - Extract YouTube subtitles through a chain of fallback strategies",
    version,
    long_about = "Extracts timestamped subtitles from a YouTube video by trying the official captions API, InnerTube transcript listing, watch-page scraping, a headless browser and yt-dlp in turn until one succeeds."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract subtitles for a video id or URL
    Extract {
        /// YouTube video id or URL (watch, youtu.be, embed, shorts, live)
        #[arg(value_name = "VIDEO_OR_URL")]
        video: String,

        /// Preferred language, repeatable, in order (e.g. -l ko-KR -l en)
        #[arg(short, long = "language", value_name = "LANG")]
        languages: Vec<String>,

        /// Host profile deciding which adapters may run
        #[arg(long, value_enum, env = "SUBTITLE_CHAIN_PROFILE")]
        profile: Option<ProfileArg>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Output file path (prints to console if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long, value_name = "SECS")]
        deadline: Option<u64>,
    },

    /// Show the adapter chain for a profile
    Adapters {
        /// Host profile deciding which adapters may run
        #[arg(long, value_enum, env = "SUBTITLE_CHAIN_PROFILE")]
        profile: Option<ProfileArg>,
    },

    /// Check external tools and credentials
    Doctor,

    /// Show configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(ValueEnum, Clone, Debug)]
pub enum OutputFormat {
    /// `[MM:SS] text` lines
    Text,
    /// JSON envelope
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileArg {
    /// Detect from the environment
    Auto,
    /// HTTP-only adapters
    Restricted,
    /// All adapters
    Unrestricted,
}

impl From<ProfileArg> for RuntimeProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Auto => RuntimeProfile::Auto,
            ProfileArg::Restricted => RuntimeProfile::Restricted,
            ProfileArg::Unrestricted => RuntimeProfile::Unrestricted,
        }
    }
}
