use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use subtitle_chain::cli::{Cli, Commands};
use subtitle_chain::config::Config;
use subtitle_chain::pipeline::{Cancelled, ExtractOptions, RuntimeProfile, SubtitleExtractor};
use subtitle_chain::runtime::TokioProcessRunner;
use subtitle_chain::{output, utils, VideoId};

/// Exit code when Ctrl-C or the deadline stops an extraction
const EXIT_CANCELLED: u8 = 130;

/// How long exit waits for blocking work left over from a cancelled adapter
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "subtitle_chain=debug"
    } else {
        "subtitle_chain=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the transcript, logs go to stderr
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn spinner(quiet: bool) -> Result<ProgressBar> {
    if quiet || !std::io::stderr().is_terminal() {
        return Ok(ProgressBar::hidden());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

/// Resolves on Ctrl-C or when the deadline passes
async fn shutdown_signal(deadline: Option<u64>) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::warn!("Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    match deadline {
        Some(secs) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    tracing::warn!("Deadline of {}s reached", secs);
                }
            }
        }
        None => ctrl_c.await,
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let outcome = runtime.block_on(run(cli));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    outcome
}

async fn run(cli: Cli) -> Result<ExitCode> {

    let config = Config::load().await?;

    match cli.command {
        Commands::Extract {
            video,
            languages,
            profile,
            format,
            output,
            deadline,
        } => {
            let profile = profile.map(RuntimeProfile::from).unwrap_or(config.runtime.profile);
            let progress = spinner(cli.quiet)?;
            progress.set_message("Preparing adapters");

            let step = progress.clone();
            let extractor = SubtitleExtractor::from_config(&config, profile)?
                .on_attempt(move |method| step.set_message(format!("Trying {}", method)));

            tracing::info!("Starting subtitle extraction for: {}", video);

            let options = ExtractOptions {
                preferred_languages: languages,
            };
            let result = match extractor
                .extract_until(&video, &options, shutdown_signal(deadline))
                .await
            {
                Ok(result) => result,
                Err(Cancelled) => {
                    progress.finish_and_clear();
                    eprintln!("Extraction cancelled");
                    return Ok(ExitCode::from(EXIT_CANCELLED));
                }
            };
            progress.finish_and_clear();

            let video_id = VideoId::parse(&video).ok();
            match output {
                Some(path) => {
                    output::save_to_file(&result, video_id.as_ref(), &path, &format).await?;
                    eprintln!("Subtitles saved to: {}", path.display());
                }
                None => {
                    output::print_to_console(&result, video_id.as_ref(), &format)?;
                }
            }

            if !result.is_success() {
                return Ok(ExitCode::from(1));
            }
        }
        Commands::Adapters { profile } => {
            let profile = profile
                .map(RuntimeProfile::from)
                .unwrap_or(config.runtime.profile)
                .resolve();
            let extractor = SubtitleExtractor::from_config(&config, profile)?;

            println!("Adapter chain ({} profile):", profile);
            for (index, method) in extractor.methods().iter().enumerate() {
                println!("  {}. {}", index + 1, method);
            }
            if config.credentials.is_empty() {
                println!("  (official-captions needs a YouTube API key or OAuth token)");
            }
        }
        Commands::Doctor => {
            let runner = TokioProcessRunner::new();
            println!("External tools:");
            for tool in utils::check_dependencies(&runner, &config).await {
                match &tool.version {
                    Some(version) => println!("  ✓ {} {} ({})", tool.name, version, tool.purpose),
                    None => println!("  ✗ {} not found ({})", tool.name, tool.purpose),
                }
            }
            if !utils::browser_support_compiled() {
                println!("  ✗ built without the `browser` feature, headless browser adapter disabled");
            }
            println!("Credentials: {} configured", config.credentials.count());
            println!("Profile: {}", config.runtime.profile.resolve());
        }
        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                println!("Configuration file: {}", Config::config_path()?.display());
                println!("Use --show to print the current values");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
