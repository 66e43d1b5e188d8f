//! Media Converter - command line front end
//!
//! Converts media files with ffmpeg, showing live progress, cancelling on
//! Ctrl-C and retrying failed hardware encodes in software.

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use media_converter::cli::{Args, Commands, ConversionOptions};
use media_converter::config::Config;
use media_converter::error::ConverterError;
use media_converter::media::tool_version;
use media_converter::request::{ConversionMode, ConversionRequest, Hardware, OutputFormat};
use media_converter::workflow::Workflow;
use media_converter::JobOutcome;

const DEFAULT_CONFIG_FILE: &str = "media-converter.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Convert { input, options } => {
            let (output_format, mode, hardware) = parse_options(&options)?;
            let workflow = build_workflow(config, &options);
            workflow.ensure_tools().await?;

            let request = ConversionRequest::new(input, output_format, mode, hardware);
            match workflow.convert_file(request).await? {
                JobOutcome::Succeeded { .. } => {}
                JobOutcome::Cancelled => std::process::exit(130),
                JobOutcome::Failed { reason } => return Err(job_failure(reason)),
            }
        }
        Commands::Batch { input_dir, extensions, options } => {
            let (output_format, mode, hardware) = parse_options(&options)?;
            let workflow = build_workflow(config, &options);
            workflow.ensure_tools().await?;

            let extensions = extensions
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>();

            let summary = workflow
                .convert_directory(&input_dir, &extensions, output_format, mode, hardware)
                .await?;

            println!(
                "Converted {}, failed {}, skipped {}{}",
                summary.succeeded,
                summary.failed,
                summary.skipped,
                if summary.cancelled { " (cancelled)" } else { "" }
            );

            if summary.cancelled {
                std::process::exit(130);
            }
            if summary.failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Check => {
            let mut missing = false;
            for binary in [&config.media.binary_path, &config.media.probe_path] {
                match tool_version(binary).await {
                    Ok(version) => println!("{:<10} {}", binary, version),
                    Err(e) => {
                        println!("{:<10} unavailable ({})", binary, e);
                        missing = true;
                    }
                }
            }
            if missing {
                std::process::exit(1);
            }
        }
        Commands::InitConfig { path } => {
            if path.exists() {
                return Err(ConverterError::Config(format!(
                    "{} already exists",
                    path.display()
                ))
                .into());
            }
            config.save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

fn build_workflow(mut config: Config, options: &ConversionOptions) -> Workflow {
    if options.overwrite {
        config.media.overwrite = true;
    }
    Workflow::new(config).with_json_events(options.json)
}

/// The outcome reason is already a rendered error message
fn job_failure(reason: String) -> anyhow::Error {
    anyhow::anyhow!(reason)
}

fn parse_options(options: &ConversionOptions) -> Result<(OutputFormat, ConversionMode, Hardware)> {
    let output_format = options.format.parse::<OutputFormat>()?;
    let mode = options.mode.parse::<ConversionMode>()?;
    let hardware = options.hardware.parse::<Hardware>()?;
    Ok((output_format, mode, hardware))
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".media-converter").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "media-converter.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console output goes to stderr so --json keeps stdout clean
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    // No ANSI colors in file
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - level: {}, file: {}",
        log_level,
        log_dir.join("media-converter.log").display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_failure_keeps_reason_verbatim() {
        let reason = ConverterError::Encoder("Video encode (cpu) failed with exit code 1".to_string()).to_string();
        let message = job_failure(reason.clone()).to_string();

        assert_eq!(message, reason);
        assert_eq!(message.matches("Encoder error").count(), 1);
    }
}
