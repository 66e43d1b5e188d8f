use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cancel::{CancelHandle, CancelSignal};
use crate::config::Config;
use crate::error::{ConverterError, Result};
use crate::media::tool_version;
use crate::orchestrator::{JobEvent, JobOrchestrator, JobOutcome};
use crate::request::{ConversionMode, ConversionRequest, Hardware, OutputFormat};

/// Terminal front end: submits jobs and renders their events
pub struct Workflow {
    config: Config,
    orchestrator: JobOrchestrator,
    json_events: bool,
}

/// Totals reported after a batch run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

impl Workflow {
    pub fn new(config: Config) -> Self {
        let orchestrator = JobOrchestrator::new(config.clone());
        Self {
            config,
            orchestrator,
            json_events: false,
        }
    }

    /// Build on an existing orchestrator, e.g. one with a custom duration probe
    pub fn with_orchestrator(config: Config, orchestrator: JobOrchestrator) -> Self {
        Self {
            config,
            orchestrator,
            json_events: false,
        }
    }

    /// Print every job event as one JSON line instead of drawing a progress bar
    pub fn with_json_events(mut self, json_events: bool) -> Self {
        self.json_events = json_events;
        self
    }

    /// ffmpeg is required; without ffprobe progress is only indeterminate
    pub async fn ensure_tools(&self) -> Result<()> {
        tool_version(&self.config.media.binary_path).await?;

        if let Err(e) = tool_version(&self.config.media.probe_path).await {
            warn!("{}; progress will be reported without percentages", e);
        }

        Ok(())
    }

    /// Convert one file, cancelling on Ctrl-C
    pub async fn convert_file(&self, request: ConversionRequest) -> Result<JobOutcome> {
        let (interrupt, signal) = CancelHandle::pair();
        let listener = listen_for_interrupt(interrupt);
        let outcome = self.run_job(request, signal).await;
        listener.abort();
        outcome
    }

    /// Convert every matching file below `input_dir`, one after another.
    ///
    /// A failed file does not stop the batch; a cancelled one does.
    pub async fn convert_directory<P: AsRef<Path>>(
        &self,
        input_dir: P,
        extensions: &[String],
        output_format: OutputFormat,
        mode: ConversionMode,
        hardware: Hardware,
    ) -> Result<BatchSummary> {
        let input_dir = input_dir.as_ref();
        info!("Converting directory: {}", input_dir.display());

        if !input_dir.is_dir() {
            return Err(ConverterError::Config(format!(
                "{} is not a directory",
                input_dir.display()
            )));
        }

        let (inputs, skipped) = collect_inputs(input_dir, extensions, output_format);
        info!("Found {} media files to convert", inputs.len());

        // One listener for the whole batch, so Ctrl-C between files still counts
        let (interrupt, signal) = CancelHandle::pair();
        let listener = listen_for_interrupt(interrupt);
        let summary = self
            .convert_inputs(inputs, skipped, output_format, mode, hardware, signal)
            .await;
        listener.abort();

        Ok(summary)
    }

    async fn convert_inputs(
        &self,
        inputs: Vec<PathBuf>,
        skipped: usize,
        output_format: OutputFormat,
        mode: ConversionMode,
        hardware: Hardware,
        interrupt: CancelSignal,
    ) -> BatchSummary {
        let mut summary = BatchSummary {
            skipped,
            ..BatchSummary::default()
        };

        for input in inputs {
            if interrupt.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let request = ConversionRequest::new(&input, output_format, mode, hardware);
            match self.run_job(request, interrupt.clone()).await {
                Ok(JobOutcome::Succeeded { .. }) => summary.succeeded += 1,
                Ok(JobOutcome::Cancelled) => {
                    summary.cancelled = true;
                    break;
                }
                Ok(JobOutcome::Failed { reason }) => {
                    warn!("Failed to convert {}: {}", input.display(), reason);
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!("Failed to convert {}: {}", input.display(), e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Run one job to completion, cancelling it once `interrupt` fires
    async fn run_job(&self, request: ConversionRequest, mut interrupt: CancelSignal) -> Result<JobOutcome> {
        if !request.input_path.is_file() {
            return Err(ConverterError::FileNotFound(
                request.input_path.display().to_string(),
            ));
        }

        let mut job = self.orchestrator.submit(request)?;
        let cancel = job.cancel_handle();
        let relay = tokio::spawn(async move {
            interrupt.cancelled().await;
            cancel.cancel();
        });

        let mut reporter = Reporter::new(self.json_events, job.output_path());
        let mut outcome = None;
        while let Some(event) = job.next_event().await {
            reporter.handle(&event)?;
            if let JobEvent::Finished { outcome: finished } = event {
                outcome = Some(finished);
            }
        }
        relay.abort();

        let outcome = outcome.unwrap_or_else(|| JobOutcome::Failed {
            reason: "job ended without reporting an outcome".to_string(),
        });
        reporter.finish(&outcome);
        Ok(outcome)
    }
}

fn listen_for_interrupt(interrupt: CancelHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling conversion");
            interrupt.cancel();
        }
    })
}

/// Files under `dir` with one of `extensions`, sorted, plus the number of
/// candidates skipped: hidden scratch files, files already in the target
/// format, and files whose output another input already claims
fn collect_inputs(dir: &Path, extensions: &[String], output_format: OutputFormat) -> (Vec<PathBuf>, usize) {
    let mut candidates = Vec::new();
    let mut skipped = 0;

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        let ext = ext.to_lowercase();
        if !extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(&ext)) {
            continue;
        }

        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || ext == output_format.extension() {
            skipped += 1;
            continue;
        }

        candidates.push(path.to_path_buf());
    }

    candidates.sort();

    let mut outputs = HashSet::new();
    let mut inputs = Vec::with_capacity(candidates.len());
    for input in candidates {
        let output = input.with_extension(output_format.extension());
        if outputs.insert(output.clone()) {
            inputs.push(input);
        } else {
            warn!(
                "Skipping {}: {} is already produced by another input",
                input.display(),
                output.display()
            );
            skipped += 1;
        }
    }

    (inputs, skipped)
}

enum Reporter {
    Json,
    Bar { bar: ProgressBar, output: PathBuf },
}

impl Reporter {
    fn new(json: bool, output: &Path) -> Self {
        if json {
            return Reporter::Json;
        }

        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));

        Reporter::Bar {
            bar,
            output: output.to_path_buf(),
        }
    }

    fn handle(&mut self, event: &JobEvent) -> Result<()> {
        match self {
            Reporter::Json => println!("{}", serde_json::to_string(event)?),
            Reporter::Bar { bar, output } => match event {
                JobEvent::Log { .. } => {}
                JobEvent::StepStarted {
                    index,
                    total,
                    description,
                } => {
                    bar.set_position(0);
                    bar.set_message(format!(
                        "{} ({}/{}) -> {}",
                        description,
                        index + 1,
                        total,
                        output.display()
                    ));
                }
                JobEvent::Progress(sample) => match sample.percent {
                    Some(percent) => bar.set_position(percent.round() as u64),
                    None => bar.set_message(format!("{:.1}s encoded", sample.elapsed_seconds)),
                },
                JobEvent::FallbackNotice { reason, .. } => {
                    bar.println(format!("warning: {}", reason));
                    bar.set_position(0);
                }
                JobEvent::Finished { .. } => bar.finish_and_clear(),
            },
        }
        Ok(())
    }

    fn finish(&self, outcome: &JobOutcome) {
        if let Reporter::Json = self {
            return;
        }
        match outcome {
            JobOutcome::Succeeded { output_path } => {
                println!("Converted: {}", output_path.display())
            }
            JobOutcome::Cancelled => println!("Conversion cancelled"),
            JobOutcome::Failed { reason } => eprintln!("Conversion failed: {}", reason),
        }
    }
}
