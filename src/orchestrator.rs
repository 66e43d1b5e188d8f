//! Job orchestration: one background task per conversion, driving
//! planner, supervisor, progress parsing and the fallback policy, and
//! reporting everything to the caller as one ordered event stream.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancel::{CancelHandle, CancelSignal};
use crate::config::Config;
use crate::error::{ConverterError, Result};
use crate::fallback::FallbackPolicy;
use crate::media::{CommandPlanner, ConversionPlan, DurationProbe, FfprobeDurationProbe};
use crate::progress::{ProgressSample, ProgressTracker};
use crate::request::{ConversionRequest, Hardware};
use crate::supervisor::{ProcessExit, ProcessSupervisor};

/// Terminal result of a job; exactly one per request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded { output_path: PathBuf },
    Cancelled,
    Failed { reason: String },
}

/// Everything a job reports, in order. `Finished` is always last.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// Raw encoder output line
    Log { line: String },
    StepStarted {
        index: usize,
        total: usize,
        description: String,
    },
    Progress(ProgressSample),
    /// The hardware encode failed and the job restarts on the CPU
    FallbackNotice { from: Hardware, reason: String },
    Finished { outcome: JobOutcome },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Planning,
    Running { step: usize },
    Cancelling,
    Finalizing,
    Terminal,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Idle => f.write_str("idle"),
            JobState::Planning => f.write_str("planning"),
            JobState::Running { step } => write!(f, "running step {}", step + 1),
            JobState::Cancelling => f.write_str("cancelling"),
            JobState::Finalizing => f.write_str("finalizing"),
            JobState::Terminal => f.write_str("terminal"),
        }
    }
}

/// Runs conversion jobs, at most one at a time
pub struct JobOrchestrator {
    config: Arc<Config>,
    probe: Arc<dyn DurationProbe>,
    active: Arc<AtomicBool>,
}

impl JobOrchestrator {
    /// Orchestrator probing durations with the configured ffprobe
    pub fn new(config: Config) -> Self {
        let probe = Arc::new(FfprobeDurationProbe::new(config.media.probe_path.clone()));
        Self::with_probe(config, probe)
    }

    pub fn with_probe(config: Config, probe: Arc<dyn DurationProbe>) -> Self {
        Self {
            config: Arc::new(config),
            probe,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start `request` on a background task.
    ///
    /// Fails with [`ConverterError::JobActive`] while a previous job of this
    /// orchestrator has not produced its outcome yet. Must be called from
    /// within a tokio runtime.
    pub fn submit(&self, request: ConversionRequest) -> Result<JobHandle> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Rejecting conversion of {}: a job is already running", request.input_path.display());
            return Err(ConverterError::JobActive);
        }

        let id = Uuid::new_v4();
        let output_path = request.output_path();
        let (cancel, signal) = CancelHandle::pair();
        let (tx, rx) = mpsc::channel(self.config.job.event_buffer.max(1));

        info!(
            "Job {}: converting {} -> {} ({}, {})",
            id,
            request.input_path.display(),
            output_path.display(),
            request.mode,
            request.hardware
        );

        let job = Job {
            id,
            config: Arc::clone(&self.config),
            probe: Arc::clone(&self.probe),
            policy: FallbackPolicy::new(self.config.fallback.clone()),
            events: tx,
            cancel: signal,
            state: JobState::Idle,
            active: ActiveGuard::new(Arc::clone(&self.active)),
        };
        let task = tokio::spawn(job.run(request));

        Ok(JobHandle {
            id,
            output_path,
            events: rx,
            cancel,
            task,
        })
    }
}

/// Caller's side of a submitted job
pub struct JobHandle {
    id: Uuid,
    output_path: PathBuf,
    events: mpsc::Receiver<JobEvent>,
    cancel: CancelHandle,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Where the converted file is written on success
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Cancellation switch that can be moved to another task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn request_cancel(&self) {
        info!("Job {}: cancellation requested", self.id);
        self.cancel.cancel();
    }

    /// Next event, `None` after `Finished` has been delivered
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Drain remaining events and return the outcome
    pub async fn wait(mut self) -> JobOutcome {
        let mut outcome = None;
        while let Some(event) = self.events.recv().await {
            if let JobEvent::Finished { outcome: finished } = event {
                outcome = Some(finished);
            }
        }

        if let Err(e) = self.task.await {
            error!("Job {} task ended abnormally: {}", self.id, e);
        }

        outcome.unwrap_or_else(|| JobOutcome::Failed {
            reason: "job ended without reporting an outcome".to_string(),
        })
    }
}

/// Clears the orchestrator's busy flag once, at the latest when the job is
/// dropped
struct ActiveGuard {
    flag: Arc<AtomicBool>,
    released: bool,
}

impl ActiveGuard {
    fn new(flag: Arc<AtomicBool>) -> Self {
        Self {
            flag,
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.flag.store(false, Ordering::Release);
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.release();
    }
}

enum PlanResult {
    Completed,
    Cancelled,
    ExitedWithError { step: usize, exit: ProcessExit },
    Failed(String),
}

/// State owned by the job task; nothing here is shared with the caller
/// except the event sender and the cancel signal
struct Job {
    id: Uuid,
    config: Arc<Config>,
    probe: Arc<dyn DurationProbe>,
    policy: FallbackPolicy,
    events: mpsc::Sender<JobEvent>,
    cancel: CancelSignal,
    state: JobState,
    active: ActiveGuard,
}

impl Job {
    async fn run(mut self, request: ConversionRequest) {
        let outcome = self.execute(request).await;

        match &outcome {
            JobOutcome::Succeeded { output_path } => {
                info!("Job {} succeeded: {}", self.id, output_path.display())
            }
            JobOutcome::Cancelled => info!("Job {} cancelled", self.id),
            JobOutcome::Failed { reason } => error!("Job {} failed: {}", self.id, reason),
        }

        self.transition(JobState::Terminal);
        self.active.release();
        if self.events.send(JobEvent::Finished { outcome }).await.is_err() {
            debug!("Job {}: nobody is listening for the outcome", self.id);
        }
        self.transition(JobState::Idle);
    }

    async fn execute(&mut self, mut request: ConversionRequest) -> JobOutcome {
        let output_path = request.output_path();
        let output_exists = tokio::fs::try_exists(&output_path).await;
        if matches!(output_exists, Ok(true)) && !self.config.media.overwrite {
            // ffmpeg would refuse every attempt, hardware or not
            return JobOutcome::Failed {
                reason: ConverterError::OutputExists(output_path.display().to_string()).to_string(),
            };
        }
        // Unknown counts as existing so a file we did not create is never deleted
        let output_preexisting = output_exists.unwrap_or(true);

        let total_duration = self.probe.probe_duration(&request.input_path).await;
        if total_duration.is_none() {
            warn!("Job {}: total duration unknown, progress is indeterminate", self.id);
        }

        let planner = CommandPlanner::new(&self.config);
        let mut fallback_used = false;

        loop {
            self.transition(JobState::Planning);
            let plan = planner.plan(&request, self.id);
            debug!(
                "Job {}: plan has {} step(s), {} intermediate artifact(s)",
                self.id,
                plan.len(),
                plan.artifacts().count()
            );

            let result = self.run_plan(&plan, total_duration).await;

            let retry = match &result {
                PlanResult::ExitedWithError { step, exit } if !fallback_used => {
                    self.policy
                        .should_fallback(&plan.invocations[*step], &request, exit)
                }
                _ => None,
            };

            if let Some(retry) = retry {
                fallback_used = true;
                plan.remove_artifacts().await;
                self.remove_partial_output(&plan.output_path, output_preexisting).await;

                warn!("Job {}: {}", self.id, retry.reason);
                self.send(JobEvent::FallbackNotice {
                    from: request.hardware,
                    reason: retry.reason,
                })
                .await;
                request = retry.request;
                continue;
            }

            self.transition(JobState::Finalizing);
            plan.remove_artifacts().await;

            let outcome = match result {
                PlanResult::Completed => JobOutcome::Succeeded {
                    output_path: plan.output_path.clone(),
                },
                PlanResult::Cancelled => JobOutcome::Cancelled,
                PlanResult::ExitedWithError { step, exit } => JobOutcome::Failed {
                    reason: ConverterError::Encoder(format!(
                        "{} failed with {}",
                        plan.invocations[step].description, exit
                    ))
                    .to_string(),
                },
                PlanResult::Failed(reason) => JobOutcome::Failed { reason },
            };

            if !matches!(outcome, JobOutcome::Succeeded { .. }) {
                self.remove_partial_output(&plan.output_path, output_preexisting).await;
            }

            return outcome;
        }
    }

    /// Run the plan's invocations strictly one after another
    async fn run_plan(&mut self, plan: &ConversionPlan, total_duration: Option<f64>) -> PlanResult {
        let supervisor = ProcessSupervisor::new(
            &self.config.media.binary_path,
            self.config.job.grace_period(),
            self.config.job.line_buffer,
            self.cancel.clone(),
        );
        let total = plan.len();

        for (index, invocation) in plan.invocations.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.transition(JobState::Cancelling);
                return PlanResult::Cancelled;
            }

            let mut process = match supervisor.spawn(invocation) {
                Ok(process) => process,
                Err(e) => return PlanResult::Failed(e.to_string()),
            };

            self.transition(JobState::Running { step: index });
            self.send(JobEvent::StepStarted {
                index,
                total,
                description: invocation.description.clone(),
            })
            .await;

            let mut tracker = ProgressTracker::new(index, total_duration);
            while let Some(line) = process.next_line().await {
                debug!("ffmpeg: {}", line);
                let sample = tracker.observe(&line);
                self.send_output(JobEvent::Log { line }).await;
                if let Some(sample) = sample {
                    self.send_output(JobEvent::Progress(sample)).await;
                }
            }

            if self.cancel.is_cancelled() {
                self.transition(JobState::Cancelling);
            }

            let exit = match process.finish().await {
                Ok(exit) => exit,
                Err(e) => {
                    return PlanResult::Failed(format!(
                        "failed waiting for {}: {}",
                        invocation.description, e
                    ));
                }
            };

            if self.cancel.is_cancelled() {
                self.transition(JobState::Cancelling);
                return PlanResult::Cancelled;
            }

            if !exit.success() {
                warn!("Job {}: {} failed with {}", self.id, invocation.description, exit);
                return PlanResult::ExitedWithError { step: index, exit };
            }

            info!("Job {}: {} completed", self.id, invocation.description);
        }

        PlanResult::Completed
    }

    fn transition(&mut self, next: JobState) {
        if self.state != next {
            debug!("Job {}: {} -> {}", self.id, self.state, next);
            self.state = next;
        }
    }

    async fn send(&self, event: JobEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Job {}: no subscribers for job event", self.id);
        }
    }

    /// Like `send`, but gives up waiting for channel space once the job is
    /// cancelled, so a stalled consumer cannot hold up cancellation
    async fn send_output(&mut self, event: JobEvent) {
        tokio::select! {
            biased;
            sent = self.events.send(event) => {
                if sent.is_err() {
                    debug!("Job {}: no subscribers for job event", self.id);
                }
            }
            _ = self.cancel.cancelled() => {}
        }
    }

    async fn remove_partial_output(&self, output_path: &Path, preexisting: bool) {
        if preexisting || !self.config.job.remove_partial_output {
            return;
        }

        match tokio::fs::remove_file(output_path).await {
            Ok(()) => info!("Job {}: removed partial output {}", self.id, output_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Job {}: failed to remove partial output {}: {}",
                self.id,
                output_path.display(),
                e
            ),
        }
    }
}
