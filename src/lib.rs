//! Media Converter - supervised ffmpeg conversions
//!
//! Plans the ffmpeg invocations for a conversion request, runs them as
//! supervised child processes, turns their diagnostic output into progress
//! events, and retries failed hardware encodes on the CPU.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod fallback;
pub mod media;
pub mod orchestrator;
pub mod progress;
pub mod request;
pub mod supervisor;
pub mod workflow;

pub use orchestrator::{JobEvent, JobHandle, JobOrchestrator, JobOutcome};
pub use request::{ConversionMode, ConversionRequest, Hardware, OutputFormat};
