use tracing::debug;

use crate::config::FallbackConfig;
use crate::media::{Invocation, InvocationKind};
use crate::request::{ConversionRequest, Hardware};
use crate::supervisor::ProcessExit;

/// A second attempt of the same job on the software encoder
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPlan {
    pub request: ConversionRequest,
    pub reason: String,
}

/// Decides whether a failed hardware encode is retried on the CPU
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    config: FallbackConfig,
}

impl FallbackPolicy {
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    /// Only the general re-encode path falls back, and only away from
    /// hardware; the caller allows it once per job.
    pub fn should_fallback(
        &self,
        invocation: &Invocation,
        request: &ConversionRequest,
        exit: &ProcessExit,
    ) -> Option<RetryPlan> {
        if exit.success()
            || invocation.kind != InvocationKind::VideoEncode
            || !request.hardware.is_accelerated()
        {
            return None;
        }

        if !self.config.enabled || !self.config.modes.contains(&request.hardware) {
            debug!("Fallback not enabled for {} encoder", request.hardware);
            return None;
        }

        Some(RetryPlan {
            request: request.with_hardware(Hardware::Cpu),
            reason: format!(
                "{} encoder {} failed ({}), retrying with {}",
                request.hardware,
                request.hardware.video_encoder(),
                exit,
                Hardware::Cpu.video_encoder()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ConversionMode, OutputFormat};

    #[cfg(unix)]
    fn exited(code: i32) -> ProcessExit {
        use std::os::unix::process::ExitStatusExt;
        ProcessExit::Exited(std::process::ExitStatus::from_raw(code << 8))
    }

    #[cfg(windows)]
    fn exited(code: i32) -> ProcessExit {
        use std::os::windows::process::ExitStatusExt;
        ProcessExit::Exited(std::process::ExitStatus::from_raw(code as u32))
    }

    fn request(hardware: Hardware) -> ConversionRequest {
        ConversionRequest::new("/videos/talk.mkv", OutputFormat::Mp4, ConversionMode::Reencode, hardware)
    }

    fn encode() -> Invocation {
        Invocation::new(InvocationKind::VideoEncode, "Video encode")
    }

    #[test]
    fn test_hardware_failure_falls_back_to_cpu() {
        let policy = FallbackPolicy::new(FallbackConfig::default());

        for hardware in [Hardware::Nvidia, Hardware::Intel, Hardware::Amd] {
            let retry = policy
                .should_fallback(&encode(), &request(hardware), &exited(1))
                .unwrap();
            assert_eq!(retry.request, request(Hardware::Cpu));
            assert!(retry.reason.contains("libx264"));
        }

        let killed = policy.should_fallback(&encode(), &request(Hardware::Nvidia), &ProcessExit::Killed);
        assert!(killed.is_some());
    }

    #[test]
    fn test_no_fallback_on_success_or_cpu() {
        let policy = FallbackPolicy::new(FallbackConfig::default());

        assert!(policy.should_fallback(&encode(), &request(Hardware::Nvidia), &exited(0)).is_none());
        assert!(policy.should_fallback(&encode(), &request(Hardware::Cpu), &exited(1)).is_none());
    }

    #[test]
    fn test_no_fallback_outside_video_encode() {
        let policy = FallbackPolicy::new(FallbackConfig::default());
        let copy = Invocation::new(InvocationKind::StreamCopy, "Stream copy");
        let palette = Invocation::new(InvocationKind::PaletteEncode, "GIF encode");

        assert!(policy.should_fallback(&copy, &request(Hardware::Amd), &exited(1)).is_none());
        assert!(policy.should_fallback(&palette, &request(Hardware::Amd), &exited(1)).is_none());
    }

    #[test]
    fn test_config_restricts_modes() {
        let policy = FallbackPolicy::new(FallbackConfig {
            enabled: true,
            modes: vec![Hardware::Nvidia],
        });
        assert!(policy.should_fallback(&encode(), &request(Hardware::Nvidia), &exited(1)).is_some());
        assert!(policy.should_fallback(&encode(), &request(Hardware::Intel), &exited(1)).is_none());

        let disabled = FallbackPolicy::new(FallbackConfig {
            enabled: false,
            ..FallbackConfig::default()
        });
        assert!(disabled.should_fallback(&encode(), &request(Hardware::Nvidia), &exited(1)).is_none());
    }
}
