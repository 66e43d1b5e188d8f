use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ConverterError, Result};
use super::DurationProbe;

/// Reads the container duration with `ffprobe`
pub struct FfprobeDurationProbe {
    binary_path: String,
}

impl FfprobeDurationProbe {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    async fn run_probe(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.binary_path)
            .arg("-v").arg("error")
            .arg("-show_entries").arg("format=duration")
            .arg("-of").arg("default=noprint_wrappers=1:nokey=1")
            .arg(path)
            .output()
            .await
            .map_err(|e| ConverterError::Probe(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConverterError::Probe(format!(
                "{} exited with {}: {}",
                self.binary_path,
                output.status,
                stderr.trim()
            )));
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn probe_duration(&self, path: &Path) -> Option<f64> {
        match self.run_probe(path).await {
            Ok(seconds) => {
                debug!("Probed duration of {}: {:.2}s", path.display(), seconds);
                Some(seconds)
            }
            Err(e) => {
                warn!("Duration unknown for {}, progress will be indeterminate: {}", path.display(), e);
                None
            }
        }
    }
}

/// Accepts only finite, positive durations
fn parse_duration(stdout: &str) -> Result<f64> {
    let value = stdout.trim();
    let seconds: f64 = value
        .parse()
        .map_err(|_| ConverterError::Probe(format!("Unexpected duration value '{}'", value)))?;

    if seconds.is_finite() && seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(ConverterError::Probe(format!("Unusable duration value '{}'", value)))
    }
}

/// Run `<binary> -version` and return the first line of its output
pub async fn tool_version(binary_path: &str) -> Result<String> {
    debug!("Checking tool availability: {}", binary_path);

    let output = Command::new(binary_path)
        .arg("-version")
        .output()
        .await
        .map_err(|e| ConverterError::ToolUnavailable(format!("{}: {}", binary_path, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ConverterError::ToolUnavailable(format!(
            "{} version check failed: {}",
            binary_path,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout.lines().next().unwrap_or("Unknown version").to_string();
    info!("{} is available: {}", binary_path, first_line);
    Ok(first_line)
}
