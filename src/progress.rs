use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("time pattern is valid")
});

/// Elapsed/percent reading derived from one encoder status line
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSample {
    /// Index of the plan step that produced the line
    pub step: usize,
    pub elapsed_seconds: f64,
    /// `None` when the total duration is unknown
    pub percent: Option<f64>,
}

/// Extracts `time=HH:MM:SS.frac` offsets from encoder diagnostics
pub struct ProgressParser;

impl ProgressParser {
    /// Elapsed seconds, or `None` for lines without a time marker
    pub fn parse(line: &str) -> Option<f64> {
        let captures = TIME_PATTERN.captures(line)?;
        let hours: f64 = captures[1].parse().ok()?;
        let minutes: f64 = captures[2].parse().ok()?;
        let seconds: f64 = captures[3].parse().ok()?;

        Some(hours * 3600.0 + minutes * 60.0 + seconds)
    }

    /// Percentage of `total_duration`, clamped to 100.
    pub fn percent(elapsed_seconds: f64, total_duration: Option<f64>) -> Option<f64> {
        match total_duration {
            Some(total) if total > 0.0 => Some((elapsed_seconds * 100.0 / total).clamp(0.0, 100.0)),
            _ => None,
        }
    }
}

/// Turns the line stream of one invocation into non-decreasing samples
#[derive(Debug)]
pub struct ProgressTracker {
    step: usize,
    total_duration: Option<f64>,
    last_elapsed: Option<f64>,
}

impl ProgressTracker {
    pub fn new(step: usize, total_duration: Option<f64>) -> Self {
        Self {
            step,
            total_duration,
            last_elapsed: None,
        }
    }

    pub fn observe(&mut self, line: &str) -> Option<ProgressSample> {
        let elapsed = ProgressParser::parse(line)?;
        if self.last_elapsed.is_some_and(|last| elapsed < last) {
            return None;
        }
        self.last_elapsed = Some(elapsed);

        Some(ProgressSample {
            step: self.step,
            elapsed_seconds: elapsed,
            percent: ProgressParser::percent(elapsed, self.total_duration),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_parse_status_line() {
        let elapsed = ProgressParser::parse("frame=120 fps=30 time=00:01:05.20 bitrate=...").unwrap();
        assert!(approx(elapsed, 65.2));

        let long = ProgressParser::parse("size=  1024kB time=102:00:00.5 bitrate=N/A speed=1x").unwrap();
        assert!(approx(long, 367_200.5));
    }

    #[test]
    fn test_parse_without_marker() {
        assert_eq!(ProgressParser::parse("no time marker here"), None);
        assert_eq!(ProgressParser::parse("frame=    0 fps=0.0 time=N/A bitrate=N/A"), None);
    }

    #[test]
    fn test_percent() {
        assert_eq!(ProgressParser::percent(60.0, Some(120.0)), Some(50.0));
        assert_eq!(ProgressParser::percent(130.0, Some(120.0)), Some(100.0));
        assert_eq!(ProgressParser::percent(60.0, None), None);
        assert_eq!(ProgressParser::percent(60.0, Some(0.0)), None);
        assert_eq!(ProgressParser::percent(60.0, Some(-4.0)), None);
    }

    #[test]
    fn test_tracker_skips_regressions() {
        let mut tracker = ProgressTracker::new(1, Some(100.0));

        let first = tracker.observe("time=00:00:20.00").unwrap();
        assert_eq!(first.step, 1);
        assert_eq!(first.percent, Some(20.0));

        assert!(tracker.observe("Stream mapping:").is_none());
        assert!(tracker.observe("time=00:00:10.00").is_none());

        let next = tracker.observe("time=00:00:40.00").unwrap();
        assert_eq!(next.percent, Some(40.0));
    }

    #[test]
    fn test_tracker_without_duration() {
        let mut tracker = ProgressTracker::new(0, None);
        let sample = tracker.observe("frame=10 time=00:00:03.50 speed=2x").unwrap();
        assert!(approx(sample.elapsed_seconds, 3.5));
        assert_eq!(sample.percent, None);
    }
}
