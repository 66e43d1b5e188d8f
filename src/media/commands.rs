use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What an invocation does; the fallback policy keys off this
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    StreamCopy,
    AudioExtract,
    PaletteGenerate,
    PaletteEncode,
    GifToVideo,
    VideoEncode,
}

/// One external encoder execution with a fixed argument list
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub description: String,
    pub kind: InvocationKind,
    /// Intermediate file written by this invocation for a later one
    pub artifact: Option<PathBuf>,
}

impl Invocation {
    /// Create a new invocation with no arguments
    pub fn new<S: Into<String>>(kind: InvocationKind, description: S) -> Self {
        Self {
            args: Vec::new(),
            description: description.into(),
            kind,
            artifact: None,
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Quiet banner, never read from stdin
    pub fn non_interactive(self) -> Self {
        self.arg("-hide_banner").arg("-nostdin")
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add an output file that only exists for the rest of the plan
    pub fn artifact_output<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.artifact = Some(path.as_ref().to_path_buf());
        self.output(path)
    }

    /// `-y` to overwrite, `-n` to refuse; ffmpeg never prompts either way
    pub fn overwrite(self, overwrite: bool) -> Self {
        self.arg(if overwrite { "-y" } else { "-n" })
    }

    pub fn hwaccel<S: Into<String>>(self, accel: S) -> Self {
        self.arg("-hwaccel").arg(accel)
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Copy every stream without re-encoding
    pub fn copy_streams(self) -> Self {
        self.arg("-c").arg("copy")
    }

    /// Disable video
    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    /// Variable bitrate audio quality, 0 is best
    pub fn audio_quality(self, quality: u32) -> Self {
        self.arg("-q:a").arg(quality.to_string())
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Add a complex filter graph
    pub fn filter_graph<S: Into<String>>(self, graph: S) -> Self {
        self.arg("-lavfi").arg(graph)
    }

    pub fn pixel_format<S: Into<String>>(self, format: S) -> Self {
        self.arg("-pix_fmt").arg(format)
    }

    pub fn produces_intermediate_artifact(&self) -> bool {
        self.artifact.is_some()
    }
}

/// Ordered invocations that together satisfy one request
#[derive(Debug, Clone)]
pub struct ConversionPlan {
    pub invocations: Vec<Invocation>,
    pub output_path: PathBuf,
}

impl ConversionPlan {
    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Path> {
        self.invocations
            .iter()
            .filter_map(|invocation| invocation.artifact.as_deref())
    }

    /// Delete every intermediate artifact that made it to disk
    pub async fn remove_artifacts(&self) {
        for artifact in self.artifacts() {
            match tokio::fs::remove_file(artifact).await {
                Ok(()) => debug!("Removed intermediate artifact {}", artifact.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "Failed to remove intermediate artifact {}: {}",
                    artifact.display(),
                    e
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_argument_order() {
        let invocation = Invocation::new(InvocationKind::VideoEncode, "Encode")
            .non_interactive()
            .overwrite(false)
            .input("in.mkv")
            .video_codec("libx264")
            .audio_codec("aac")
            .output("out.mp4");

        assert_eq!(
            invocation.args,
            vec![
                "-hide_banner", "-nostdin", "-n", "-i", "in.mkv", "-c:v", "libx264", "-c:a", "aac",
                "out.mp4"
            ]
        );
        assert!(!invocation.produces_intermediate_artifact());
    }

    #[tokio::test]
    async fn test_remove_artifacts_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let written = dir.path().join("palette-a.png");
        let never_written = dir.path().join("palette-b.png");
        std::fs::write(&written, b"png").unwrap();

        let plan = ConversionPlan {
            invocations: vec![
                Invocation::new(InvocationKind::PaletteGenerate, "a").artifact_output(&written),
                Invocation::new(InvocationKind::PaletteGenerate, "b").artifact_output(&never_written),
            ],
            output_path: dir.path().join("out.gif"),
        };

        plan.remove_artifacts().await;
        assert!(!written.exists());
        assert_eq!(plan.artifacts().count(), 2);
    }
}
