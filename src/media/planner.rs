use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::{Config, GifConfig};
use crate::request::{ConversionMode, ConversionRequest, OutputFormat};
use super::{ConversionPlan, Invocation, InvocationKind};

/// Maps a conversion request to the ffmpeg invocations that satisfy it
#[derive(Debug, Clone)]
pub struct CommandPlanner {
    overwrite: bool,
    gif: GifConfig,
    scratch_dir: Option<PathBuf>,
}

impl CommandPlanner {
    pub fn new(config: &Config) -> Self {
        Self {
            overwrite: config.media.overwrite,
            gif: config.gif.clone(),
            scratch_dir: config.media.scratch_dir.clone(),
        }
    }

    /// Build the plan for `request`. Pure: nothing touches the filesystem.
    ///
    /// `job_id` only feeds intermediate file names, so two jobs sharing a
    /// directory never collide.
    pub fn plan(&self, request: &ConversionRequest, job_id: Uuid) -> ConversionPlan {
        let output_path = request.output_path();
        let input = request.input_path.as_path();

        let invocations = if request.mode == ConversionMode::FastCopy {
            vec![self.stream_copy(input, &output_path)]
        } else if request.output_format.is_audio() {
            vec![self.audio_extract(input, &output_path)]
        } else if request.output_format == OutputFormat::Gif {
            let palette = self.palette_path(&output_path, job_id);
            vec![
                self.palette_generate(input, &palette),
                self.palette_encode(input, &palette, &output_path),
            ]
        } else if request.input_is_gif() && request.output_format.is_video_container() {
            vec![self.gif_to_video(input, &output_path, request.output_format)]
        } else {
            vec![self.video_encode(request, &output_path)]
        };

        ConversionPlan {
            invocations,
            output_path,
        }
    }

    fn stream_copy(&self, input: &Path, output: &Path) -> Invocation {
        Invocation::new(InvocationKind::StreamCopy, "Stream copy")
            .non_interactive()
            .overwrite(self.overwrite)
            .input(input)
            .copy_streams()
            .output(output)
    }

    fn audio_extract(&self, input: &Path, output: &Path) -> Invocation {
        Invocation::new(InvocationKind::AudioExtract, "Audio extraction")
            .non_interactive()
            .overwrite(self.overwrite)
            .input(input)
            .no_video()
            .audio_quality(0)
            .output(output)
    }

    fn palette_generate(&self, input: &Path, palette: &Path) -> Invocation {
        Invocation::new(InvocationKind::PaletteGenerate, "Palette generation")
            .non_interactive()
            .overwrite(true)
            .input(input)
            .video_filter(format!("{},palettegen", self.gif_scale_filter()))
            .artifact_output(palette)
    }

    fn palette_encode(&self, input: &Path, palette: &Path, output: &Path) -> Invocation {
        Invocation::new(InvocationKind::PaletteEncode, "GIF encode")
            .non_interactive()
            .overwrite(self.overwrite)
            .input(input)
            .input(palette)
            .filter_graph(format!("{}[x];[x][1:v]paletteuse", self.gif_scale_filter()))
            .output(output)
    }

    fn gif_to_video(&self, input: &Path, output: &Path, format: OutputFormat) -> Invocation {
        let mut invocation = Invocation::new(InvocationKind::GifToVideo, "GIF to video")
            .non_interactive()
            .overwrite(self.overwrite)
            .input(input)
            // yuv420p needs even dimensions
            .video_filter("scale=trunc(iw/2)*2:trunc(ih/2)*2")
            .pixel_format("yuv420p");

        if matches!(format, OutputFormat::Mp4 | OutputFormat::Mov) {
            invocation = invocation.arg("-movflags").arg("faststart");
        }

        invocation.output(output)
    }

    fn video_encode(&self, request: &ConversionRequest, output: &Path) -> Invocation {
        let mut invocation = Invocation::new(
            InvocationKind::VideoEncode,
            format!("Video encode ({})", request.hardware),
        )
        .non_interactive()
        .overwrite(self.overwrite);

        if let Some(accel) = request.hardware.hwaccel() {
            invocation = invocation.hwaccel(accel);
        }

        invocation
            .input(&request.input_path)
            .video_codec(request.hardware.video_encoder())
            .audio_codec("aac")
            .output(output)
    }

    fn gif_scale_filter(&self) -> String {
        format!("fps={},scale={}:-1:flags=lanczos", self.gif.fps, self.gif.width)
    }

    fn palette_path(&self, output: &Path, job_id: Uuid) -> PathBuf {
        let dir = match &self.scratch_dir {
            Some(dir) => dir.clone(),
            None => output
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        let stem = output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());

        dir.join(format!(".{}.palette-{}.png", stem, job_id.simple()))
    }
}
