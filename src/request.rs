use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConverterError;

/// Container or audio format the caller wants to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Avi,
    Mkv,
    Mov,
    Flv,
    Gif,
    Mp3,
    Wav,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 8] = [
        OutputFormat::Mp4,
        OutputFormat::Avi,
        OutputFormat::Mkv,
        OutputFormat::Mov,
        OutputFormat::Flv,
        OutputFormat::Gif,
        OutputFormat::Mp3,
        OutputFormat::Wav,
    ];

    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Avi => "avi",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Mov => "mov",
            OutputFormat::Flv => "flv",
            OutputFormat::Gif => "gif",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, OutputFormat::Mp3 | OutputFormat::Wav)
    }

    pub fn is_video_container(&self) -> bool {
        matches!(
            self,
            OutputFormat::Mp4 | OutputFormat::Avi | OutputFormat::Mkv | OutputFormat::Mov | OutputFormat::Flv
        )
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = ConverterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('.').to_lowercase();
        OutputFormat::ALL
            .into_iter()
            .find(|format| format.extension() == wanted)
            .ok_or_else(|| {
                ConverterError::UnsupportedFormat(format!(
                    "'{}'. Valid formats: mp4, avi, mkv, mov, flv, gif, mp3, wav",
                    s
                ))
            })
    }
}

/// Whether streams are copied as-is or re-encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Stream copy into the new container, no re-encoding
    FastCopy,
    Reencode,
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionMode::FastCopy => f.write_str("copy"),
            ConversionMode::Reencode => f.write_str("reencode"),
        }
    }
}

impl FromStr for ConversionMode {
    type Err = ConverterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "copy" | "fast-copy" | "fastcopy" => Ok(ConversionMode::FastCopy),
            "reencode" | "re-encode" => Ok(ConversionMode::Reencode),
            _ => Err(ConverterError::Config(format!(
                "Invalid conversion mode '{}'. Valid modes: copy, reencode",
                s
            ))),
        }
    }
}

/// Video encoder family used by the general re-encode path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hardware {
    Cpu,
    Nvidia,
    Intel,
    Amd,
}

impl Hardware {
    /// ffmpeg encoder name for H.264 output
    pub fn video_encoder(&self) -> &'static str {
        match self {
            Hardware::Cpu => "libx264",
            Hardware::Nvidia => "h264_nvenc",
            Hardware::Intel => "h264_qsv",
            Hardware::Amd => "h264_amf",
        }
    }

    /// Decoder-side acceleration passed with `-hwaccel`
    pub fn hwaccel(&self) -> Option<&'static str> {
        match self {
            Hardware::Cpu => None,
            Hardware::Nvidia => Some("cuda"),
            Hardware::Intel => Some("qsv"),
            Hardware::Amd => Some("dxva2"),
        }
    }

    pub fn is_accelerated(&self) -> bool {
        !matches!(self, Hardware::Cpu)
    }
}

impl fmt::Display for Hardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hardware::Cpu => f.write_str("CPU"),
            Hardware::Nvidia => f.write_str("NVIDIA"),
            Hardware::Intel => f.write_str("Intel"),
            Hardware::Amd => f.write_str("AMD"),
        }
    }
}

impl FromStr for Hardware {
    type Err = ConverterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" | "software" => Ok(Hardware::Cpu),
            "nvidia" | "nvenc" => Ok(Hardware::Nvidia),
            "intel" | "qsv" => Ok(Hardware::Intel),
            "amd" | "amf" => Ok(Hardware::Amd),
            _ => Err(ConverterError::Config(format!(
                "Invalid hardware mode '{}'. Valid modes: cpu, nvidia, intel, amd",
                s
            ))),
        }
    }
}

/// A single conversion submitted by the front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub input_path: PathBuf,
    pub output_format: OutputFormat,
    pub mode: ConversionMode,
    pub hardware: Hardware,
}

impl ConversionRequest {
    pub fn new<P: Into<PathBuf>>(
        input_path: P,
        output_format: OutputFormat,
        mode: ConversionMode,
        hardware: Hardware,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_format,
            mode,
            hardware,
        }
    }

    /// Copy of this request with a different encoder family
    pub fn with_hardware(&self, hardware: Hardware) -> Self {
        Self {
            hardware,
            ..self.clone()
        }
    }

    pub fn input_is_gif(&self) -> bool {
        self.input_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"))
    }

    /// `<input stem>.<extension>` next to the input file.
    ///
    /// When that would be the input itself, `-converted` is appended to the
    /// stem so a job never writes over its own source.
    pub fn output_path(&self) -> PathBuf {
        let candidate = self.input_path.with_extension(self.output_format.extension());
        if candidate != self.input_path {
            return candidate;
        }

        let stem = self
            .input_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let file_name = format!("{}-converted.{}", stem, self.output_format.extension());
        match self.input_path.parent() {
            Some(parent) => parent.join(file_name),
            None => Path::new(&file_name).to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_replaces_extension() {
        let request = ConversionRequest::new(
            "/media/clips/holiday.mkv",
            OutputFormat::Mp4,
            ConversionMode::Reencode,
            Hardware::Cpu,
        );
        assert_eq!(request.output_path(), PathBuf::from("/media/clips/holiday.mp4"));
    }

    #[test]
    fn test_output_path_never_overwrites_input() {
        let request = ConversionRequest::new(
            "/media/clips/holiday.mp4",
            OutputFormat::Mp4,
            ConversionMode::Reencode,
            Hardware::Nvidia,
        );
        assert_eq!(
            request.output_path(),
            PathBuf::from("/media/clips/holiday-converted.mp4")
        );
    }

    #[test]
    fn test_input_is_gif_ignores_case() {
        let request = ConversionRequest::new(
            "loop.GIF",
            OutputFormat::Mp4,
            ConversionMode::Reencode,
            Hardware::Cpu,
        );
        assert!(request.input_is_gif());

        let retry = request.with_hardware(Hardware::Amd);
        assert_eq!(retry.hardware, Hardware::Amd);
        assert_eq!(retry.input_path, request.input_path);
    }

    #[test]
    fn test_parse_cli_values() {
        assert_eq!(".MKV".parse::<OutputFormat>().unwrap(), OutputFormat::Mkv);
        assert!("webm".parse::<OutputFormat>().is_err());
        assert_eq!("copy".parse::<ConversionMode>().unwrap(), ConversionMode::FastCopy);
        assert_eq!("NVIDIA".parse::<Hardware>().unwrap(), Hardware::Nvidia);
        assert!("tpu".parse::<Hardware>().is_err());
    }

    #[test]
    fn test_hardware_encoders() {
        assert_eq!(Hardware::Cpu.video_encoder(), "libx264");
        assert_eq!(Hardware::Cpu.hwaccel(), None);
        assert_eq!(Hardware::Intel.video_encoder(), "h264_qsv");
        assert_eq!(Hardware::Amd.hwaccel(), Some("dxva2"));
    }
}
