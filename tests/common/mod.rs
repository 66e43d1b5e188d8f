//! Stand-in encoders for process-level tests.
//!
//! Every script is written once per test binary, before any test spawns a
//! process, so no child can inherit a script's write descriptor (which
//! would make exec fail with ETXTBSY).

#![allow(dead_code)]

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use media_converter::config::Config;
use media_converter::media::DurationProbe;

/// Prints ffmpeg-like status lines terminated by `\r`, writes its last
/// argument and succeeds. Hardware encoders fail like a missing driver.
const FAKE_FFMPEG: &str = r#"#!/bin/sh
for last; do :; done
case " $* " in
  *" h264_nvenc "*|*" h264_qsv "*|*" h264_amf "*)
    echo "Error while opening encoder for output stream #0:0" >&2
    exit 1
    ;;
esac
echo "Input #0, matroska,webm, from 'input':"
printf 'frame=   10 fps=0.0 q=-1.0 size=       0kB time=00:00:30.00 bitrate=N/A speed=60x\r' >&2
printf 'frame=   20 fps=0.0 q=-1.0 size=     256kB time=00:01:00.00 bitrate=N/A speed=60x\r' >&2
printf 'frame=   30 fps=0.0 q=-1.0 size=     512kB time=00:02:10.00 bitrate=N/A speed=60x\n' >&2
printf 'converted' > "$last"
exit 0
"#;

/// Fails every invocation after writing a partial output
const FAILING_FFMPEG: &str = r#"#!/bin/sh
for last; do :; done
printf 'partial' > "$last"
echo "frame=    5 fps=0.0 q=-1.0 size=       0kB time=00:00:05.00 bitrate=N/A speed=10x" >&2
echo "Conversion failed!" >&2
exit 1
"#;

/// Writes its last argument, then keeps reporting progress for ~20s
const SLOW_FFMPEG: &str = r#"#!/bin/sh
for last; do :; done
printf 'partial' > "$last"
i=0
while [ $i -lt 200 ]; do
  echo "frame=$i fps=10 q=-1.0 size=0kB time=00:00:0$((i % 10)).00 bitrate=N/A speed=1x" >&2
  i=$((i + 1))
  sleep 0.1
done
exit 0
"#;

/// Like SLOW_FFMPEG but ignores SIGINT, so only a kill stops it
const STUBBORN_FFMPEG: &str = r#"#!/bin/sh
trap '' INT
for last; do :; done
printf 'partial' > "$last"
i=0
while [ $i -lt 200 ]; do
  echo "frame=$i fps=10 time=00:00:01.00 bitrate=N/A" >&2
  i=$((i + 1))
  sleep 0.1
done
exit 0
"#;

/// Alternates stdout and stderr writes with no delay in between
const INTERLEAVED_FFMPEG: &str = r#"#!/bin/sh
i=0
while [ $i -lt 400 ]; do
  if [ $((i % 2)) -eq 0 ]; then
    echo "line $i"
  else
    echo "line $i" >&2
  fi
  i=$((i + 1))
done
exit 0
"#;

pub struct Fixtures {
    dir: PathBuf,
}

impl Fixtures {
    pub fn fake_ffmpeg(&self) -> PathBuf {
        self.dir.join("fake-ffmpeg")
    }

    pub fn failing_ffmpeg(&self) -> PathBuf {
        self.dir.join("failing-ffmpeg")
    }

    pub fn slow_ffmpeg(&self) -> PathBuf {
        self.dir.join("slow-ffmpeg")
    }

    pub fn stubborn_ffmpeg(&self) -> PathBuf {
        self.dir.join("stubborn-ffmpeg")
    }

    pub fn interleaved_ffmpeg(&self) -> PathBuf {
        self.dir.join("interleaved-ffmpeg")
    }
}

pub fn fixtures() -> &'static Fixtures {
    static FIXTURES: OnceLock<Fixtures> = OnceLock::new();
    FIXTURES.get_or_init(|| {
        let dir = std::env::temp_dir().join(format!(
            "media-converter-fixtures-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).expect("create fixture dir");

        for (name, body) in [
            ("fake-ffmpeg", FAKE_FFMPEG),
            ("failing-ffmpeg", FAILING_FFMPEG),
            ("slow-ffmpeg", SLOW_FFMPEG),
            ("stubborn-ffmpeg", STUBBORN_FFMPEG),
            ("interleaved-ffmpeg", INTERLEAVED_FFMPEG),
        ] {
            let path = dir.join(name);
            std::fs::write(&path, body).expect("write fixture script");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("make fixture executable");
        }

        Fixtures { dir }
    })
}

/// Duration probe returning a fixed answer
pub struct FixedDuration(pub Option<f64>);

#[async_trait]
impl DurationProbe for FixedDuration {
    async fn probe_duration(&self, _path: &Path) -> Option<f64> {
        self.0
    }
}

pub fn config_with(binary: &Path) -> Config {
    let mut config = Config::default();
    config.media.binary_path = binary.display().to_string();
    config.job.grace_period_ms = 500;
    config
}

/// A scratch directory holding an (empty) input file
pub fn workspace(input_name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create workspace");
    let input = dir.path().join(input_name);
    std::fs::write(&input, b"not really media").expect("write input");
    (dir, input)
}

/// Names of everything left in `dir`
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read workspace")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
