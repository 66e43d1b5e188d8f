use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by single-file and batch conversion
#[derive(ClapArgs, Debug, Clone)]
pub struct ConversionOptions {
    /// Output format: mp4, avi, mkv, mov, flv, gif, mp3, wav
    #[arg(short, long, default_value = "mp4")]
    pub format: String,

    /// Conversion mode: copy (stream copy) or reencode
    #[arg(short, long, default_value = "reencode")]
    pub mode: String,

    /// Video encoder hardware: cpu, nvidia, intel, amd
    #[arg(long, default_value = "cpu")]
    pub hardware: String,

    /// Overwrite existing output files
    #[arg(long)]
    pub overwrite: bool,

    /// Print job events as JSON lines instead of a progress bar
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a single media file
    Convert {
        /// Input media file
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        options: ConversionOptions,
    },

    /// Convert every media file in a directory
    Batch {
        /// Input directory containing media files
        #[arg(short = 'd', long)]
        input_dir: PathBuf,

        /// Input extensions to pick up (comma-separated)
        #[arg(long, default_value = "ts,mkv,avi,mp4,mov,flv,gif,mp3,wav")]
        extensions: String,

        #[command(flatten)]
        options: ConversionOptions,
    },

    /// Check that ffmpeg and ffprobe are available
    Check,

    /// Write the default configuration file
    InitConfig {
        /// Destination path
        #[arg(default_value = "media-converter.toml")]
        path: PathBuf,
    },
}
