use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConverterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("spawn error: failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Duration probe error: {0}")]
    Probe(String),

    #[error("A conversion job is already running on this orchestrator")]
    JobActive,

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Output file already exists: {0}")]
    OutputExists(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConverterError>;
