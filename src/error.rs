use std::io;

#[derive(Debug, thiserror::Error)]
pub enum LivevoxError {
    #[error("audio error: {0}")]
    Audio(String),

    #[error("device unavailable: {0}")]
    Device(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LivevoxError>;
