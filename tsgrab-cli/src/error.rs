use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download error: {0}")]
    Download(#[from] tsgrab_engine::DownloadError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Config error in {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    #[error("Remuxer `{}` not found; install ffmpeg or pass --ffmpeg", .0.display())]
    RemuxerUnavailable(PathBuf),

    #[error("Download incomplete: {0}")]
    Incomplete(String),

    #[error("Interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted | Self::Download(tsgrab_engine::DownloadError::Cancelled) => 130,
            Self::Incomplete(_) => 2,
            _ => 1,
        }
    }
}
