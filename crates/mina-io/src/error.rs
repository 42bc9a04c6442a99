//! Errors for filesystem and process collaborators.

use std::path::{Path, PathBuf};

use mina_pipeline::{PipelineError, ScriptError};

/// Errors that can occur while reading or writing images.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// A filesystem operation failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not an image the `image` crate can decode or encode.
    #[error("{}: {source}", path.display())]
    Image {
        /// Path of the image.
        path: PathBuf,
        /// Underlying error.
        source: image::ImageError,
    },

    /// The files decode but do not form a valid stack.
    #[error("{}: {reason}", path.display())]
    InvalidStack {
        /// Path of the file or directory.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
}

impl IoError {
    /// The path the error concerns.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. } | Self::Image { path, .. } | Self::InvalidStack { path, .. } => {
                path
            }
        }
    }

    /// Report this error as unreadable output of `script`.
    #[must_use]
    pub fn into_script_output(self, script: &Path) -> ScriptError {
        ScriptError::Output {
            path: script.to_path_buf(),
            reason: self.to_string(),
        }
    }
}

impl From<IoError> for PipelineError {
    fn from(err: IoError) -> Self {
        Self::ImageLoad {
            path: err.path().to_path_buf(),
            reason: match &err {
                IoError::Io { source, .. } => source.to_string(),
                IoError::Image { source, .. } => source.to_string(),
                IoError::InvalidStack { reason, .. } => reason.clone(),
            },
        }
    }
}
