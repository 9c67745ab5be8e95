use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileGuardError {
    #[error("File not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Path is not a file: {}", path.display())]
    NotAFile { path: PathBuf },

    #[error("File has not been read yet. Read it first before writing to it.")]
    Unread { path: PathBuf },

    #[error("File has been modified since read, either by the user or by a linter. Read it again before attempting to write it.")]
    ExternallyModified { path: PathBuf },

    #[error("String not found in file: {needle}")]
    StringNotFound { path: PathBuf, needle: String },

    #[error("Multiple matches found ({count}). Use replace_all=true or provide a more specific string.")]
    AmbiguousEdit { path: PathBuf, count: usize },

    #[error("old_string must not be empty")]
    EmptyNeedle { path: PathBuf },

    #[error("I/O error while {operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileGuardError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Path the failed operation targeted.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound { path }
            | Self::NotAFile { path }
            | Self::Unread { path }
            | Self::ExternallyModified { path }
            | Self::StringNotFound { path, .. }
            | Self::AmbiguousEdit { path, .. }
            | Self::EmptyNeedle { path }
            | Self::Io { path, .. } => path,
        }
    }
}
