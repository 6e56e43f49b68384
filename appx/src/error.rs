use std::io;
use std::path::{Path, PathBuf};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced while writing a package. None of these are recoverable;
/// the writer deletes the partial output file and bails.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bundles require an AppxMetadata/AppxBundleManifest.xml entry")]
    MissingManifest,
    #[error("deflate failed: {0}")]
    Compression(String),
    #[error("{stage}: {reason}")]
    Crypto { stage: &'static str, reason: String },
    /// Reserved. Name sanitization percent-encodes anything it cannot
    /// represent, so this is currently never constructed.
    #[error("invalid archive name: {0}")]
    InvalidArchiveName(String),
}

impl Error {
    pub(crate) fn io(path: impl AsRef<Path>) -> impl FnOnce(io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn crypto<E: std::fmt::Display>(stage: &'static str) -> impl FnOnce(E) -> Self {
        move |reason| Self::Crypto {
            stage,
            reason: reason.to_string(),
        }
    }
}
