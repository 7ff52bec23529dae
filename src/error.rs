//! Error taxonomy shared by the parsers, the chapter reader and the extractors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::generation::GenerationError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing source path, chapter file or metadata sidecar.
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("cannot read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Bytes of one file are not valid under the committed encoding.
    #[error("`{}` is not valid {encoding}", path.display())]
    Decode { path: PathBuf, encoding: String },

    #[error("invalid JSON in `{}`: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no readable chapters between {start} and {end}")]
    NoChapters { start: u32, end: u32 },

    /// The generation call failed fatally or ran out of retries.
    #[error("generation failed: {0}")]
    Upstream(#[source] GenerationError),
}

impl Error {
    /// Map an I/O failure on `path`, folding `NotFound` into [`Error::NotFound`].
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Error::NotFound { path }
        } else {
            Error::Io { path, source }
        }
    }
}
