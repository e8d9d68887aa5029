// crates/reelplay-core/src/error.rs
//
// The error surface shared by every reelplay crate. Reader futures, plugin
// constructors, and the timeline engine all return `Result<T>` with these
// kinds; the resolver converts OutOfRange into gaps instead of failing.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed path, timecode, or JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// Path unreadable or no plugin claims the extension.
    #[error("not found: {0}")]
    NotFound(String),

    /// Codec or decoder failure (I/O, demux, decode).
    #[error("format error: {0}")]
    Format(String),

    /// Time outside a valid range. The resolver treats this as a gap;
    /// it only surfaces as an error from lower layers.
    #[error("out of range")]
    OutOfRange,

    /// Future terminated by the caller.
    #[error("cancelled")]
    Cancelled,

    /// Cyclic or otherwise invalid composition graph.
    #[error("composition error: {0}")]
    Composition(String),

    /// Output device lost or misconfigured.
    #[error("device error: {0}")]
    Device(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("json error: {0}")]
    Json(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(e.to_string()),
            _ => Error::Io(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
