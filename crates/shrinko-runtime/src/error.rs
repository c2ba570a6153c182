use std::sync::Arc;

use thiserror::Error;

use crate::entry::Fault;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("file exists: {0}")]
    AlreadyExists(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("invalid relative path: {0:?}")]
    InvalidPath(String),

    #[error("{path} is not valid {encoding}")]
    Decode {
        path: String,
        encoding: &'static str,
    },

    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// The entry point returned a non-zero status; the message is the
    /// captured output of that call.
    #[error("{0}")]
    ToolFailure(String),

    /// The entry point raised instead of returning.
    #[error("{}", host_fault_message(.original, .captured))]
    HostFault { original: Fault, captured: String },

    #[error("an invocation is already in flight")]
    Busy,

    #[error("entry point unavailable: {0}")]
    EntryPoint(String),

    #[error("bootstrap failed: {0}")]
    InitFailed(Arc<RuntimeError>),

    #[error("resource {location} returned HTTP {status}")]
    FetchStatus { location: String, status: u16 },

    #[error("checksum mismatch for {location}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        location: String,
        expected: String,
        actual: String,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Archive(#[from] zip::result::ZipError),

    #[error(transparent)]
    Fetch(#[from] reqwest::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Message for a raised fault. A fault with no message, or a request to
/// terminate the process, takes the captured output as its whole message;
/// otherwise the captured output is appended on a new line.
fn host_fault_message(original: &Fault, captured: &str) -> String {
    match original {
        Fault::Exit(_) => captured.to_string(),
        Fault::Raised(message) => match message.as_deref() {
            None | Some("") => captured.to_string(),
            Some(message) => format!("{message}\n{captured}"),
        },
    }
}
