use shrinko_runtime::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("cannot split arguments: {0}")]
    Tokenize(String),

    #[error("bridge worker is not running")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}
