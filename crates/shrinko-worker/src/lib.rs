//! Background worker for the shrinko8 bridge.
//!
//! [`spawn`] starts a single worker task that owns the bridge state and
//! begins bootstrapping immediately. The returned [`BridgeHandle`] is the
//! caller's side: every operation is a message to the worker, answered in
//! the order it was sent. [`protocol::serve`] exposes the same operations
//! as line-delimited JSON over any async reader/writer pair.

pub mod api;
pub mod error;
pub mod protocol;
pub mod tokenize;
pub mod worker;

pub use api::{BridgeHandle, CommandOutcome, RunRequest};
pub use error::WorkerError;
pub use tokenize::{ShellTokenizer, Tokenizer};
pub use worker::{spawn, spawn_with_tokenizer};
