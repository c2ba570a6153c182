//! Output capture around a single entry-point call, and translation of the
//! call's outcome into one of two result shapes.
//!
//! Every call gets a fresh [`CaptureContext`]. Only one context may be open
//! per [`CaptureSlot`] at a time; opening a second one fails with
//! [`RuntimeError::Busy`] instead of interleaving two calls' output.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::entry::{EntryPoint, Fault, OutputSink};
use crate::error::RuntimeError;
use crate::vfs::MemFs;

/// How a failed call is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Non-zero status and raised faults become errors carrying the output.
    ThrowOnFailure,
    /// Always return the status alongside the output.
    ReturnStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationResult {
    Text(String),
    Status { exit_code: i32, text: String },
}

/// What actually happened during a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(String),
    ToolFailure { exit_code: i32, text: String },
    HostFault { original: Fault, captured: String },
}

impl Outcome {
    /// Throw-on-failure view: the output on success, an error otherwise.
    pub fn into_text(self) -> Result<String, RuntimeError> {
        match self {
            Outcome::Success(text) => Ok(text),
            Outcome::ToolFailure { text, .. } => Err(RuntimeError::ToolFailure(text)),
            Outcome::HostFault { original, captured } => {
                Err(RuntimeError::HostFault { original, captured })
            }
        }
    }

    /// Status view: never an error.
    ///
    /// A terminate request reports its own status. Any other raised fault
    /// reports status 1 with the fault message after the captured output.
    pub fn into_status(self) -> (i32, String) {
        match self {
            Outcome::Success(text) => (0, text),
            Outcome::ToolFailure { exit_code, text } => (exit_code, text),
            Outcome::HostFault {
                original: Fault::Exit(code),
                captured,
            } => (code, captured),
            Outcome::HostFault {
                original: Fault::Raised(message),
                mut captured,
            } => {
                if let Some(message) = message.filter(|m| !m.is_empty()) {
                    captured.push_str(&message);
                    captured.push('\n');
                }
                (1, captured)
            }
        }
    }
}

/// Guards the single active capture.
#[derive(Debug, Default)]
pub struct CaptureSlot {
    active: AtomicBool,
}

impl CaptureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Accumulates the lines an entry point writes during one call.
///
/// Each line is also forwarded to `tracing`: stdout at `info`, stderr at
/// `warn`. The slot is released when the context is dropped.
pub struct CaptureContext<'a> {
    slot: &'a CaptureSlot,
    buffer: String,
}

impl<'a> CaptureContext<'a> {
    pub fn open(slot: &'a CaptureSlot) -> Result<Self, RuntimeError> {
        if slot.active.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::Busy);
        }
        Ok(Self {
            slot,
            buffer: String::new(),
        })
    }

    fn finish(mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}

impl OutputSink for CaptureContext<'_> {
    fn stdout(&mut self, line: &str) {
        tracing::info!(target: "shrinko::tool", "{line}");
        self.buffer.push_str(line);
        self.buffer.push('\n');
    }

    fn stderr(&mut self, line: &str) {
        tracing::warn!(target: "shrinko::tool", "{line}");
        self.buffer.push_str(line);
        self.buffer.push('\n');
    }
}

impl Drop for CaptureContext<'_> {
    fn drop(&mut self) {
        self.slot.active.store(false, Ordering::Release);
    }
}

/// Call `entry` once with its output captured.
pub async fn capture(
    slot: &CaptureSlot,
    entry: &dyn EntryPoint,
    fs: &mut MemFs,
    argv: &[String],
) -> Result<Outcome, RuntimeError> {
    let mut ctx = CaptureContext::open(slot)?;
    tracing::debug!(?argv, "Invoking entry point");
    let result = entry.call(fs, argv, &mut ctx).await;
    let text = ctx.finish();

    Ok(match result {
        Ok(0) => Outcome::Success(text),
        Ok(exit_code) => {
            tracing::debug!(exit_code, "Entry point returned failure status");
            Outcome::ToolFailure { exit_code, text }
        }
        Err(original) => {
            tracing::warn!(fault = ?original, "Entry point raised");
            Outcome::HostFault {
                original,
                captured: text,
            }
        }
    })
}

/// Call `entry` once and shape the result according to `mode`.
pub async fn invoke(
    slot: &CaptureSlot,
    entry: &dyn EntryPoint,
    fs: &mut MemFs,
    argv: &[String],
    mode: Mode,
) -> Result<InvocationResult, RuntimeError> {
    let outcome = capture(slot, entry, fs, argv).await?;
    match mode {
        Mode::ThrowOnFailure => outcome.into_text().map(InvocationResult::Text),
        Mode::ReturnStatus => {
            let (exit_code, text) = outcome.into_status();
            Ok(InvocationResult::Status { exit_code, text })
        }
    }
}
