use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::RuntimeError;
use crate::vfs::MemFs;

/// Why an entry point stopped without returning a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The tool asked to terminate the process with this status.
    Exit(i32),
    /// Anything else raised out of the call, with its message if it had one.
    Raised(Option<String>),
}

/// Where an entry point writes its text output, one line at a time.
pub trait OutputSink: Send {
    fn stdout(&mut self, line: &str);
    fn stderr(&mut self, line: &str);
}

pub type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<i32, Fault>> + Send + 'a>>;

/// The tool's `main(argv) -> status`.
///
/// Implementations read and write only through `fs` and report text only
/// through `output`. A zero status is success.
pub trait EntryPoint: Send + Sync {
    fn call<'a>(
        &'a self,
        fs: &'a mut MemFs,
        argv: &'a [String],
        output: &'a mut dyn OutputSink,
    ) -> CallFuture<'a>;
}

/// Plain functions run to completion before the returned future is polled.
impl<F> EntryPoint for F
where
    F: Fn(&mut MemFs, &[String], &mut dyn OutputSink) -> Result<i32, Fault> + Send + Sync,
{
    fn call<'a>(
        &'a self,
        fs: &'a mut MemFs,
        argv: &'a [String],
        output: &'a mut dyn OutputSink,
    ) -> CallFuture<'a> {
        Box::pin(std::future::ready(self(fs, argv, output)))
    }
}

/// A constructed embedded environment that can bind entry points out of the
/// resources unpacked into the filesystem.
pub trait Environment: Send + Sync {
    fn resolve(&self, fs: &MemFs, module: &str) -> Result<Arc<dyn EntryPoint>, RuntimeError>;
}

/// Builds the embedded environment. Called once, during bootstrap.
pub trait Launcher: Send + Sync {
    fn launch(&self) -> Result<Arc<dyn Environment>, RuntimeError>;
}
