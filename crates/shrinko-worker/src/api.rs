use std::sync::Arc;

use shrinko_runtime::{Encoding, FileData, Progress, VirtualFile};
use tokio::sync::{mpsc, oneshot};

use crate::error::WorkerError;

/// Options for a `run` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Arguments passed through as-is.
    pub args: Vec<String>,
    /// Free-form argument string, split shell-style.
    pub arg_string: Option<String>,
    pub use_script: bool,
    /// Read the output slot back with this encoding on success.
    pub encoding: Option<Encoding>,
    pub use_preview: bool,
}

/// Result of a `run` call. `output` and `preview` are only ever set when
/// `exit_code` is zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub output: Option<FileData>,
    pub preview: Option<String>,
}

type Reply<T> = oneshot::Sender<Result<T, WorkerError>>;

/// A message to the worker. Each carries the channel its answer goes back on.
pub(crate) enum Request {
    LoadInputFiles {
        files: Vec<VirtualFile>,
        main: String,
        subfile: Option<String>,
        reply: Reply<String>,
    },
    ListInputFile {
        files: Vec<VirtualFile>,
        main: String,
        reply: Reply<Vec<String>>,
    },
    UpdateInputFile {
        text: String,
        reply: Reply<()>,
    },
    UpdateScriptFile {
        text: String,
        reply: Reply<()>,
    },
    UpdatePico8Dat {
        data: Vec<u8>,
        reply: Reply<()>,
    },
    GetVersion {
        reply: Reply<String>,
    },
    RunShrinko {
        request: RunRequest,
        reply: Reply<CommandOutcome>,
    },
    RunTests {
        reply: Reply<String>,
    },
}

/// Caller side of the bridge.
///
/// Cheap to clone. Every async method queues a message and waits for the
/// worker's answer; the worker handles messages strictly in arrival order.
/// [`get_progress`](Self::get_progress) bypasses the queue.
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::Sender<Request>,
    progress: Arc<Progress>,
}

impl BridgeHandle {
    pub(crate) fn new(tx: mpsc::Sender<Request>, progress: Arc<Progress>) -> Self {
        Self { tx, progress }
    }

    /// Bootstrap progress: 0..=100, or -1 once bootstrap has failed.
    pub fn get_progress(&self) -> i32 {
        self.progress.get()
    }

    /// Put the caller's project into the input slot, converting it with the
    /// tool unless it is a single text-format file. Returns the input text.
    pub async fn load_input_files(
        &self,
        files: Vec<VirtualFile>,
        main: impl Into<String>,
        subfile: Option<String>,
    ) -> Result<String, WorkerError> {
        let main = main.into();
        self.call(|reply| Request::LoadInputFiles {
            files,
            main,
            subfile,
            reply,
        })
        .await
    }

    /// Entries of a multi-cart file, one per element.
    pub async fn list_input_file(
        &self,
        files: Vec<VirtualFile>,
        main: impl Into<String>,
    ) -> Result<Vec<String>, WorkerError> {
        let main = main.into();
        self.call(|reply| Request::ListInputFile { files, main, reply })
            .await
    }

    pub async fn update_input_file(&self, text: impl Into<String>) -> Result<(), WorkerError> {
        let text = text.into();
        self.call(|reply| Request::UpdateInputFile { text, reply })
            .await
    }

    pub async fn update_script_file(&self, text: impl Into<String>) -> Result<(), WorkerError> {
        let text = text.into();
        self.call(|reply| Request::UpdateScriptFile { text, reply })
            .await
    }

    pub async fn update_pico8_dat(&self, data: Vec<u8>) -> Result<(), WorkerError> {
        self.call(|reply| Request::UpdatePico8Dat { data, reply })
            .await
    }

    pub async fn get_version(&self) -> Result<String, WorkerError> {
        self.call(|reply| Request::GetVersion { reply }).await
    }

    /// Run the tool on the input slot. A non-zero exit is reported in the
    /// outcome, not as an error.
    pub async fn run_shrinko(&self, request: RunRequest) -> Result<CommandOutcome, WorkerError> {
        self.call(|reply| Request::RunShrinko { request, reply })
            .await
    }

    pub async fn run_tests(&self) -> Result<String, WorkerError> {
        self.call(|reply| Request::RunTests { reply }).await
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| WorkerError::Closed)?;
        rx.await.map_err(|_| WorkerError::Closed)?
    }
}
