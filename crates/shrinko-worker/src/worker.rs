use std::sync::Arc;

use shrinko_runtime::config::SlotPaths;
use shrinko_runtime::staging::stage;
use shrinko_runtime::{BridgeConfig, Launcher, Lifecycle, Session, VirtualFile};
use tokio::sync::{MutexGuard, mpsc};

use crate::api::{BridgeHandle, CommandOutcome, Request, RunRequest};
use crate::error::WorkerError;
use crate::tokenize::{ShellTokenizer, Tokenizer};

/// Extensions loaded into the input slot verbatim when they arrive alone.
const TEXT_FORMATS: &[&str] = &["p8", "lua", "txt"];

/// Start a worker on the current tokio runtime and begin bootstrapping.
pub fn spawn(config: BridgeConfig, launcher: Arc<dyn Launcher>) -> BridgeHandle {
    spawn_with_tokenizer(config, launcher, Box::new(ShellTokenizer))
}

pub fn spawn_with_tokenizer(
    config: BridgeConfig,
    launcher: Arc<dyn Launcher>,
    tokenizer: Box<dyn Tokenizer>,
) -> BridgeHandle {
    let (tx, rx) = mpsc::channel(config.worker.queue_depth.max(1));
    let lifecycle = Arc::new(Lifecycle::new(Arc::new(config), launcher));
    let handle = BridgeHandle::new(tx, lifecycle.progress());

    let eager = lifecycle.clone();
    tokio::spawn(async move {
        let _ = eager.ready().await;
    });

    let worker = Worker {
        lifecycle,
        tokenizer,
        rx,
    };
    tokio::spawn(worker.run());

    handle
}

/// Owns the bridge state and answers requests one at a time.
struct Worker {
    lifecycle: Arc<Lifecycle>,
    tokenizer: Box<dyn Tokenizer>,
    rx: mpsc::Receiver<Request>,
}

impl Worker {
    async fn run(mut self) {
        tracing::info!("Bridge worker started");
        while let Some(request) = self.rx.recv().await {
            self.handle(request).await;
        }
        tracing::info!("Bridge worker stopped");
    }

    async fn handle(&self, request: Request) {
        // A dropped receiver just means the caller stopped waiting.
        match request {
            Request::LoadInputFiles {
                files,
                main,
                subfile,
                reply,
            } => {
                let _ = reply.send(self.load_input_files(&files, &main, subfile.as_deref()).await);
            }
            Request::ListInputFile { files, main, reply } => {
                let _ = reply.send(self.list_input_file(&files, &main).await);
            }
            Request::UpdateInputFile { text, reply } => {
                let _ = reply.send(self.update_input_file(text).await);
            }
            Request::UpdateScriptFile { text, reply } => {
                let _ = reply.send(self.update_script_file(text).await);
            }
            Request::UpdatePico8Dat { data, reply } => {
                let _ = reply.send(self.update_pico8_dat(data).await);
            }
            Request::GetVersion { reply } => {
                let _ = reply.send(self.get_version().await);
            }
            Request::RunShrinko { request, reply } => {
                let _ = reply.send(self.run_shrinko(request).await);
            }
            Request::RunTests { reply } => {
                let _ = reply.send(self.run_tests().await);
            }
        }
    }

    fn slots(&self) -> &SlotPaths {
        &self.lifecycle.config().slots
    }

    async fn session(&self) -> Result<MutexGuard<'_, Session>, WorkerError> {
        Ok(self.lifecycle.ready().await?.lock().await)
    }

    async fn load_input_files(
        &self,
        files: &[VirtualFile],
        main: &str,
        subfile: Option<&str>,
    ) -> Result<String, WorkerError> {
        let mut session = self.session().await?;
        let slots = self.slots();

        if let [only] = files
            && subfile.is_none()
            && is_text_format(main)
        {
            session.fs.write(&slots.input, only.data.clone())?;
            tracing::debug!(main, "Text input loaded directly");
            return Ok(session.fs.read_text(&slots.input)?);
        }

        let main_path = stage(&mut session.fs, &slots.working_root, files, main)?;
        let mut argv = vec![main_path, slots.input.clone()];
        if let Some(subfile) = subfile {
            argv.push("--cart".into());
            argv.push(subfile.into());
        }

        let tool = session.tool();
        session.call_checked(tool.as_ref(), &argv).await?;
        tracing::info!(main, files = files.len(), "Input converted");
        Ok(session.fs.read_text(&slots.input)?)
    }

    async fn list_input_file(
        &self,
        files: &[VirtualFile],
        main: &str,
    ) -> Result<Vec<String>, WorkerError> {
        let mut session = self.session().await?;
        let main_path = stage(&mut session.fs, &self.slots().working_root, files, main)?;

        let tool = session.tool();
        let text = session.call_checked(tool.as_ref(), &[main_path, "--list".into()]).await?;
        Ok(text
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    async fn update_input_file(&self, text: String) -> Result<(), WorkerError> {
        let mut session = self.session().await?;
        session.fs.write(&self.slots().input, text)?;
        Ok(())
    }

    async fn update_script_file(&self, text: String) -> Result<(), WorkerError> {
        let mut session = self.session().await?;
        session.fs.write(&self.slots().script, text)?;
        Ok(())
    }

    async fn update_pico8_dat(&self, data: Vec<u8>) -> Result<(), WorkerError> {
        let mut session = self.session().await?;
        session.fs.write(&self.slots().aux_data, data)?;
        session.has_aux_data = true;
        Ok(())
    }

    async fn get_version(&self) -> Result<String, WorkerError> {
        let mut session = self.session().await?;
        let tool = session.tool();
        Ok(session.call_checked(tool.as_ref(), &["--version".into()]).await?)
    }

    async fn run_shrinko(&self, request: RunRequest) -> Result<CommandOutcome, WorkerError> {
        let mut session = self.session().await?;
        let slots = self.slots();

        let extra = match request.arg_string.as_deref() {
            Some(text) => self.tokenizer.split(text)?,
            None => Vec::new(),
        };
        let argv = run_argv(slots, &request, extra, session.has_aux_data);

        let tool = session.tool();
        let (exit_code, stdout) = session.call_status(tool.as_ref(), &argv).await?;
        tracing::info!(exit_code, "Tool run finished");

        let mut outcome = CommandOutcome {
            exit_code,
            stdout,
            output: None,
            preview: None,
        };
        if exit_code == 0 {
            if let Some(encoding) = request.encoding {
                outcome.output = Some(session.fs.read_as(&slots.output, encoding)?);
            }
            if request.use_preview {
                outcome.preview = Some(session.fs.read_text(&slots.preview)?);
            }
        }
        Ok(outcome)
    }

    async fn run_tests(&self) -> Result<String, WorkerError> {
        let mut session = self.session().await?;
        let entry = self.lifecycle.test_suite(&mut session).await?;
        Ok(session.call_checked(entry.as_ref(), &[]).await?)
    }
}

/// Command line for a `run` call, in the order the tool expects.
fn run_argv(
    slots: &SlotPaths,
    request: &RunRequest,
    extra: Vec<String>,
    has_aux_data: bool,
) -> Vec<String> {
    let mut argv = vec![slots.input.clone()];
    if request.encoding.is_some() {
        argv.push(slots.output.clone());
    }
    argv.extend(request.args.iter().cloned());
    argv.extend(extra);
    if request.use_script {
        argv.push("--script".into());
        argv.push(slots.script.clone());
    }
    if request.use_preview {
        argv.push("--extra-output".into());
        argv.push(slots.preview.clone());
    }
    if has_aux_data {
        // only read by the tool when it needs it
        argv.push("--pico8-dat".into());
        argv.push(slots.aux_data.clone());
    }
    argv
}

fn is_text_format(main: &str) -> bool {
    main.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| TEXT_FORMATS.contains(&ext.as_str()))
}
