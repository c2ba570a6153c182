use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use tokio::sync::{Mutex, OnceCell};

use crate::archive::unpack_zip;
use crate::capture::{self, InvocationResult, Mode};
use crate::config::BridgeConfig;
use crate::entry::{EntryPoint, Environment, Launcher};
use crate::error::RuntimeError;
use crate::resource::ResourceSource;
use crate::vfs::MemFs;

pub const PROGRESS_FAILED: i32 = -1;
pub const PROGRESS_READY: i32 = 100;

const PROGRESS_LAUNCHING: i32 = 30;
const PROGRESS_LAUNCHED: i32 = 60;
const PROGRESS_PACKAGES: i32 = 90;

/// Bootstrap progress, readable at any time without waiting for readiness.
///
/// Starts at 0 and only moves up, except for the terminal `-1` which is
/// never left once entered.
#[derive(Debug, Default)]
pub struct Progress(AtomicI32);

impl Progress {
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.get() == PROGRESS_READY
    }

    pub fn is_failed(&self) -> bool {
        self.get() == PROGRESS_FAILED
    }

    fn advance(&self, value: i32) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != PROGRESS_FAILED && value > current).then_some(value)
            });
    }

    fn fail(&self) {
        self.0.store(PROGRESS_FAILED, Ordering::Release);
    }
}

/// Everything that exists once bootstrap has succeeded.
///
/// Callers reach it through [`Lifecycle::ready`], which hands out the
/// session behind a mutex; holding the guard is what keeps invocations
/// single-flight.
pub struct Session {
    pub fs: MemFs,
    pub capture: capture::CaptureSlot,
    /// Set once the auxiliary data slot has been written; never cleared.
    pub has_aux_data: bool,
    environment: Arc<dyn Environment>,
    tool: Arc<dyn EntryPoint>,
    test_suite: Option<Arc<dyn EntryPoint>>,
}

impl Session {
    pub fn tool(&self) -> Arc<dyn EntryPoint> {
        self.tool.clone()
    }

    pub async fn invoke(
        &mut self,
        entry: &dyn EntryPoint,
        argv: &[String],
        mode: Mode,
    ) -> Result<InvocationResult, RuntimeError> {
        capture::invoke(&self.capture, entry, &mut self.fs, argv, mode).await
    }

    /// Run `entry`, failing with the captured output unless it succeeds.
    pub async fn call_checked(
        &mut self,
        entry: &dyn EntryPoint,
        argv: &[String],
    ) -> Result<String, RuntimeError> {
        capture::capture(&self.capture, entry, &mut self.fs, argv)
            .await?
            .into_text()
    }

    /// Run `entry` and return its status with the captured output.
    pub async fn call_status(
        &mut self,
        entry: &dyn EntryPoint,
        argv: &[String],
    ) -> Result<(i32, String), RuntimeError> {
        Ok(capture::capture(&self.capture, entry, &mut self.fs, argv)
            .await?
            .into_status())
    }
}

/// One-time bootstrap of the embedded environment and the tool's resources.
///
/// The first call to [`ready`](Self::ready) runs the stages; every other
/// caller, concurrent or later, waits on that same attempt. A failure is
/// cached and handed to every waiter from then on.
pub struct Lifecycle {
    config: Arc<BridgeConfig>,
    launcher: Arc<dyn Launcher>,
    progress: Arc<Progress>,
    state: OnceCell<Result<Mutex<Session>, Arc<RuntimeError>>>,
}

impl Lifecycle {
    pub fn new(config: Arc<BridgeConfig>, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            config,
            launcher,
            progress: Arc::new(Progress::default()),
            state: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    /// Wait for bootstrap to finish, starting it if nobody has yet.
    pub async fn ready(&self) -> Result<&Mutex<Session>, RuntimeError> {
        match self.state.get_or_init(|| self.bootstrap()).await {
            Ok(session) => Ok(session),
            Err(e) => Err(RuntimeError::InitFailed(e.clone())),
        }
    }

    async fn bootstrap(&self) -> Result<Mutex<Session>, Arc<RuntimeError>> {
        match self.run_stages().await {
            Ok(session) => {
                self.progress.advance(PROGRESS_READY);
                tracing::info!("Bootstrap complete");
                Ok(Mutex::new(session))
            }
            Err(e) => {
                self.progress.fail();
                tracing::error!(error = %e, "Bootstrap failed");
                Err(Arc::new(e))
            }
        }
    }

    async fn run_stages(&self) -> Result<Session, RuntimeError> {
        let config = &self.config;

        self.progress.advance(PROGRESS_LAUNCHING);
        let environment = self.launcher.launch()?;
        self.progress.advance(PROGRESS_LAUNCHED);
        tracing::debug!("Embedded environment constructed");

        let mut fs = MemFs::new();
        fs.write(&config.slots.input, Vec::new())?;

        for package in &config.packages {
            self.unpack(&mut fs, package).await?;
        }
        self.progress.advance(PROGRESS_PACKAGES);

        self.unpack(&mut fs, &config.tool.archive).await?;
        let tool = environment.resolve(&fs, &config.tool.module)?;

        Ok(Session {
            fs,
            capture: capture::CaptureSlot::new(),
            has_aux_data: false,
            environment,
            tool,
            test_suite: None,
        })
    }

    /// The test-suite entry point, fetched and resolved on first use.
    pub async fn test_suite(
        &self,
        session: &mut Session,
    ) -> Result<Arc<dyn EntryPoint>, RuntimeError> {
        if let Some(entry) = &session.test_suite {
            return Ok(entry.clone());
        }

        let tests = &self.config.tests;
        self.unpack(&mut session.fs, &tests.archive).await?;
        let entry = session.environment.resolve(&session.fs, &tests.module)?;
        session.test_suite = Some(entry.clone());
        tracing::info!(module = %tests.module, "Test suite loaded");
        Ok(entry)
    }

    async fn unpack(&self, fs: &mut MemFs, source: &ResourceSource) -> Result<(), RuntimeError> {
        let bytes = source.fetch(self.config.base_dir.as_deref()).await?;
        let files = unpack_zip(fs, &bytes, "")?;
        tracing::info!(location = %source.location, files, "Resource unpacked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::archive::tests::zip_bytes;
    use crate::entry::{Fault, OutputSink};

    fn version(_: &mut MemFs, _: &[String], out: &mut dyn OutputSink) -> Result<i32, Fault> {
        out.stdout("shrinko8 v1.0");
        Ok(0)
    }

    /// Resolves any module whose `<module>.wasm` marker was unpacked.
    struct FakeEnvironment;

    impl Environment for FakeEnvironment {
        fn resolve(&self, fs: &MemFs, module: &str) -> Result<Arc<dyn EntryPoint>, RuntimeError> {
            fs.read(&format!("{module}.wasm"))?;
            Ok(Arc::new(version))
        }
    }

    #[derive(Default)]
    struct CountingLauncher {
        launches: AtomicUsize,
        fail: bool,
    }

    impl Launcher for CountingLauncher {
        fn launch(&self) -> Result<Arc<dyn Environment>, RuntimeError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RuntimeError::EntryPoint("no runtime".into()));
            }
            Ok(Arc::new(FakeEnvironment))
        }
    }

    fn site(dir: &std::path::Path) -> Arc<BridgeConfig> {
        std::fs::write(
            dir.join("shrinko8.zip"),
            zip_bytes(&[("shrinko8.wasm", b"tool")]),
        )
        .unwrap();
        std::fs::write(
            dir.join("shrinko8_test.zip"),
            zip_bytes(&[("run_tests.wasm", b"tests")]),
        )
        .unwrap();
        Arc::new(BridgeConfig {
            base_dir: Some(dir.to_path_buf()),
            ..BridgeConfig::default()
        })
    }

    #[test]
    fn progress_is_monotonic_until_failure() {
        let progress = Progress::default();
        assert_eq!(progress.get(), 0);
        progress.advance(60);
        progress.advance(30);
        assert_eq!(progress.get(), 60);
        progress.fail();
        progress.advance(100);
        assert_eq!(progress.get(), PROGRESS_FAILED);
    }

    #[tokio::test]
    async fn bootstrap_seeds_input_and_binds_tool() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = Arc::new(CountingLauncher::default());
        let lifecycle = Lifecycle::new(site(tmp.path()), launcher.clone());
        assert_eq!(lifecycle.progress().get(), 0);

        let session = lifecycle.ready().await.unwrap();
        let mut session = session.lock().await;

        assert_eq!(lifecycle.progress().get(), PROGRESS_READY);
        assert_eq!(session.fs.read("input.p8").unwrap(), b"");
        assert_eq!(session.fs.read("shrinko8.wasm").unwrap(), b"tool");

        let tool = session.tool();
        let text = session.call_checked(tool.as_ref(), &[]).await.unwrap();
        assert_eq!(text, "shrinko8 v1.0\n");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_bootstrap() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = Arc::new(CountingLauncher::default());
        let lifecycle = Arc::new(Lifecycle::new(site(tmp.path()), launcher.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lifecycle = lifecycle.clone();
            handles.push(tokio::spawn(async move {
                lifecycle.ready().await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert!(lifecycle.progress().is_ready());
    }

    #[tokio::test]
    async fn failure_is_terminal_and_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = Arc::new(CountingLauncher {
            fail: true,
            ..Default::default()
        });
        let lifecycle = Lifecycle::new(site(tmp.path()), launcher.clone());

        let first = lifecycle.ready().await.err().unwrap();
        let second = lifecycle.ready().await.err().unwrap();

        assert!(matches!(first, RuntimeError::InitFailed(_)));
        assert!(matches!(second, RuntimeError::InitFailed(_)));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert!(lifecycle.progress().is_failed());
    }

    #[tokio::test]
    async fn missing_archive_fails_after_launch() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(BridgeConfig {
            base_dir: Some(tmp.path().to_path_buf()),
            ..BridgeConfig::default()
        });
        let lifecycle = Lifecycle::new(config, Arc::new(CountingLauncher::default()));

        let err = lifecycle.ready().await.err().unwrap();
        assert!(err.to_string().contains("shrinko8.zip"));
        assert_eq!(lifecycle.progress().get(), PROGRESS_FAILED);
    }

    #[tokio::test]
    async fn packages_are_unpacked_before_the_tool() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("pillow.zip"),
            zip_bytes(&[("lib/PIL/__init__.py", b"")]),
        )
        .unwrap();
        let mut config = (*site(tmp.path())).clone();
        config.packages.push(ResourceSource::new("pillow.zip"));
        let lifecycle = Lifecycle::new(Arc::new(config), Arc::new(CountingLauncher::default()));

        let session = lifecycle.ready().await.unwrap().lock().await;
        assert!(session.fs.exists("lib/PIL/__init__.py"));
    }

    #[tokio::test]
    async fn test_suite_is_resolved_once() {
        let tmp = tempfile::tempdir().unwrap();
        let lifecycle = Lifecycle::new(site(tmp.path()), Arc::new(CountingLauncher::default()));
        let mut session = lifecycle.ready().await.unwrap().lock().await;

        let first = lifecycle.test_suite(&mut session).await.unwrap();
        std::fs::remove_file(tmp.path().join("shrinko8_test.zip")).unwrap();
        let second = lifecycle.test_suite(&mut session).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(session.fs.exists("run_tests.wasm"));
    }
}
