//! Embedded environment backed by Wasmtime.
//!
//! The tool ships as a WASI preview-1 command module (`<module>.wasm`) inside
//! its resource archive. Each call runs `_start` asynchronously in a fresh
//! store:
//!
//! 1. the virtual filesystem is mirrored into a scratch directory that the
//!    guest sees as `/`
//! 2. argv is the program name followed by the caller's arguments
//! 3. stdout and stderr share one memory pipe, so the captured text keeps
//!    the order the guest wrote it in; it is replayed line by line into the
//!    capture sink once the call returns
//! 4. the scratch directory is mirrored back, so files the tool wrote show up
//!    in the virtual filesystem
//!
//! `proc_exit(0)` counts as a normal return; any other `proc_exit` code is a
//! terminate request ([`Fault::Exit`]). Traps become [`Fault::Raised`].

use std::path::Path;
use std::sync::Arc;

use wasmtime::{Config, Engine, Linker, Module, Store};
use wasmtime_wasi::p2::pipe::MemoryOutputPipe;
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use crate::entry::{CallFuture, EntryPoint, Environment, Fault, Launcher, OutputSink};
use crate::error::RuntimeError;
use crate::vfs::MemFs;

const OUTPUT_CAPACITY: usize = 16 * 1024 * 1024;

/// Builds a [`WasmEnvironment`] during bootstrap.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasmLauncher;

impl Launcher for WasmLauncher {
    fn launch(&self) -> Result<Arc<dyn Environment>, RuntimeError> {
        Ok(Arc::new(WasmEnvironment::new()?))
    }
}

/// Shared Wasmtime engine and a linker wired with async WASI preview-1.
pub struct WasmEnvironment {
    engine: Engine,
    linker: Arc<Linker<WasiP1Ctx>>,
}

impl WasmEnvironment {
    pub fn new() -> anyhow::Result<Self> {
        let mut config = Config::new();
        config.async_support(true);
        let engine = Engine::new(&config)?;

        let mut linker: Linker<WasiP1Ctx> = Linker::new(&engine);
        preview1::add_to_linker_async(&mut linker, |ctx| ctx)?;

        tracing::debug!("WasmEnvironment initialized (async + WASI p1)");

        Ok(Self {
            engine,
            linker: Arc::new(linker),
        })
    }
}

impl Environment for WasmEnvironment {
    fn resolve(&self, fs: &MemFs, module: &str) -> Result<Arc<dyn EntryPoint>, RuntimeError> {
        let path = format!("{module}.wasm");
        let bytes = fs.read(&path)?;
        let compiled = Module::new(&self.engine, &bytes)
            .map_err(|e| RuntimeError::EntryPoint(format!("{path}: {e}")))?;

        tracing::info!(module, "Entry point resolved");
        Ok(Arc::new(WasmEntryPoint {
            engine: self.engine.clone(),
            linker: self.linker.clone(),
            module: compiled,
            program: module.to_string(),
        }))
    }
}

/// A compiled command module, runnable any number of times.
pub struct WasmEntryPoint {
    engine: Engine,
    linker: Arc<Linker<WasiP1Ctx>>,
    module: Module,
    program: String,
}

impl WasmEntryPoint {
    async fn run(
        &self,
        scratch: &Path,
        argv: &[String],
        output: &MemoryOutputPipe,
    ) -> anyhow::Result<()> {
        let ctx = {
            let mut builder = WasiCtxBuilder::new();
            builder
                .arg(&self.program)
                .args(argv)
                .stdout(output.clone())
                .stderr(output.clone());
            builder.preopened_dir(scratch, "/", DirPerms::all(), FilePerms::all())?;
            builder.build_p1()
        };

        let mut store = Store::new(&self.engine, ctx);
        let instance = self.linker.instantiate_async(&mut store, &self.module).await?;
        let start = instance.get_typed_func::<(), ()>(&mut store, "_start")?;
        start.call_async(&mut store, ()).await
    }
}

impl EntryPoint for WasmEntryPoint {
    fn call<'a>(
        &'a self,
        fs: &'a mut MemFs,
        argv: &'a [String],
        output: &'a mut dyn OutputSink,
    ) -> CallFuture<'a> {
        Box::pin(async move {
            let scratch = tempfile::tempdir().map_err(host_fault)?;
            fs.export_to(scratch.path()).map_err(host_fault)?;

            let pipe = MemoryOutputPipe::new(OUTPUT_CAPACITY);
            let result = self.run(scratch.path(), argv, &pipe).await;

            for line in String::from_utf8_lossy(&pipe.contents()).lines() {
                output.stdout(line);
            }

            *fs = MemFs::import_from(scratch.path()).map_err(host_fault)?;

            match result {
                Ok(()) => Ok(0),
                Err(e) => match e.downcast_ref::<I32Exit>() {
                    Some(I32Exit(0)) => Ok(0),
                    Some(I32Exit(code)) => Err(Fault::Exit(*code)),
                    None => Err(Fault::Raised(Some(format!("{e:#}")))),
                },
            }
        })
    }
}

fn host_fault(e: impl std::fmt::Display) -> Fault {
    Fault::Raised(Some(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{self, CaptureSlot, InvocationResult, Mode};

    struct Lines(Vec<String>);

    impl OutputSink for Lines {
        fn stdout(&mut self, line: &str) {
            self.0.push(line.to_string());
        }
        fn stderr(&mut self, line: &str) {
            self.0.push(line.to_string());
        }
    }

    /// Writes "hello" to stdout, then exits with `status`.
    fn greeter(status: i32) -> String {
        format!(
            r#"(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit"
    (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 32) "hello\n")
  (func (export "_start")
    (i32.store (i32.const 0) (i32.const 32))
    (i32.store (i32.const 4) (i32.const 6))
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 16)))
    (call $proc_exit (i32.const {status}))))"#
        )
    }

    /// Writes "one" to stdout, "two" to stderr, "three" to stdout.
    const INTERLEAVED: &str = r#"(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 64) "one\n")
  (data (i32.const 72) "two\n")
  (data (i32.const 80) "three\n")
  (func $write (param $fd i32) (param $ptr i32) (param $len i32)
    (i32.store (i32.const 0) (local.get $ptr))
    (i32.store (i32.const 4) (local.get $len))
    (drop (call $fd_write (local.get $fd) (i32.const 0) (i32.const 1) (i32.const 16))))
  (func (export "_start")
    (call $write (i32.const 1) (i32.const 64) (i32.const 4))
    (call $write (i32.const 2) (i32.const 72) (i32.const 4))
    (call $write (i32.const 1) (i32.const 80) (i32.const 6))))"#;

    fn resolve(fs: &mut MemFs, wat: &str) -> Arc<dyn EntryPoint> {
        fs.write("tool.wasm", wat.as_bytes().to_vec()).unwrap();
        let env = WasmEnvironment::new().unwrap();
        env.resolve(fs, "tool").unwrap()
    }

    #[tokio::test]
    async fn zero_exit_is_success_and_output_is_replayed() {
        let mut fs = MemFs::new();
        let entry = resolve(&mut fs, &greeter(0));
        let mut lines = Lines(Vec::new());

        let status = entry.call(&mut fs, &[], &mut lines).await;

        assert_eq!(status, Ok(0));
        assert_eq!(lines.0, ["hello"]);
    }

    #[tokio::test]
    async fn non_zero_exit_is_terminate_fault() {
        let mut fs = MemFs::new();
        let entry = resolve(&mut fs, &greeter(3));
        let mut lines = Lines(Vec::new());

        let status = entry.call(&mut fs, &[], &mut lines).await;

        assert_eq!(status, Err(Fault::Exit(3)));
    }

    #[tokio::test]
    async fn stdout_and_stderr_keep_emission_order() {
        let mut fs = MemFs::new();
        let entry = resolve(&mut fs, INTERLEAVED);
        let slot = CaptureSlot::new();

        let result = capture::invoke(&slot, entry.as_ref(), &mut fs, &[], Mode::ThrowOnFailure)
            .await
            .unwrap();

        assert_eq!(result, InvocationResult::Text("one\ntwo\nthree\n".into()));
    }

    #[tokio::test]
    async fn entry_point_runs_repeatedly() {
        let mut fs = MemFs::new();
        let entry = resolve(&mut fs, &greeter(0));
        let slot = CaptureSlot::new();

        for _ in 0..2 {
            let result = capture::invoke(&slot, entry.as_ref(), &mut fs, &[], Mode::ThrowOnFailure)
                .await
                .unwrap();
            assert_eq!(result, InvocationResult::Text("hello\n".into()));
        }
    }

    #[tokio::test]
    async fn trap_is_raised_fault_and_filesystem_survives() {
        let mut fs = MemFs::new();
        fs.write("input.p8", "cart").unwrap();
        let entry = resolve(&mut fs, r#"(module (func (export "_start") unreachable))"#);
        let mut lines = Lines(Vec::new());

        let result = entry
            .call(&mut fs, &["input.p8".to_string()], &mut lines)
            .await;

        assert!(matches!(result, Err(Fault::Raised(Some(_)))));
        assert_eq!(fs.read_text("input.p8").unwrap(), "cart");
    }

    #[test]
    fn missing_module_is_not_found() {
        let env = WasmEnvironment::new().unwrap();
        let err = env.resolve(&MemFs::new(), "shrinko8").err().unwrap();
        assert!(matches!(err, RuntimeError::NotFound(_)));
    }
}
