//! Scripted in-process stand-in for shrinko8 and the site it is served from.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use shrinko_runtime::{
    BridgeConfig, EntryPoint, Environment, Fault, Launcher, MemFs, OutputSink, RuntimeError,
};
use shrinko_worker::BridgeHandle;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

// ── Scripted tool ────────────────────────────────────────────────────────────

fn raise(e: RuntimeError) -> Fault {
    Fault::Raised(Some(e.to_string()))
}

/// Understands the four command lines the worker builds: `--version`,
/// `<main> --list`, `<main> <input> [--cart N]` and `<input> ...`.
fn tool(fs: &mut MemFs, argv: &[String], out: &mut dyn OutputSink) -> Result<i32, Fault> {
    match argv {
        [flag] if flag == "--version" => {
            out.stdout("shrinko8 v1.2.3");
            Ok(0)
        }
        [main, flag] if flag == "--list" => {
            let text = fs.read_text(main).map_err(raise)?;
            for line in text.split('\n') {
                out.stdout(line);
            }
            Ok(0)
        }
        [main, target, rest @ ..] if main.starts_with("input.dir/") => {
            convert(fs, main, target, rest, out)
        }
        [input, rest @ ..] if input == "input.p8" => run(fs, rest, out),
        _ => {
            out.stderr("usage: shrinko8 input [output]");
            Ok(64)
        }
    }
}

fn convert(
    fs: &mut MemFs,
    main: &str,
    target: &str,
    rest: &[String],
    out: &mut dyn OutputSink,
) -> Result<i32, Fault> {
    let text = fs.read_text(main).map_err(raise)?;
    if text == "fail" {
        out.stderr("bad cart");
        return Ok(1);
    }
    let staged = fs.list("input.dir").map_err(raise)?.join(",");
    let mut converted = format!("converted {text} from {staged}");
    if let [flag, cart] = rest
        && flag == "--cart"
    {
        converted.push_str(&format!(" cart={cart}"));
    }
    fs.write(target, converted).map_err(raise)?;
    Ok(0)
}

fn run(fs: &mut MemFs, rest: &[String], out: &mut dyn OutputSink) -> Result<i32, Fault> {
    out.stdout(&format!("argv: {}", rest.join(" ")));
    let input = fs.read_text("input.p8").map_err(raise)?;
    match input.as_str() {
        "crash" => return Err(Fault::Raised(Some("boom".into()))),
        "exit3" => return Err(Fault::Exit(3)),
        "fail" => {
            out.stderr("syntax error");
            return Ok(1);
        }
        _ => {}
    }
    if rest.first().is_some_and(|arg| arg == "output.unk") {
        fs.write("output.unk", format!("OUT:{input}")).map_err(raise)?;
    }
    if let Some(at) = rest.iter().position(|arg| arg == "--extra-output") {
        fs.write(&rest[at + 1], "PREVIEW").map_err(raise)?;
    }
    Ok(0)
}

fn test_suite(_: &mut MemFs, _: &[String], out: &mut dyn OutputSink) -> Result<i32, Fault> {
    out.stdout("ran 12 tests");
    out.stdout("OK");
    Ok(0)
}

struct ScriptedEnvironment;

impl Environment for ScriptedEnvironment {
    fn resolve(&self, fs: &MemFs, module: &str) -> Result<Arc<dyn EntryPoint>, RuntimeError> {
        fs.read(&format!("{module}.wasm"))?;
        match module {
            "shrinko8" => Ok(Arc::new(tool)),
            "run_tests" => Ok(Arc::new(test_suite)),
            other => Err(RuntimeError::EntryPoint(format!("unknown module {other}"))),
        }
    }
}

struct ScriptedLauncher;

impl Launcher for ScriptedLauncher {
    fn launch(&self) -> Result<Arc<dyn Environment>, RuntimeError> {
        Ok(Arc::new(ScriptedEnvironment))
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_tests_archive(dir: &Path) {
    std::fs::write(
        dir.join("shrinko8_test.zip"),
        zip_bytes(&[("run_tests.wasm", b"tests")]),
    )
    .unwrap();
}

pub fn spawn_in(dir: &Path) -> BridgeHandle {
    let config = BridgeConfig {
        base_dir: Some(dir.to_path_buf()),
        ..BridgeConfig::default()
    };
    shrinko_worker::spawn(config, Arc::new(ScriptedLauncher))
}

/// A site with the tool archive only; the test archive is added on demand.
pub fn site() -> (TempDir, BridgeHandle) {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("shrinko8.zip"),
        zip_bytes(&[("shrinko8.wasm", b"tool")]),
    )
    .unwrap();
    let handle = spawn_in(tmp.path());
    (tmp, handle)
}
