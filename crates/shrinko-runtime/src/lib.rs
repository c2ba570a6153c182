//! Execution bridge between a caller and the shrinko8 command-line tool
//! running in an embedded environment.
//!
//! The pieces, leaves first:
//!
//! - [`vfs::MemFs`]: in-process filesystem the tool reads and writes
//! - [`staging::stage`]: rebuilds the multi-file working subtree per call
//! - [`capture`]: runs the entry point once with its output captured and
//!   translates the outcome
//! - [`Lifecycle`]: one-time bootstrap that every operation waits on
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shrinko_runtime::{BridgeConfig, Lifecycle, WasmLauncher};
//!
//! # async fn run() -> Result<(), shrinko_runtime::RuntimeError> {
//! let config = Arc::new(BridgeConfig::from_file("site/config.toml".as_ref())?);
//! let lifecycle = Lifecycle::new(config, Arc::new(WasmLauncher));
//!
//! let mut session = lifecycle.ready().await?.lock().await;
//! let tool = session.tool();
//! let version = session
//!     .call_checked(tool.as_ref(), &["--version".to_string()])
//!     .await?;
//! println!("{version}");
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod capture;
pub mod config;
pub mod entry;
pub mod error;
pub mod lifecycle;
pub mod resource;
pub mod staging;
pub mod vfs;
pub mod wasm;

pub use capture::{InvocationResult, Mode, Outcome};
pub use config::{BridgeConfig, SlotPaths};
pub use entry::{EntryPoint, Environment, Fault, Launcher, OutputSink};
pub use error::RuntimeError;
pub use lifecycle::{Lifecycle, Progress, Session};
pub use staging::VirtualFile;
pub use vfs::{Encoding, FileData, MemFs};
pub use wasm::WasmLauncher;
