use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::RuntimeError;
use crate::resource::ResourceSource;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub slots: SlotPaths,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub tests: TestSuiteConfig,
    /// Extra archives unpacked before the tool's own resources.
    #[serde(default)]
    pub packages: Vec<ResourceSource>,
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Directory relative resource paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

/// Fixed file locations inside the virtual filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SlotPaths {
    #[serde(default = "default_input")]
    pub input: String,
    #[serde(default = "default_output")]
    pub output: String,
    #[serde(default = "default_preview")]
    pub preview: String,
    #[serde(default = "default_script")]
    pub script: String,
    #[serde(default = "default_aux_data")]
    pub aux_data: String,
    #[serde(default = "default_working_root")]
    pub working_root: String,
}

fn default_input() -> String {
    "input.p8".into()
}
fn default_output() -> String {
    "output.unk".into()
}
fn default_preview() -> String {
    "preview.p8".into()
}
fn default_script() -> String {
    "script.py".into()
}
fn default_aux_data() -> String {
    "pico8.dat".into()
}
fn default_working_root() -> String {
    "input.dir".into()
}

impl Default for SlotPaths {
    fn default() -> Self {
        Self {
            input: default_input(),
            output: default_output(),
            preview: default_preview(),
            script: default_script(),
            aux_data: default_aux_data(),
            working_root: default_working_root(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_tool_archive")]
    pub archive: ResourceSource,
    /// Module name the entry point is resolved from.
    #[serde(default = "default_tool_module")]
    pub module: String,
}

fn default_tool_archive() -> ResourceSource {
    ResourceSource::new("shrinko8.zip")
}
fn default_tool_module() -> String {
    "shrinko8".into()
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            archive: default_tool_archive(),
            module: default_tool_module(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestSuiteConfig {
    #[serde(default = "default_tests_archive")]
    pub archive: ResourceSource,
    #[serde(default = "default_tests_module")]
    pub module: String,
}

fn default_tests_archive() -> ResourceSource {
    ResourceSource::new("shrinko8_test.zip")
}
fn default_tests_module() -> String {
    "run_tests".into()
}

impl Default for TestSuiteConfig {
    fn default() -> Self {
        Self {
            archive: default_tests_archive(),
            module: default_tests_module(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerConfig {
    /// Requests that may wait in the queue before senders are back-pressured.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_queue_depth() -> usize {
    64
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
        }
    }
}

impl BridgeConfig {
    /// Default config location: ~/.shrinko/config.toml
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shrinko")
            .join("config.toml")
    }

    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, RuntimeError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RuntimeError::Config(format!("Failed to parse config: {e}")))?;
        config.slots.validate()?;
        Ok(config)
    }
}

impl SlotPaths {
    /// Every slot must be a single name at the root of the filesystem.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        let slots = [
            ("input", &self.input),
            ("output", &self.output),
            ("preview", &self.preview),
            ("script", &self.script),
            ("aux_data", &self.aux_data),
            ("working_root", &self.working_root),
        ];
        for (key, name) in slots {
            if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
                return Err(RuntimeError::Config(format!(
                    "slots.{key} must be a plain file name, got {name:?}"
                )));
            }
        }
        Ok(())
    }
}
