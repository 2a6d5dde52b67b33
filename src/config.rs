//! Settings for the controller and the external tools it drives.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `CELLCOMP` (nested keys separated by
//! `__`, e.g. `CELLCOMP_CODEGEN__EXECUTABLE`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::Result;

pub const ENV_PREFIX: &str = "CELLCOMP";
pub const DEFAULT_CONFIG_FILE: &str = "cellcomp.toml";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where built modules are placed and loaded from.
    pub storage_root: PathBuf,
    /// Threaded into the build descriptor of every module.
    pub include_directory: PathBuf,
    /// Extension of schema-language source files.
    pub schema_extension: String,
    /// Extension of built artifacts, the platform's dynamic library extension when unset.
    pub artifact_extension: Option<String>,
    pub tool_timeout_secs: Option<u64>,
    pub codegen: ToolSettings,
    pub build: ToolSettings,
    pub capacity: CapacityHints,
    /// Modules the host binary loads on startup, in order.
    pub modules: Vec<ModuleSource>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("storage"),
            include_directory: PathBuf::from("."),
            schema_extension: String::from("tsl"),
            artifact_extension: None,
            tool_timeout_secs: None,
            codegen: ToolSettings::codegen(),
            build: ToolSettings::build(),
            capacity: CapacityHints::default(),
            modules: Vec::new(),
        }
    }
}

impl Settings {
    /// Reads `path` when it exists and applies environment overrides on top.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
    pub fn artifact_extension(&self) -> &str {
        self.artifact_extension
            .as_deref()
            .unwrap_or(std::env::consts::DLL_EXTENSION)
    }
    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }
}

/// An external executable together with its argument template. An empty
/// template falls back to the tool's default one.
#[derive(Clone, Debug, Deserialize)]
pub struct ToolSettings {
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolSettings {
    pub fn codegen() -> Self {
        Self {
            executable: PathBuf::from("cellcomp-codegen"),
            args: ["{sources}", "-offset", "{offset}", "-n", "{namespace}", "-o", "{output_dir}"]
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
        }
    }
    pub fn build() -> Self {
        Self {
            executable: PathBuf::from("cellcomp-build"),
            args: ["build", "{build_dir}", "-o", "{output_dir}"]
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
        }
    }
}

// Only used to size the catalog up front.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct CapacityHints {
    pub avg_modules: usize,
    pub avg_cells: usize,
    pub avg_fields: usize,
}

impl Default for CapacityHints {
    fn default() -> Self {
        Self {
            avg_modules: 100,
            avg_cells: 10,
            avg_fields: 3,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModuleSource {
    pub name: String,
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub version: Option<String>,
}
