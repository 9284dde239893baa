// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::TriggerWhileBuildingBehaviour;

/// Configuration exactly as read from a TOML file.
///
/// ```toml
/// [watch]
/// include = ["src/**", "Cargo.toml"]
/// ignore = ["*.log"]
/// debounce = "200ms"
///
/// [build]
/// cmd = "cargo build"
/// artifact = "target/debug/api"
///
/// [process]
/// stop_timeout = "5s"
/// ```
///
/// Every section is optional; `[build]` must end up with a command and an
/// artifact (from the file or from CLI overrides) to pass validation.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub watch: WatchSection,

    #[serde(default)]
    pub build: BuildSection,

    #[serde(default)]
    pub process: ProcessSection,
}

/// `[watch]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchSection {
    /// Project root, relative to the directory holding the config file.
    #[serde(default = "default_root")]
    pub root: String,

    /// Glob patterns a path must match to count as a change. Empty means
    /// every path under the root.
    #[serde(default)]
    pub include: Vec<String>,

    /// Glob patterns that are never reported. Applied before anything is
    /// queued.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Whether the built-in ignores (`target/**`, `.git/**`, editor temp
    /// files) are added to `ignore`.
    #[serde(default = "default_true")]
    pub use_default_ignores: bool,

    /// Only report created/modified files whose contents actually changed.
    #[serde(default)]
    pub use_hash: bool,

    /// Quiet window, e.g. `"200ms"`.
    #[serde(default = "default_debounce")]
    pub debounce: String,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            include: Vec::new(),
            ignore: Vec::new(),
            use_default_ignores: true,
            use_hash: false,
            debounce: default_debounce(),
        }
    }
}

/// `[build]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSection {
    /// Shell command that builds the project.
    #[serde(default)]
    pub cmd: String,

    /// Path of the runnable artifact, relative to the project root.
    #[serde(default)]
    pub artifact: Option<String>,

    /// Regex with one capture group that extracts the artifact path from the
    /// build's stdout. Takes precedence over `artifact`.
    #[serde(default)]
    pub artifact_pattern: Option<String>,

    /// `"queue"` (default) or `"cancel"`.
    #[serde(default)]
    pub while_building: TriggerWhileBuildingBehaviour,

    /// Build once at startup without waiting for a change.
    #[serde(default = "default_true")]
    pub initial_build: bool,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            cmd: String::new(),
            artifact: None,
            artifact_pattern: None,
            while_building: TriggerWhileBuildingBehaviour::default(),
            initial_build: true,
        }
    }
}

/// `[process]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSection {
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// How long to wait after the termination signal before killing.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: String,

    /// A process that exits within this window counts as failed to start.
    #[serde(default = "default_startup_grace")]
    pub startup_grace: String,

    /// Keep the old instance serving while the next build compiles; it is
    /// stopped right before the new artifact starts.
    #[serde(default)]
    pub keep_running_during_build: bool,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            env: BTreeMap::new(),
            stop_timeout: default_stop_timeout(),
            startup_grace: default_startup_grace(),
            keep_running_during_build: false,
        }
    }
}

fn default_root() -> String {
    ".".to_string()
}

fn default_true() -> bool {
    true
}

fn default_debounce() -> String {
    "200ms".to_string()
}

fn default_stop_timeout() -> String {
    "5s".to_string()
}

fn default_startup_grace() -> String {
    "300ms".to_string()
}

/// Validated configuration. Build it through `ConfigFile::try_from`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub watch: WatchConfig,
    pub build: BuildConfig,
    pub process: ProcessConfig,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Root as written in the config; resolved against the config directory
    /// by the caller.
    pub root: PathBuf,
    pub include: Vec<String>,
    /// Effective ignore list (built-in ignores already merged in).
    pub ignore: Vec<String>,
    pub use_hash: bool,
    pub debounce: Duration,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub cmd: String,
    pub artifact: Option<PathBuf>,
    pub artifact_pattern: Option<String>,
    pub while_building: TriggerWhileBuildingBehaviour,
    pub initial_build: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub stop_timeout: Duration,
    pub startup_grace: Duration,
    pub keep_running_during_build: bool,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        watch: WatchConfig,
        build: BuildConfig,
        process: ProcessConfig,
    ) -> Self {
        Self {
            watch,
            build,
            process,
        }
    }
}
