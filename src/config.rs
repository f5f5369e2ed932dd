//! Runtime configuration and directory resolution.
//!
//! The environment is resolved exactly once at startup into a [`Config`]
//! value that is threaded through the controller, scheduler gateway,
//! template engine, and state store. Nothing in the crate reads the process
//! environment after construction.

use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable overriding the work directory.
pub const WORKDIR_ENV: &str = "EXPRESSDIFF_WORKDIR";

/// Environment variable overriding the install directory.
pub const INSTALL_ENV: &str = "EXPRESSDIFF_HOME";

/// Environment variable naming the cluster scratch root.
pub const SCRATCH_ENV: &str = "SCRATCH";

/// Application directory name derived under `$SCRATCH` or `$HOME`.
const APP_DIR: &str = "expressdiff";

/// Subdirectory of the work directory holding all run directories.
pub const RUNS_DIR: &str = "runs";

/// Subdirectory of the work directory holding generated batch scripts.
pub const GENERATED_DIR: &str = "generated_slurm";

/// Subdirectory of the install directory holding stage templates.
pub const TEMPLATES_DIR: &str = "slurm_templates";

/// Shared reference location under the work directory, consulted when a run
/// has no local reference files.
pub const SHARED_REFERENCE_DIR: &str = "mapping_in";

/// Default host to bind.
const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port to bind.
const DEFAULT_PORT: u16 = 8080;

/// Default timeout for scheduler command invocations, in seconds.
const DEFAULT_SCHEDULER_TIMEOUT_SECS: u64 = 120;

/// Errors raised while resolving the runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file could not be parsed.
    #[error("failed to parse config file `{path}`: {source}")]
    Parse {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// An explicitly configured install directory does not exist.
    #[error("install directory `{0}` does not exist")]
    InstallDirMissing(PathBuf),
    /// No install directory could be determined.
    #[error("no install directory could be resolved; set {INSTALL_ENV}")]
    NoInstallDir,
    /// No work directory could be determined.
    #[error("no work directory could be resolved; set {WORKDIR_ENV}, {SCRATCH_ENV}, or HOME")]
    NoWorkDir,
    /// A required directory could not be created.
    #[error("failed to create `{path}`: {source}")]
    CreateDir {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Which source won the work directory resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// `EXPRESSDIFF_WORKDIR` or a configuration file override.
    Custom,
    /// Derived from `$SCRATCH`.
    Scratch,
    /// Derived from `$HOME`.
    Home,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::Custom => write!(f, "custom"),
            StorageType::Scratch => write!(f, "scratch"),
            StorageType::Home => write!(f, "home"),
        }
    }
}

/// On-disk configuration file contents.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    /// Server settings.
    #[serde(default)]
    pub server: ServerFileConfig,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerFileConfig,
    /// Path fallbacks, used when the environment provides nothing.
    #[serde(default)]
    pub paths: PathsFileConfig,
}

/// Server settings from the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ServerFileConfig {
    /// Host to bind to (default: `127.0.0.1`).
    pub host: Option<String>,
    /// Port to bind to (default: `8080`).
    pub port: Option<u16>,
}

/// Scheduler settings from the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SchedulerFileConfig {
    /// Timeout for scheduler command invocations, in seconds (default: `120`).
    pub timeout_secs: Option<u64>,
}

/// Path fallbacks from the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct PathsFileConfig {
    /// Install directory fallback when `EXPRESSDIFF_HOME` is unset and the
    /// executable location cannot be determined.
    pub install_dir: Option<PathBuf>,
    /// Work directory fallback, treated like a `EXPRESSDIFF_WORKDIR` override.
    pub work_dir: Option<PathBuf>,
}

impl FileConfig {
    /// Load a configuration file from the given path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The read-only install directory holding stage templates.
    pub install_dir: PathBuf,
    /// The writable work directory holding runs and generated scripts.
    pub work_dir: PathBuf,
    /// Which source won the work directory resolution.
    pub storage_type: StorageType,
    /// Host to bind the HTTP surface to.
    pub host: String,
    /// Port to bind the HTTP surface to.
    pub port: u16,
    /// Timeout applied to each scheduler command invocation.
    pub scheduler_timeout: Duration,
}

impl Config {
    /// Resolve the runtime configuration from the process environment and an
    /// optional configuration file.
    pub fn resolve(file: FileConfig) -> Result<Self, ConfigError> {
        Self::resolve_from(file, |name| env::var(name).ok(), env::current_exe().ok())
    }

    /// Resolution over an injected environment, separated for testability.
    fn resolve_from(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
        current_exe: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        // Install directory: explicit override, then the running binary's
        // parent, then the configured fallback.
        let install_dir = if let Some(dir) = env(INSTALL_ENV) {
            let dir = PathBuf::from(dir);
            if !dir.is_dir() {
                return Err(ConfigError::InstallDirMissing(dir));
            }
            dir
        } else if let Some(parent) = current_exe.as_deref().and_then(Path::parent) {
            parent.to_path_buf()
        } else if let Some(dir) = file.paths.install_dir {
            dir
        } else {
            return Err(ConfigError::NoInstallDir);
        };

        // Work directory: explicit override, then `$SCRATCH/expressdiff`,
        // then `$HOME/expressdiff`.
        let (work_dir, storage_type) = if let Some(dir) = env(WORKDIR_ENV) {
            (PathBuf::from(dir), StorageType::Custom)
        } else if let Some(dir) = file.paths.work_dir.clone() {
            (dir, StorageType::Custom)
        } else if let Some(scratch) = env(SCRATCH_ENV) {
            (PathBuf::from(scratch).join(APP_DIR), StorageType::Scratch)
        } else if let Some(home) = env("HOME") {
            (PathBuf::from(home).join(APP_DIR), StorageType::Home)
        } else {
            return Err(ConfigError::NoWorkDir);
        };

        Ok(Self {
            install_dir,
            work_dir,
            storage_type,
            host: file
                .server
                .host
                .unwrap_or_else(|| String::from(DEFAULT_HOST)),
            port: file.server.port.unwrap_or(DEFAULT_PORT),
            scheduler_timeout: Duration::from_secs(
                file.scheduler
                    .timeout_secs
                    .unwrap_or(DEFAULT_SCHEDULER_TIMEOUT_SECS),
            ),
        })
    }

    /// The directory holding all run directories.
    pub fn runs_dir(&self) -> PathBuf {
        self.work_dir.join(RUNS_DIR)
    }

    /// The directory receiving generated batch scripts.
    pub fn generated_dir(&self) -> PathBuf {
        self.work_dir.join(GENERATED_DIR)
    }

    /// The directory holding stage templates.
    pub fn templates_dir(&self) -> PathBuf {
        self.install_dir.join(TEMPLATES_DIR)
    }

    /// The shared reference location consulted after a run's own
    /// `reference/` directory.
    pub fn shared_reference_dir(&self) -> PathBuf {
        self.work_dir.join(SHARED_REFERENCE_DIR)
    }

    /// Ensure the work directory layout exists.
    pub fn ensure_layout(&self) -> Result<(), ConfigError> {
        for dir in [self.runs_dir(), self.generated_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
