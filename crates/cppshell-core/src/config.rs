//! Pipeline configuration.
//!
//! Every field has a default so an empty (or absent) config file yields the
//! stock `g++` setup.

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, ShellError};

/// Read size used by the process watcher.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// How the compiler is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler command: program followed by any leading arguments.
    pub compiler: Vec<String>,

    /// Flags passed before the source path.
    pub flags: Vec<String>,

    /// Environment overrides applied to the compiler process.
    pub env: BTreeMap<String, String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("LC_ALL".to_string(), "C".to_string());
        env.insert("LANG".to_string(), "C".to_string());

        Self {
            compiler: vec!["g++".to_string()],
            flags: vec!["-W".to_string(), "-Wall".to_string(), "-Wextra".to_string()],
            env,
        }
    }
}

impl ToolchainConfig {
    /// Replace the compiler command, keeping flags and environment.
    pub fn with_compiler<I, S>(mut self, compiler: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compiler = compiler.into_iter().map(Into::into).collect();
        self
    }
}

/// Top-level configuration for the build-and-run pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    pub toolchain: ToolchainConfig,

    /// Where the generated source of the last failed build is kept.
    pub dump_path: PathBuf,

    /// Maximum bytes read from a child pipe per readiness event.
    pub chunk_size: usize,

    /// Prefix for temporary sources and artifacts.
    pub temp_prefix: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            toolchain: ToolchainConfig::default(),
            dump_path: default_dump_path(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            temp_prefix: "cpp-".to_string(),
        }
    }
}

impl ShellConfig {
    /// Load a TOML config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ShellError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ShellError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn with_toolchain(mut self, toolchain: ToolchainConfig) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_dump_path(mut self, dump_path: impl Into<PathBuf>) -> Self {
        self.dump_path = dump_path.into();
        self
    }
}

/// `<cache dir>/cppshell/last-failed.cpp`, where the cache dir is
/// `$XDG_CACHE_HOME` when it is absolute, else `~/.cache`. Without a home
/// directory the system temp dir is used instead.
pub fn default_dump_path() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir)
        .join("cppshell")
        .join("last-failed.cpp")
}
