//! Compile a submission with the configured toolchain.
//!
//! The generated source and the artifact live at temporary paths owned by one
//! [`Builder::build`] call. On success the source is deleted and the artifact
//! handed to the caller inside an [`Artifact`] guard; on failure the source is
//! moved to the configured dump path for inspection.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::config::{ShellConfig, ToolchainConfig};
use crate::diagnostic::{ensure_error, parse_diagnostics, Diagnostic, Severity};
use crate::error::{Result, ShellError};
use crate::translator::translate;
use crate::watcher::{CommandSpec, ExitStatus, OutputStream, ProcessWatcher};

/// Outcome of one compiler invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildResult {
    /// Path of the produced executable, present only on success.
    pub artifact_path: Option<PathBuf>,

    /// Errors and warnings in compiler order.
    pub diagnostics: Vec<Diagnostic>,

    pub success: bool,

    /// Raw compiler exit status.
    pub compiler_status: ExitStatus,

    pub duration_ms: u64,
}

impl BuildResult {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }
}

/// A compiled executable. The file is removed when this is dropped.
#[derive(Debug)]
pub struct Artifact {
    path: TempPath,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result plus the artifact guard, when there is one.
#[derive(Debug)]
pub struct BuildOutput {
    pub result: BuildResult,
    pub artifact: Option<Artifact>,
}

/// Drives the compiler through the process watcher.
#[derive(Debug, Clone)]
pub struct Builder {
    toolchain: ToolchainConfig,
    dump_path: PathBuf,
    temp_prefix: String,
    watcher: ProcessWatcher,
}

impl Builder {
    pub fn new(config: &ShellConfig) -> Self {
        Self {
            toolchain: config.toolchain.clone(),
            dump_path: config.dump_path.clone(),
            temp_prefix: config.temp_prefix.clone(),
            watcher: ProcessWatcher::new(config.chunk_size),
        }
    }

    pub fn dump_path(&self) -> &Path {
        &self.dump_path
    }

    /// Compile `source`. Compiler failures are reported in the result; only
    /// temp-file and spawn problems are errors.
    pub async fn build(&self, source: &str) -> Result<BuildOutput> {
        let start = Instant::now();
        let unit = translate(source);

        let source_path = self.temp_path(".C").await?;
        tokio::fs::write(&source_path, unit.text.as_bytes())
            .await
            .map_err(ShellError::Workspace)?;
        let artifact_path = self.temp_path(".bin").await?;

        let spec = CommandSpec::from_argv(&self.toolchain.compiler)?
            .args(self.toolchain.flags.iter().cloned())
            .arg(source_path.to_string_lossy())
            .arg("-o")
            .arg(artifact_path.to_string_lossy())
            .envs(&self.toolchain.env);
        debug!(program = %spec.program, args = ?spec.args, "invoking compiler");

        let mut output = Vec::new();
        let mut collect = |_stream: OutputStream, chunk: &[u8]| output.extend_from_slice(chunk);
        let status = self.watcher.watch(&spec, &mut collect).await?;

        let text = String::from_utf8_lossy(&output);
        let mut diagnostics = parse_diagnostics(&text, &unit.line_map);
        let duration_ms = start.elapsed().as_millis() as u64;

        if status.success() {
            if let Err(err) = blocking(move || source_path.close()).await {
                warn!(error = %err, "failed to remove generated source");
            }
            let before = diagnostics.len();
            diagnostics.retain(|d| d.severity == Severity::Warning);
            if diagnostics.len() != before {
                debug!(dropped = before - diagnostics.len(), "ignoring errors from a successful build");
            }

            let artifact = Artifact {
                path: artifact_path,
            };
            let result = BuildResult {
                artifact_path: Some(artifact.path().to_path_buf()),
                diagnostics,
                success: true,
                compiler_status: status,
                duration_ms,
            };
            return Ok(BuildOutput {
                result,
                artifact: Some(artifact),
            });
        }

        if ensure_error(&mut diagnostics) {
            debug!(status = status.code(), "compiler failed without a parseable error");
        }
        preserve_failed_source(source_path, &self.dump_path).await;

        Ok(BuildOutput {
            result: BuildResult {
                artifact_path: None,
                diagnostics,
                success: false,
                compiler_status: status,
                duration_ms,
            },
            artifact: None,
        })
    }

    /// Create an empty temp file and keep only its path guard.
    async fn temp_path(&self, suffix: &'static str) -> Result<TempPath> {
        let prefix = self.temp_prefix.clone();
        blocking(move || {
            tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(suffix)
                .tempfile()
                .map(|file| file.into_temp_path())
        })
        .await
        .map_err(ShellError::Workspace)
    }
}

/// Run a filesystem call on the blocking pool so the reactor keeps draining
/// pipes. A panicked or cancelled call surfaces as an I/O error.
async fn blocking<T, F>(f: F) -> std::io::Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(std::io::Error::other)?
}

/// Move the generated source to `dump_path`, overwriting the previous dump.
/// Falls back to a copy when the rename crosses filesystems.
async fn preserve_failed_source(source: TempPath, dump_path: &Path) {
    if let Some(parent) = dump_path.parent() {
        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            warn!(path = %parent.display(), error = %err, "cannot create dump directory");
            return;
        }
    }

    let target = dump_path.to_path_buf();
    let persisted = tokio::task::spawn_blocking(move || source.persist(&target)).await;
    let source = match persisted {
        Ok(Ok(())) => {
            debug!(path = %dump_path.display(), "failed source preserved");
            return;
        }
        Ok(Err(err)) => err.path,
        Err(err) => {
            warn!(error = %err, "cannot preserve failed source");
            return;
        }
    };

    match tokio::fs::copy(&source, dump_path).await {
        Ok(_) => debug!(path = %dump_path.display(), "failed source copied"),
        Err(err) => warn!(path = %dump_path.display(), error = %err, "cannot preserve failed source"),
    }
}
