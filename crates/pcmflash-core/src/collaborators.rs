//! Logger, file-source, and cancellation collaborators (C8, §4.8, §6.1). These are purely
//! observational/ambient — the core never makes a protocol decision based on what they return,
//! except `CancellationSignal::is_cancelled`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pcmflash_protocol::Response;
use thiserror::Error;

/// Observational log sink. `user` is meant for a human operator (progress, final result);
/// `debug` is for diagnostics.
pub trait Logger: Send + Sync {
    fn user(&self, msg: &str);
    fn debug(&self, msg: &str);
}

/// Discards everything. Used by tests that don't care about log output.
pub struct NullLogger;

impl Logger for NullLogger {
    fn user(&self, _msg: &str) {}
    fn debug(&self, _msg: &str) {}
}

/// Forwards `user` to stdout and `debug` to the `tracing` `debug!` target, so both an operator
/// watching the terminal and structured logs get the message.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn user(&self, msg: &str) {
        println!("{msg}");
        tracing::info!(target: "pcmflash::user", "{msg}");
    }

    fn debug(&self, msg: &str) {
        tracing::debug!(target: "pcmflash::session", "{msg}");
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileSourceError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("path too long: {0} bytes")]
    PathTooLong(usize),
    #[error("not authorized to read {0}")]
    Unauthorized(String),
    #[error("I/O error reading {path}: {detail}")]
    Io { path: String, detail: String },
    #[error("read {got} of {expected} expected bytes from {path}")]
    Truncated { path: String, expected: u64, got: u64 },
}

/// Reads kernel/calibration binaries. Paths are resolved relative to the running executable's
/// directory, matching how a field-deployed reflashing tool ships its kernels alongside itself.
#[async_trait::async_trait]
pub trait FileSource: Send + Sync {
    async fn read_all(&self, path: &Path) -> Response<Vec<u8>>;
}

/// Resolves relative paths against `std::env::current_exe()`'s parent directory and reads with
/// `tokio::fs`.
pub struct ExecutableRelativeFileSource;

impl ExecutableRelativeFileSource {
    const MAX_PATH_LEN: usize = 4096;

    fn resolve(path: &Path) -> Result<PathBuf, FileSourceError> {
        if path.as_os_str().len() > Self::MAX_PATH_LEN {
            return Err(FileSourceError::PathTooLong(path.as_os_str().len()));
        }
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let exe = std::env::current_exe().map_err(|e| FileSourceError::Io {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(dir.join(path))
    }
}

#[async_trait::async_trait]
impl FileSource for ExecutableRelativeFileSource {
    async fn read_all(&self, path: &Path) -> Response<Vec<u8>> {
        let resolved = match Self::resolve(path) {
            Ok(p) => p,
            Err(e) => return Response::error(e.to_string()),
        };

        // Stat first so a read that comes back short of the file's reported size (the file was
        // truncated out from under us, or the filesystem handed back a partial read) is reported
        // as `Truncated` rather than silently accepted as a short kernel/calibration image.
        let expected = match tokio::fs::metadata(&resolved).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Response::error(FileSourceError::NotFound(resolved.display().to_string()).to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Response::error(FileSourceError::Unauthorized(resolved.display().to_string()).to_string())
            }
            Err(e) => {
                return Response::error(
                    FileSourceError::Io { path: resolved.display().to_string(), detail: e.to_string() }.to_string(),
                )
            }
        };

        match tokio::fs::read(&resolved).await {
            Ok(bytes) if bytes.len() as u64 == expected => Response::success(bytes),
            Ok(bytes) => Response::error(
                FileSourceError::Truncated { path: resolved.display().to_string(), expected, got: bytes.len() as u64 }
                    .to_string(),
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Response::error(FileSourceError::NotFound(resolved.display().to_string()).to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Response::error(FileSourceError::Unauthorized(resolved.display().to_string()).to_string())
            }
            Err(e) => Response::error(
                FileSourceError::Io { path: resolved.display().to_string(), detail: e.to_string() }.to_string(),
            ),
        }
    }
}

/// Cooperative cancellation signal, checked at the suspension boundaries named in §5.
pub trait CancellationSignal: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// Never cancels. Used by tests and one-shot CLI runs with no interactive cancel handler.
pub struct NeverCancelled;

impl CancellationSignal for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// `Arc<AtomicBool>`-backed cancellation signal, settable from a Ctrl-C handler.
#[derive(Clone, Default)]
pub struct AtomicCancellationToken(Arc<AtomicBool>);

impl AtomicCancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CancellationSignal for AtomicCancellationToken {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_an_absolute_path_without_resolving_against_the_executable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file_path = dir.path().join("kernel.bin");
        tokio::fs::write(&file_path, b"\x01\x02\x03").await.expect("write fixture");

        let source = ExecutableRelativeFileSource;
        let result = source.read_all(&file_path).await;
        assert_eq!(result, Response::success(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn reports_not_found_for_a_missing_absolute_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.bin");

        let source = ExecutableRelativeFileSource;
        let result = source.read_all(&missing).await;
        assert!(matches!(result, Response::Error(_)));
    }

    #[test]
    fn truncated_error_message_names_the_expected_and_actual_lengths() {
        let err = FileSourceError::Truncated { path: "/kernels/read.bin".to_string(), expected: 8, got: 3 };
        assert_eq!(err.to_string(), "read 3 of 8 expected bytes from /kernels/read.bin");
    }

    #[test]
    fn rejects_a_path_longer_than_the_limit() {
        let long = "a".repeat(ExecutableRelativeFileSource::MAX_PATH_LEN + 1);
        let err = ExecutableRelativeFileSource::resolve(Path::new(&long)).unwrap_err();
        assert!(matches!(err, FileSourceError::PathTooLong(_)));
    }
}
