//! Verifier adapters.
//!
//! An adapter evaluates one test vector file and reports its verdict as the
//! line `1` (valid) or `0` (invalid) on stdout. A `0` is an ordinary outcome,
//! also used for vectors that fail to parse. [`AdapterError`] is reserved for
//! the cases where no verdict was produced at all.

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::vector::TestVector;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{label}: failed to launch for {}: {source}", .path.display())]
    Launch {
        label: String,
        path: PathBuf,
        source: io::Error,
    },
    #[error("{label}: abnormal exit ({}) for {}: {stderr}", exit_label(*.code), .path.display())]
    Exit {
        label: String,
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{label}: no output for {}", .path.display())]
    NoOutput { label: String, path: PathBuf },
    #[error("{label}: timed out after {timeout:?} on {}", .path.display())]
    Timeout {
        label: String,
        path: PathBuf,
        timeout: Duration,
    },
    #[error("{label}: failed to read {}: {source}", .path.display())]
    Read {
        label: String,
        path: PathBuf,
        source: io::Error,
    },
}

fn exit_label(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |code| format!("status={code}"))
}

/// The line an adapter prints for a verdict.
pub fn verdict_line(valid: bool) -> String {
    format!("{}\n", u8::from(valid))
}

/// A verification capability. Implementations may run in process or spawn a
/// program; the executor only compares the returned text.
#[async_trait]
pub trait Verifier: Send + Sync {
    fn label(&self) -> &str;

    /// Raw verdict output for the vector stored at `vector`.
    async fn verify(&self, vector: &Path) -> Result<String, AdapterError>;
}

/// Runs `program [args..] <vector>` and captures its stdout.
///
/// Exit status 0 and 1 are the two verdicts; anything else, death by
/// signal, or empty output counts as a failed invocation.
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    label: String,
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandAdapter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        Self {
            label: program.display().to_string(),
            program,
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Arguments placed before the vector path.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Kills the program and fails the invocation after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Verifier for CommandAdapter {
    fn label(&self) -> &str {
        &self.label
    }

    async fn verify(&self, vector: &Path) -> Result<String, AdapterError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(vector)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = cmd.output();
        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, run).await.map_err(|_| {
                AdapterError::Timeout {
                    label: self.label.clone(),
                    path: vector.to_path_buf(),
                    timeout,
                }
            })?,
            None => run.await,
        }
        .map_err(|source| AdapterError::Launch {
            label: self.label.clone(),
            path: vector.to_path_buf(),
            source,
        })?;

        match output.status.code() {
            Some(0) | Some(1) => {}
            code => {
                return Err(AdapterError::Exit {
                    label: self.label.clone(),
                    path: vector.to_path_buf(),
                    code,
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                })
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(AdapterError::NoOutput {
                label: self.label.clone(),
                path: vector.to_path_buf(),
            });
        }
        debug!(verifier = %self.label, path = %vector.display(), verdict = stdout.trim(), "verified");
        Ok(stdout)
    }
}

/// Verifies vectors with a plain function call.
///
/// The file is read and parsed here; a vector that does not parse is judged
/// invalid without calling `verify`.
pub struct InProcessAdapter<F> {
    label: String,
    verify: F,
}

impl<F> InProcessAdapter<F>
where
    F: Fn(&TestVector) -> bool + Send + Sync,
{
    pub fn new(label: impl Into<String>, verify: F) -> Self {
        Self {
            label: label.into(),
            verify,
        }
    }
}

#[async_trait]
impl<F> Verifier for InProcessAdapter<F>
where
    F: Fn(&TestVector) -> bool + Send + Sync,
{
    fn label(&self) -> &str {
        &self.label
    }

    async fn verify(&self, vector: &Path) -> Result<String, AdapterError> {
        let bytes = tokio::fs::read(vector)
            .await
            .map_err(|source| AdapterError::Read {
                label: self.label.clone(),
                path: vector.to_path_buf(),
                source,
            })?;
        let valid = match TestVector::parse(&bytes) {
            Ok(parsed) => (self.verify)(&parsed),
            Err(err) => {
                debug!(verifier = %self.label, path = %vector.display(), %err, "unparseable vector");
                false
            }
        };
        Ok(verdict_line(valid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_lines_are_single_digits() {
        assert_eq!(verdict_line(true), "1\n");
        assert_eq!(verdict_line(false), "0\n");
    }

    #[tokio::test]
    async fn in_process_adapter_reports_parse_errors_as_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("garbage");
        std::fs::write(&path, "not a vector").expect("write");

        let adapter = InProcessAdapter::new("always-valid", |_: &TestVector| true);
        assert_eq!(adapter.verify(&path).await.expect("verdict"), "0\n");
    }

    #[tokio::test]
    async fn in_process_adapter_fails_on_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let adapter = InProcessAdapter::new("always-valid", |_: &TestVector| true);
        let err = adapter
            .verify(&dir.path().join("missing"))
            .await
            .expect_err("missing file");
        assert!(matches!(err, AdapterError::Read { .. }));
    }

    #[tokio::test]
    async fn command_adapter_fails_to_launch_missing_program() {
        let adapter = CommandAdapter::new("/nonexistent/consensus-fuzz-verifier");
        let err = adapter
            .verify(Path::new("vector"))
            .await
            .expect_err("missing program");
        assert!(matches!(err, AdapterError::Launch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_adapter_classifies_exit_codes() {
        let verdict = CommandAdapter::new("sh")
            .with_args(["-c", "echo 0; exit 1", "sh"])
            .verify(Path::new("vector"))
            .await
            .expect("status 1 is a verdict");
        assert_eq!(verdict, "0\n");

        let err = CommandAdapter::new("sh")
            .with_args(["-c", "echo 1; exit 3", "sh"])
            .verify(Path::new("vector"))
            .await
            .expect_err("status 3 is abnormal");
        assert!(matches!(err, AdapterError::Exit { code: Some(3), .. }));

        let err = CommandAdapter::new("sh")
            .with_args(["-c", "exit 0", "sh"])
            .verify(Path::new("vector"))
            .await
            .expect_err("silent verifier");
        assert!(matches!(err, AdapterError::NoOutput { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_adapter_times_out() {
        let err = CommandAdapter::new("sh")
            .with_args(["-c", "sleep 5", "sh"])
            .with_timeout(Some(Duration::from_millis(50)))
            .verify(Path::new("vector"))
            .await
            .expect_err("timeout");
        assert!(matches!(err, AdapterError::Timeout { .. }));
    }
}
