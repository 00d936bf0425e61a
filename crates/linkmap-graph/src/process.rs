//! External tool invocation.
//!
//! Every subprocess the engine starts (`nm`, `ldd`, the compiler driver)
//! goes through a [`ToolRunner`], so tests can substitute canned output.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Errors that can occur while starting an external tool.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code (0 = success, -1 if killed by a signal).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl ProcessOutput {
    /// Successful output with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// The reportable summary of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub command_line: String,
    pub exit_code: i32,
    pub stderr: String,
}

impl ProcessResult {
    /// Summarize a finished invocation.
    pub fn new(command_line: impl Into<String>, output: &ProcessOutput) -> Self {
        Self {
            command_line: command_line.into(),
            exit_code: output.exit_code,
            stderr: output.stderr.clone(),
        }
    }

    /// A non-zero exit or anything on stderr.
    pub fn is_failure(&self) -> bool {
        self.exit_code != 0 || !self.stderr.trim().is_empty()
    }
}

impl std::fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}` exited with {}", self.command_line, self.exit_code)?;
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}

/// Runs external tools to completion.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args` and capture its output.
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, ProcessError>;
}

/// Thread-safe runner reference.
pub type SharedRunner = Arc<dyn ToolRunner>;

/// Format an invocation for logs and reports.
pub fn display_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Runs tools as real subprocesses.
///
/// No timeout is applied: a tool that never exits blocks its caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a shared instance.
    pub fn shared() -> SharedRunner {
        Arc::new(Self)
    }
}

#[async_trait]
impl ToolRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, ProcessError> {
        // output() drains stdout and stderr concurrently
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                command: display_command(program, args),
                source,
            })?;

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
