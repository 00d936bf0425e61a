//! Testing utilities for linkmap-graph.
//!
//! Provides a [`ToolRunner`] that returns canned output instead of starting
//! real processes, so extraction can be exercised without a toolchain.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::process::{ProcessError, ProcessOutput, ToolRunner, display_command};

/// A mock tool runner keyed by full command line.
///
/// Command lines without a configured response succeed with empty output.
///
/// # Example
///
/// ```ignore
/// use linkmap_graph::testing::MockRunner;
///
/// let runner = MockRunner::new()
///     .with_stdout("nm --undefined-only /b/main.o", "                 U puts\n");
/// ```
#[derive(Debug, Default)]
pub struct MockRunner {
    responses: Mutex<HashMap<String, ProcessOutput>>,
    invocations: Mutex<Vec<String>>,
}

impl MockRunner {
    /// Create a runner with no configured responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `command_line` with `output`.
    pub fn with_response(self, command_line: impl Into<String>, output: ProcessOutput) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(command_line.into(), output);
        self
    }

    /// Respond to `command_line` with a successful run printing `stdout`.
    pub fn with_stdout(self, command_line: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.with_response(command_line, ProcessOutput::success(stdout))
    }

    /// All command lines run so far, in order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    /// Number of runs of `command_line`.
    pub fn count(&self, command_line: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == command_line)
            .count()
    }
}

#[async_trait]
impl ToolRunner for MockRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, ProcessError> {
        let command_line = display_command(program, args);
        self.invocations.lock().unwrap().push(command_line.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&command_line)
            .cloned()
            .unwrap_or_default())
    }
}
