//! Executes the external AI task with a timeout and classifies the outcome.
//!
//! The executor runs the inference process exactly once per invocation; a
//! failed or timed-out task is reported once and the user decides whether to
//! re-invoke. Callers branch on [`TaskOutcome`] data rather than matching
//! error-message substrings.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

/// Fixed user-safe reply for a task that ran past its budget.
pub const TIMEOUT_TEXT: &str =
    "That one took too long to answer. Try asking something simpler.";

/// Fixed reply for a task that succeeded with empty output.
pub const EMPTY_OUTPUT_TEXT: &str = "(the model returned no text)";

/// Longest raw-error excerpt surfaced to users.
const DIAGNOSTIC_MAX: usize = 200;

/// Failure classification for an external task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskErrorKind {
    /// The process exceeded its wall-clock budget.
    Timeout,
    /// The process could not be run or exited unsuccessfully.
    ExternalFailure,
}

/// Classified result of one external task run.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub succeeded: bool,
    pub text: String,
    pub elapsed: Duration,
    pub error: Option<TaskErrorKind>,
}

impl TaskOutcome {
    pub fn success(text: impl Into<String>, elapsed: Duration) -> Self {
        let text = text.into();
        let text = if text.is_empty() {
            EMPTY_OUTPUT_TEXT.to_string()
        } else {
            text
        };
        Self {
            succeeded: true,
            text,
            elapsed,
            error: None,
        }
    }

    pub fn timeout(elapsed: Duration) -> Self {
        Self {
            succeeded: false,
            text: TIMEOUT_TEXT.to_string(),
            elapsed,
            error: Some(TaskErrorKind::Timeout),
        }
    }

    pub fn failure(diagnostic: &str, elapsed: Duration) -> Self {
        Self {
            succeeded: false,
            text: format!("The AI backend failed: {}", truncate(diagnostic, DIAGNOSTIC_MAX)),
            elapsed,
            error: Some(TaskErrorKind::ExternalFailure),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Runs one long external task. Trait seam so tests can inject an instant
/// runner.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run the prompt once and classify the result.
    async fn run(&self, prompt: &str) -> TaskOutcome;

    /// True when the backing model is installed and reachable.
    async fn check_model(&self) -> bool;
}

/// Runs prompts through a local `ollama` process.
pub struct OllamaExecutor {
    program: String,
    model: String,
    timeout: Duration,
}

impl OllamaExecutor {
    pub fn new(model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: "ollama".to_string(),
            model: model.into(),
            timeout,
        }
    }

    /// Override the executable invoked for `run`/`list`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TaskRunner for OllamaExecutor {
    async fn run(&self, prompt: &str) -> TaskOutcome {
        let start = Instant::now();

        // The prompt goes through as a single argv entry; no shell, no
        // quote escaping.
        let child = Command::new(&self.program)
            .arg("run")
            .arg(&self.model)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Err(_) => {
                tracing::warn!(model = %self.model, "AI task exceeded {}s budget", self.timeout.as_secs());
                return TaskOutcome::timeout(start.elapsed());
            }
            Ok(Err(e)) => {
                tracing::warn!(model = %self.model, "failed to spawn ollama: {e}");
                return TaskOutcome::failure(&e.to_string(), start.elapsed());
            }
            Ok(Ok(output)) => output,
        };

        let elapsed = start.elapsed();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(model = %self.model, status = %output.status, "ollama exited unsuccessfully");
            return TaskOutcome::failure(stderr.trim(), elapsed);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        TaskOutcome::success(stdout.trim(), elapsed)
    }

    async fn check_model(&self) -> bool {
        let listing = Command::new(&self.program)
            .arg("list")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await;
        match listing {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .to_lowercase()
                .contains(&self.model.to_lowercase()),
            _ => false,
        }
    }
}

/// Truncate on a char boundary, appending an ellipsis when shortened.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_output_is_success_with_placeholder() {
        let outcome = TaskOutcome::success("", Duration::from_secs(2));
        assert!(outcome.succeeded);
        assert_eq!(outcome.text, EMPTY_OUTPUT_TEXT);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn timeout_outcome_carries_fixed_text_and_kind() {
        let outcome = TaskOutcome::timeout(Duration::from_secs(180));
        assert!(!outcome.succeeded);
        assert_eq!(outcome.error, Some(TaskErrorKind::Timeout));
        assert_eq!(outcome.text, TIMEOUT_TEXT);
    }

    #[test]
    fn failure_outcome_truncates_the_diagnostic() {
        let long = "x".repeat(500);
        let outcome = TaskOutcome::failure(&long, Duration::from_millis(10));
        assert_eq!(outcome.error, Some(TaskErrorKind::ExternalFailure));
        assert!(outcome.text.len() < 250);
        assert!(outcome.text.ends_with("..."));
    }

    #[test]
    fn short_diagnostics_are_kept_verbatim() {
        let outcome = TaskOutcome::failure("model 'x' not found", Duration::ZERO);
        assert!(outcome.text.contains("model 'x' not found"));
        assert!(!outcome.text.ends_with("..."));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "ééééé";
        let out = truncate(s, 3);
        assert!(out.starts_with('é'));
        assert!(out.ends_with("..."));
    }

    #[cfg(unix)]
    fn executable_script(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-backend");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_classifies_a_slow_process_as_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let script = executable_script(dir.path(), "sleep 5");
        let executor = OllamaExecutor::new("any-model", Duration::from_millis(100))
            .with_program(script.to_string_lossy().into_owned());

        let outcome = executor.run("question").await;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.error, Some(TaskErrorKind::Timeout));
        assert_eq!(outcome.text, TIMEOUT_TEXT);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_classifies_an_unspawnable_program_as_external_failure() {
        let executor = OllamaExecutor::new("any-model", Duration::from_secs(5))
            .with_program("/nonexistent/chat-ai-backend");

        let outcome = executor.run("question").await;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.error, Some(TaskErrorKind::ExternalFailure));
        assert!(outcome.text.starts_with("The AI backend failed:"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_surfaces_stderr_on_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let script = executable_script(dir.path(), "echo boom >&2; exit 1");
        let executor = OllamaExecutor::new("any-model", Duration::from_secs(5))
            .with_program(script.to_string_lossy().into_owned());

        let outcome = executor.run("question").await;
        assert_eq!(outcome.error, Some(TaskErrorKind::ExternalFailure));
        assert!(outcome.text.contains("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_returns_trimmed_stdout_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let script = executable_script(dir.path(), "echo 'an answer'");
        let executor = OllamaExecutor::new("any-model", Duration::from_secs(5))
            .with_program(script.to_string_lossy().into_owned());

        let outcome = executor.run("question").await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.text, "an answer");
        assert!(outcome.error.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn check_model_matches_the_listing_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let script = executable_script(dir.path(), "echo 'NAME\nAny-Model:latest  1.1 GB'");
        let executor = OllamaExecutor::new("any-model", Duration::from_secs(5))
            .with_program(script.to_string_lossy().into_owned());
        assert!(executor.check_model().await);

        let missing = OllamaExecutor::new("any-model", Duration::from_secs(5))
            .with_program("/nonexistent/chat-ai-backend");
        assert!(!missing.check_model().await);
    }
}
