//! Error types and handling for the VPN QA harness

use thiserror::Error;

/// Main error type for QA operations
#[derive(Error, Debug)]
pub enum QaError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An external program exited with a non-zero status
    #[error("Command `{program} {}` {}: {}", .args.join(" "), exit_status(.code), failure_detail(.stdout, .stderr))]
    CommandFailed {
        program: String,
        args: Vec<String>,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// An expectation about CLI output or system state did not hold
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// No internet connectivity before a test case started
    #[error("No internet connectivity: {0}")]
    NoConnectivity(String),

    /// Name resolution errors
    #[error("DNS resolution failed: {0}")]
    Resolution(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Other error: {0}")]
    Other(String),
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "was killed by a signal".to_string(),
    }
}

/// Stderr, or the last stdout line for tools like `ping` that report there
fn failure_detail(stdout: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no output")
        .to_string()
}

/// Result type alias for QA operations
pub type Result<T> = std::result::Result<T, QaError>;

/// Helper trait for converting errors to QaError
pub trait IntoQaError<T> {
    fn into_qa_error(self, context: &str) -> Result<T>;
}

impl<T, E> IntoQaError<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn into_qa_error(self, context: &str) -> Result<T> {
        self.map_err(|e| QaError::Other(format!("{context}: {e}")))
    }
}

impl From<toml::de::Error> for QaError {
    fn from(err: toml::de::Error) -> Self {
        QaError::Config(format!("TOML parsing error: {err}"))
    }
}

/// Return an [`QaError::Assertion`] when `cond` is false.
///
/// The message is built lazily so callers can embed full command output.
pub fn ensure<F>(cond: bool, message: F) -> Result<()>
where
    F: FnOnce() -> String,
{
    if cond {
        Ok(())
    } else {
        Err(QaError::Assertion(message()))
    }
}
