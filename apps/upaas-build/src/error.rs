//! CLI error handling

use std::fmt;

use upaas_errors::UserFacingError;

/// CLI-specific error type
#[derive(Debug)]
pub enum CliError {
    Config(upaas_errors::Error),
    Build(upaas_errors::Error),
    Logging(String),
    Io(std::io::Error),
}

impl CliError {
    /// Process exit code: 2 for application errors, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Build(e) if e.is_user_error() => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Configuration error: {e}"),
            CliError::Build(e) => {
                write!(f, "{}", e.user_message())?;
                if let Some(code) = e.user_code() {
                    write!(f, "\n  Code: {code}")?;
                }
                if let Some(hint) = e.user_hint() {
                    write!(f, "\n  Hint: {hint}")?;
                }
                if e.is_retryable() {
                    write!(f, "\n  Retry: safe to retry on another worker.")?;
                }
                Ok(())
            }
            CliError::Logging(msg) => write!(f, "Logging setup failed: {msg}"),
            CliError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) | CliError::Build(e) => Some(e),
            CliError::Io(e) => Some(e),
            CliError::Logging(_) => None,
        }
    }
}

impl From<upaas_errors::Error> for CliError {
    fn from(e: upaas_errors::Error) -> Self {
        CliError::Build(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Io(e.into())
    }
}
