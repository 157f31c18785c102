//! Error taxonomy for the console core.
//!
//! Every fallible operation funnels into [`ConsoleError`]. The variants
//! encode how the caller should react: validation and auth failures never
//! touched any state, while conflict and transport failures mean the
//! remote write did not land and any optimistic local change was rolled
//! back before the error was returned.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsoleError {
    /// The request was malformed before any remote call was attempted.
    #[error("{0}")]
    Validation(String),
    /// The control plane answered and refused the change.
    #[error("{0}")]
    Conflict(String),
    /// The control plane could not be reached or gave a non-answer.
    #[error("{0}")]
    Transport(String),
    /// Administrator credentials were rejected.
    #[error("{0}")]
    Auth(String),
}

impl ConsoleError {
    pub fn unknown_feature(name: &str) -> Self {
        ConsoleError::Validation(format!("unrecognized feature '{name}'"))
    }
}

/// How prominently a message should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A user-facing result of an operation: a message plus how to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub success: bool,
    pub severity: Severity,
    pub message: String,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Outcome {
            success: true,
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Outcome {
            success: true,
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl From<&ConsoleError> for Outcome {
    fn from(err: &ConsoleError) -> Self {
        Outcome {
            success: false,
            severity: Severity::Error,
            message: err.to_string(),
        }
    }
}

impl From<vantage_api::Error> for ConsoleError {
    fn from(err: vantage_api::Error) -> Self {
        match err {
            vantage_api::Error::Rejected(message) => ConsoleError::Conflict(message),
            vantage_api::Error::HttpError(status) => {
                ConsoleError::Transport(format!("control plane returned HTTP {status}"))
            }
            vantage_api::Error::ReqwestError(err) => {
                tracing::debug!("transport failure: {err}");
                ConsoleError::Transport("could not reach the control plane".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_surface_as_failed_error_outcomes() {
        let err = ConsoleError::Conflict("agent refused".to_string());
        let outcome = Outcome::from(&err);
        assert!(!outcome.success);
        assert_eq!(outcome.severity, Severity::Error);
        assert_eq!(outcome.message, "agent refused");

        let err = ConsoleError::unknown_feature("Time Travel");
        assert_eq!(
            Outcome::from(&err).message,
            "unrecognized feature 'Time Travel'"
        );
    }
}
