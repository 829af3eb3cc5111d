use thiserror::Error;

use crate::models::AppointmentStatus;

/// Errors surfaced by every workflow operation.
///
/// Local checks (`Validation`, and the role/ownership half of `Authorization`)
/// are raised before any request leaves the client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TriageError {
    /// Missing or malformed local input (symptoms, question text, ...)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The caller does not own the target or lacks the required role
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Appointment requested against a non-serious assessment
    #[error("Not eligible: {0}")]
    Ineligible(String),

    /// Entity unknown to the backend, typically a stale assessment id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport or backend failure, message passed through
    #[error("{0}")]
    Remote(String),

    /// Appointment is no longer in a state that allows the requested transition
    #[error("Cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    /// The same operation is already in flight
    #[error("Operation already in progress: {0}")]
    Busy(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TriageError {
    /// Human readable reason, without the category prefix.
    pub fn reason(&self) -> String {
        match self {
            Self::Validation(m)
            | Self::Authorization(m)
            | Self::Ineligible(m)
            | Self::NotFound(m)
            | Self::Remote(m)
            | Self::Busy(m)
            | Self::StepNotFound(m)
            | Self::SessionNotFound(m)
            | Self::ContextError(m)
            | Self::Config(m) => m.clone(),
            Self::InvalidTransition { .. } => self.to_string(),
        }
    }
}

impl From<serde_json::Error> for TriageError {
    fn from(e: serde_json::Error) -> Self {
        Self::ContextError(e.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TriageError {
    fn from(e: reqwest::Error) -> Self {
        Self::Remote(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;
