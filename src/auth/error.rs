use thiserror::Error;

use crate::icloud::ICloudError;

/// Failures of the credential and two-factor phase. All of them end the run.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Failed to send a verification code to {device}: {reason}")]
    CodeDispatch { device: String, reason: String },

    #[error("Verification code rejected: {reason}")]
    CodeValidation { reason: String },

    #[error("Invalid device selection {input:?}: choose a number between 0 and {}", .available.saturating_sub(1))]
    InvalidSelection { input: String, available: usize },

    #[error("Two-factor authentication required but the account has no trusted devices")]
    NoTrustedDevices,

    #[error("Session is not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Remote(#[from] ICloudError),

    #[error("Failed to read from the terminal: {0}")]
    Prompt(#[from] std::io::Error),
}
