use thiserror::Error;

#[derive(Debug, Error)]
pub enum BorgtideError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Section '{section}' is missing required field '{field}'")]
    MissingField {
        section: String,
        field: &'static str,
    },

    #[error("Section '{section}' has an invalid '{field}': {reason}")]
    InvalidField {
        section: String,
        field: &'static str,
        reason: String,
    },
}

impl BorgtideError {
    /// Short error code used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            BorgtideError::Config(_) => "CONFIG_ERROR",
            BorgtideError::MissingField { .. } => "MISSING_FIELD",
            BorgtideError::InvalidField { .. } => "INVALID_FIELD",
        }
    }
}

pub type Result<T> = std::result::Result<T, BorgtideError>;
