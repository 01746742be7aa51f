use thiserror::Error;

#[derive(Error, Debug)]
pub enum StabilityError {
    #[error("Invalid parameter: {name} = {value}, {message}")]
    InvalidParameter {
        name: String,
        value: String,
        message: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch for protein {id}: {message}")]
    DimensionMismatch { id: usize, message: String },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Tokenizer error: {0}")]
    TokenizerError(String),
}

/// Type alias for Result with StabilityError
pub type Result<T> = std::result::Result<T, StabilityError>;

impl StabilityError {
    /// Create a new InvalidParameter error
    pub fn invalid_parameter(
        name: impl Into<String>,
        value: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        StabilityError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            message: message.into(),
        }
    }

    /// Create a new DimensionMismatch error
    pub fn dimension_mismatch(id: usize, message: impl Into<String>) -> Self {
        StabilityError::DimensionMismatch {
            id,
            message: message.into(),
        }
    }
}
