use thiserror::Error;

/// Errors raised by the tensor substrate and its reference operators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("Shape mismatch in operation '{operation}': expected {expected}, got {got}")]
    ShapeMismatch {
        operation: String,
        expected: String,
        got: String,
    },

    #[error("Invalid shape in operation '{operation}': {reason}")]
    InvalidShape {
        operation: String,
        reason: String,
        shape: Option<Vec<usize>>,
    },

    #[error("Invalid argument in operation '{operation}': {reason}")]
    InvalidArgument { operation: String, reason: String },

    #[error("Invalid operation '{operation}': {reason}")]
    InvalidOperation { operation: String, reason: String },

    #[error("Numerical error in operation '{operation}': {details}")]
    NumericalError { operation: String, details: String },

    #[error("Serialization error in operation '{operation}': {details}")]
    SerializationError { operation: String, details: String },

    #[error("IO error in operation '{operation}': {details}")]
    IoError {
        operation: String,
        details: String,
        path: Option<String>,
    },
}

impl TensorError {
    /// Create a shape mismatch error with context
    pub fn shape_mismatch(operation: &str, expected: &str, got: &str) -> Self {
        Self::ShapeMismatch {
            operation: operation.to_string(),
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    /// Create an invalid shape error carrying the offending shape
    pub fn invalid_shape(operation: &str, reason: &str, shape: &[usize]) -> Self {
        Self::InvalidShape {
            operation: operation.to_string(),
            reason: reason.to_string(),
            shape: Some(shape.to_vec()),
        }
    }

    pub fn invalid_shape_simple(reason: String) -> Self {
        Self::InvalidShape {
            operation: "unknown".to_string(),
            reason,
            shape: None,
        }
    }

    /// Create an invalid argument error with operation context
    pub fn invalid_argument_op(operation: &str, reason: &str) -> Self {
        Self::InvalidArgument {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_operation(operation: &str, reason: &str) -> Self {
        Self::InvalidOperation {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn numerical_error(operation: &str, details: &str) -> Self {
        Self::NumericalError {
            operation: operation.to_string(),
            details: details.to_string(),
        }
    }

    pub fn serialization_error(operation: &str, details: &str) -> Self {
        Self::SerializationError {
            operation: operation.to_string(),
            details: details.to_string(),
        }
    }

    /// Create an IO error, keeping the path that failed
    pub fn io_error(operation: &str, details: &str, path: Option<&std::path::Path>) -> Self {
        Self::IoError {
            operation: operation.to_string(),
            details: details.to_string(),
            path: path.map(|p| p.display().to_string()),
        }
    }

    /// Name of the operation that produced this error
    pub fn operation(&self) -> &str {
        match self {
            Self::ShapeMismatch { operation, .. }
            | Self::InvalidShape { operation, .. }
            | Self::InvalidArgument { operation, .. }
            | Self::InvalidOperation { operation, .. }
            | Self::NumericalError { operation, .. }
            | Self::SerializationError { operation, .. }
            | Self::IoError { operation, .. } => operation,
        }
    }
}

pub type Result<T> = std::result::Result<T, TensorError>;
