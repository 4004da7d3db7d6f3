//! Error types and handling for logpipe

/// Result type alias for logpipe operations
pub type Result<T> = std::result::Result<T, LogpipeError>;

/// Error types for the producer-side transport core
#[derive(Debug, thiserror::Error)]
pub enum LogpipeError {
    /// Memory allocation or layout failures
    #[error("Memory error: {message}")]
    Memory { message: String },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Alignment requirements not met
    #[error("Alignment error: address {address:#x} not aligned to {alignment}")]
    Alignment { address: usize, alignment: usize },

    /// Platform-specific errors (eventfd, per-thread storage, etc.)
    #[error("Platform error: {message}")]
    Platform { message: String },
}

impl LogpipeError {
    /// Create a memory error
    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an alignment error
    pub fn alignment(address: usize, alignment: usize) -> Self {
        Self::Alignment { address, alignment }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = LogpipeError::memory("Out of memory");
        assert!(matches!(err, LogpipeError::Memory { .. }));

        let err = LogpipeError::invalid_parameter("size", "must be non-zero");
        assert!(matches!(err, LogpipeError::InvalidParameter { .. }));

        let err = LogpipeError::alignment(0x1003, 64);
        assert!(matches!(err, LogpipeError::Alignment { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = LogpipeError::memory("Test message");
        let display = format!("{}", err);
        assert!(display.contains("Memory error"));
        assert!(display.contains("Test message"));

        let err = LogpipeError::platform("eventfd creation failed");
        assert!(format!("{}", err).contains("Platform error"));
    }
}
