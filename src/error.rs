use thiserror::Error;

/// Result type alias for H8D operations
pub type Result<T> = std::result::Result<T, H8dError>;

/// Errors that can occur when working with H8D images or the disk imager link
#[derive(Debug, Error)]
pub enum H8dError {
    /// I/O error occurred while reading or writing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Buffer is too small for the structure being parsed
    #[error("Buffer too short: need {needed} bytes, have {actual}")]
    BufferTooShort {
        /// Bytes required
        needed: usize,
        /// Bytes available
        actual: usize,
    },

    /// Directory or allocation table is inconsistent
    #[error("Directory corrupt: {0}")]
    DirectoryCorrupt(String),

    /// The client replied with an unexpected byte
    #[error("Protocol mismatch: expected {expected:#04X}, got {actual:#04X}")]
    ProtocolMismatch {
        /// Byte the host was waiting for
        expected: u8,
        /// Byte actually received
        actual: u8,
    },

    /// Serial port could not be opened
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    /// Image geometry does not fit the selected drive
    #[error("Geometry mismatch: {0}")]
    GeometryMismatch(String),

    /// Operation was cancelled by the operator
    #[error("Transfer aborted")]
    Aborted,

    /// Bounded wait expired without a reply
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Invalid or unrecognized image format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// File not found in a volume directory
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Operation not supported for this image or session
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl H8dError {
    /// Create a buffer-too-short error
    pub fn too_short(needed: usize, actual: usize) -> Self {
        H8dError::BufferTooShort { needed, actual }
    }

    /// Create a directory corruption error
    pub fn corrupt<S: Into<String>>(message: S) -> Self {
        H8dError::DirectoryCorrupt(message.into())
    }

    /// Create an invalid format error
    pub fn invalid_format<S: Into<String>>(message: S) -> Self {
        H8dError::InvalidFormat(message.into())
    }

    /// Create a protocol mismatch error
    pub fn mismatch(expected: u8, actual: u8) -> Self {
        H8dError::ProtocolMismatch { expected, actual }
    }

    /// True for errors after which the serial session must reconnect
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, H8dError::PortUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = H8dError::too_short(0x980, 16);
        assert_eq!(err.to_string(), "Buffer too short: need 2432 bytes, have 16");
    }

    #[test]
    fn test_mismatch_display() {
        let err = H8dError::mismatch(b'R', b'?');
        assert_eq!(
            err.to_string(),
            "Protocol mismatch: expected 0x52, got 0x3F"
        );
    }

    #[test]
    fn test_fatal_to_session() {
        assert!(H8dError::PortUnavailable("COM9".into()).is_fatal_to_session());
        assert!(!H8dError::mismatch(b'Q', b'?').is_fatal_to_session());
        assert!(!H8dError::Aborted.is_fatal_to_session());
    }
}
