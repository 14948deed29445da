/*!
Common error types for the front-end core.

Caller logic defects (malformed field descriptors, out-of-range pixel
addresses, values wider than their field) are not represented here. They
panic at the point of detection and are never clamped.
*/

use thiserror::Error;

/// Common result type used throughout the core library
pub type Result<T> = std::result::Result<T, FeError>;

/// Error type for all recoverable and fatal runtime conditions
#[derive(Error, Debug)]
pub enum FeError {
    /// A received symbol is not a valid 6b8b codeword
    #[error("Line code error: {0}")]
    LineCode(#[from] crate::sixeight::LineCodeError),

    /// I/O errors (device files, raw output stream)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The DMA transfer itself failed. The receive FIFO state is unknown
    /// afterwards, so acquisition must stop.
    #[error("DMA transfer failed at 0x{addr:08x} ({count} words): {reason}")]
    DmaFailure { addr: u32, count: usize, reason: String },

    /// A single register access failed
    #[error("Register access failed at 0x{addr:08x}: {reason}")]
    Register { addr: u32, reason: String },

    /// A bounded poll gave up
    #[error("Timed out after {polls} polls waiting for {what}")]
    Timeout { what: &'static str, polls: u32 },

    /// A received command sequence has the wrong structure
    #[error("Invalid command sequence: {0}")]
    InvalidCommand(String),

    /// Push attempted after the producer marked the clipboard finished
    #[error("Clipboard is finished, no further records accepted")]
    ClipboardFinished,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FeError {
    /// Create a new DMA failure error
    pub fn dma_failure(addr: u32, count: usize, reason: impl Into<String>) -> Self {
        Self::DmaFailure { addr, count, reason: reason.into() }
    }

    /// Create a new register access error
    pub fn register(addr: u32, reason: impl Into<String>) -> Self {
        Self::Register { addr, reason: reason.into() }
    }

    /// Create a new invalid command error
    pub fn invalid_command(msg: impl Into<String>) -> Self {
        Self::InvalidCommand(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Hardware desynchronization: the run has to terminate
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DmaFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dma_failure_is_fatal() {
        let err = FeError::dma_failure(0x1000, 64, "bus error");
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "DMA transfer failed at 0x00001000 (64 words): bus error"
        );
        assert!(!FeError::Timeout { what: "tx fifo", polls: 10 }.is_fatal());
    }
}
