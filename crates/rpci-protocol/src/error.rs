//! Error types for decoding wire values.

/// Failure to interpret a register value as a protocol element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The value is not one of the defined message types.
    #[error("unknown message type {0:#06x}")]
    UnknownMessageType(u16),
}
