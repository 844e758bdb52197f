//! Channel error types.

use rpci_protocol::MessageType;

/// Errors surfaced by channel operations.
///
/// Checkpoints never appear here: they are retried inside the operation.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("could not open channel for protocol {protocol:#010x}")]
    ChannelOpenFailed { protocol: u32 },

    #[error("could not close channel {id}")]
    ChannelCloseFailed { id: u16 },

    #[error("unable to send RPCI command over channel {id}")]
    SendFailed { id: u16 },

    #[error("unable to receive RPCI command result over channel {id}: {reason}")]
    ReceiveFailed { id: u16, reason: ReceiveFailure },
}

/// Why a receive failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReceiveFailure {
    #[error("host refused the pending-message query")]
    Poll,

    #[error("payload transfer failed")]
    Transfer,

    #[error("protocol error: expected {expected} from host, got type {found:#06x}")]
    ProtocolViolation { expected: MessageType, found: u16 },
}

/// Error category, also used for process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ChannelOpen = 10,
    ChannelClose = 11,
    Send = 12,
    Receive = 13,
}

impl ChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::ChannelOpenFailed { .. } => ErrorKind::ChannelOpen,
            ChannelError::ChannelCloseFailed { .. } => ErrorKind::ChannelClose,
            ChannelError::SendFailed { .. } => ErrorKind::Send,
            ChannelError::ReceiveFailed { .. } => ErrorKind::Receive,
        }
    }

    /// Get exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.kind() as i32
    }
}

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;
