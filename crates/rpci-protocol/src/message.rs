//! Message types, status bits and backdoor commands.

use std::fmt;

use crate::error::DecodeError;

/// Tag carried in `cx.high` of every narrow transaction and echoed by the
/// host in `dx.high` of the response.
///
/// Size announcements travel in both directions: `SendSize` announces an
/// outgoing message, `ReceiveSize` asks the host for the size of a pending
/// one (and the host answers with `SendSize`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    Open = 0,
    SendSize = 1,
    SendPayload = 2,
    ReceiveSize = 3,
    ReceivePayload = 4,
    ReceiveStatus = 5,
    Close = 6,
}

impl MessageType {
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Open => "open",
            MessageType::SendSize => "send_size",
            MessageType::SendPayload => "send_payload",
            MessageType::ReceiveSize => "receive_size",
            MessageType::ReceivePayload => "receive_payload",
            MessageType::ReceiveStatus => "receive_status",
            MessageType::Close => "close",
        }
    }
}

impl TryFrom<u16> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageType::Open,
            1 => MessageType::SendSize,
            2 => MessageType::SendPayload,
            3 => MessageType::ReceiveSize,
            4 => MessageType::ReceivePayload,
            5 => MessageType::ReceiveStatus,
            6 => MessageType::Close,
            other => return Err(DecodeError::UnknownMessageType(other)),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags::bitflags! {
    /// Status bits returned by the host (narrow: `cx.high`, bulk: `bx.high`).
    ///
    /// The guest also uses `SUCCESS` / `FAIL` as the status argument of
    /// acknowledgments.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MessageStatus: u16 {
        const SUCCESS = 0x0001;
        /// The host has a message pending for this channel.
        const DO_RECEIVE = 0x0002;
        /// A checkpoint happened during the transaction; retry.
        const CHECKPOINT = 0x0010;
        /// The host chose the bulk transfer path for this message.
        const HIGH_BANDWIDTH = 0x0080;
    }
}

impl MessageStatus {
    /// No bits set.
    pub const FAIL: Self = Self::empty();

    /// Interpret a raw half-register, keeping bits this crate does not name.
    pub const fn from_raw(raw: u16) -> Self {
        Self::from_bits_retain(raw)
    }

    pub const fn is_success(self) -> bool {
        self.contains(Self::SUCCESS)
    }
}

bitflags::bitflags! {
    /// Capability flags OR-ed into the protocol number of an Open request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Ask the host to issue a session cookie.
        const COOKIE = 0x8000_0000;
    }
}

/// Backdoor command numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    /// Bulk transfer (in `bx.low` on the high-bandwidth port).
    HighBandwidthMessage = 0x00,
    /// Narrow RPCI transaction (in `cx.low` on the low-bandwidth port).
    Message = 0x1E,
}

impl Command {
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}
