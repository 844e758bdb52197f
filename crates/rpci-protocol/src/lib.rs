//! RPCI Protocol Types
//!
//! Defines the register-level vocabulary shared by the guest channel and
//! anything that plays the host side of the backdoor.

pub mod error;
pub mod message;
pub mod register;

pub use error::DecodeError;
pub use message::{Command, MessageStatus, MessageType, OpenFlags};
pub use register::{Cookie, Register, RegisterFile};

/// Magic value loaded into `ax` on every backdoor trap.
pub const BACKDOOR_MAGIC: u32 = 0x564D_5868;

/// I/O port for narrow (register word) transactions.
pub const BACKDOOR_PORT: u16 = 0x5658;

/// I/O port for bulk (memory) transfers.
pub const BACKDOOR_HIGH_BANDWIDTH_PORT: u16 = 0x5659;

/// Protocol number of the RPCI command channel ("RPCI").
pub const PROTOCOL_RPCI: u32 = 0x4943_5052;

/// Protocol number of the TCLO host-to-guest channel ("TCLO").
pub const PROTOCOL_TCLO: u32 = 0x4F4C_4354;
