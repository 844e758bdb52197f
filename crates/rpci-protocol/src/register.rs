//! Register model for backdoor transactions.
//!
//! Every slot is a 32-bit word that the protocol also addresses as two
//! 16-bit halves. The halves are views computed by shift and mask; there is
//! no aliasing of storage.

use std::fmt;

/// A 32-bit register slot.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Register(u32);

impl Register {
    /// Create a register holding `word`.
    pub const fn new(word: u32) -> Self {
        Self(word)
    }

    /// Create a register from its two halves.
    pub const fn from_halves(high: u16, low: u16) -> Self {
        Self(((high as u32) << 16) | low as u32)
    }

    /// The full 32-bit value.
    pub const fn word(self) -> u32 {
        self.0
    }

    pub fn set_word(&mut self, word: u32) {
        self.0 = word;
    }

    /// Bits 16..32.
    pub const fn high(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Replace bits 16..32, leaving the low half untouched.
    pub fn set_high(&mut self, high: u16) {
        self.0 = (self.0 & 0x0000_FFFF) | ((high as u32) << 16);
    }

    /// Bits 0..16.
    pub const fn low(self) -> u16 {
        self.0 as u16
    }

    /// Replace bits 0..16, leaving the high half untouched.
    pub fn set_low(&mut self, low: u16) {
        self.0 = (self.0 & 0xFFFF_0000) | low as u32;
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for Register {
    fn from(word: u32) -> Self {
        Self(word)
    }
}

/// The register set exchanged with the hypervisor on one trap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterFile {
    pub ax: Register,
    pub bx: Register,
    pub cx: Register,
    pub dx: Register,
    pub si: Register,
    pub di: Register,
    pub bp: Register,
}

/// Session token issued by the host when a channel is opened.
///
/// Opaque to the guest: it is stored and echoed, never interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Cookie {
    pub high: u32,
    pub low: u32,
}

impl Cookie {
    pub const fn new(high: u32, low: u32) -> Self {
        Self { high, low }
    }

    /// Both halves as one 64-bit value, high half first.
    pub const fn as_u64(self) -> u64 {
        ((self.high as u64) << 32) | self.low as u64
    }
}
