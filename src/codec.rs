//! Payload word packing and transfer selection.
//!
//! Narrow transfers move at most four bytes per transaction through `bx`.
//! Words are little-endian; a short final word sits in the low-order bytes
//! and the unused high-order bytes are zero.

use rpci_protocol::{MessageStatus, Register};

/// Bytes carried by one narrow payload transaction.
pub const WORD_SIZE: usize = 4;

/// How a message payload is moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// One register word per transaction.
    Narrow,
    /// One bulk transaction for the whole payload.
    Bulk,
}

/// Choose the transfer path from the host's size-phase response.
pub fn select_transfer(status: MessageStatus, prefer_low_bandwidth: bool) -> Transfer {
    if !prefer_low_bandwidth && status.contains(MessageStatus::HIGH_BANDWIDTH) {
        Transfer::Bulk
    } else {
        Transfer::Narrow
    }
}

/// Pack up to four bytes into a register word.
pub fn pack_word(chunk: &[u8]) -> u32 {
    debug_assert!(!chunk.is_empty() && chunk.len() <= WORD_SIZE);
    let mut bytes = [0u8; WORD_SIZE];
    bytes[..chunk.len()].copy_from_slice(chunk);
    u32::from_le_bytes(bytes)
}

/// Append the bytes a received word carries to `out`, given how many bytes
/// of the message are still outstanding. Returns the number of bytes taken.
pub fn unpack_word(word: Register, remaining: usize, out: &mut Vec<u8>) -> usize {
    let low = word.low().to_le_bytes();
    match remaining {
        0 => 0,
        1 => {
            out.push(low[0]);
            1
        }
        2 => {
            out.extend_from_slice(&low);
            2
        }
        3 => {
            out.extend_from_slice(&low);
            out.push(word.high().to_le_bytes()[0]);
            3
        }
        _ => {
            out.extend_from_slice(&word.word().to_le_bytes());
            WORD_SIZE
        }
    }
}
