//! Simulated Host State Management
//!
//! Manages sessions, in-flight messages and the transaction log.

use std::collections::{HashMap, VecDeque};

use rpci_protocol::{Cookie, MessageStatus, MessageType, Register};

use super::failure::Transaction;

/// A guest-to-host message being reassembled
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Size announced by the guest
    pub expected: usize,
    /// Bytes received so far
    pub data: Vec<u8>,
}

impl Inbound {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            data: Vec::with_capacity(expected),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.expected
    }
}

/// One open channel as the host tracks it
#[derive(Debug, Clone)]
pub struct Session {
    /// Protocol number requested at open (flags stripped)
    pub protocol: u32,
    /// Whether the guest asked for a cookie
    pub cookie_requested: bool,
    pub cookie: Cookie,
    /// Message the guest is currently sending
    pub inbound: Option<Inbound>,
    /// Complete messages received from the guest, oldest first
    pub received: Vec<Vec<u8>>,
    /// Messages queued for the guest
    pub outbox: VecDeque<Vec<u8>>,
    /// Read offset into the front of `outbox` while a delivery is in progress
    pub delivery: Option<usize>,
}

impl Session {
    pub fn new(protocol: u32, cookie_requested: bool, cookie: Cookie) -> Self {
        Self {
            protocol,
            cookie_requested,
            cookie,
            inbound: None,
            received: Vec::new(),
            outbox: VecDeque::new(),
            delivery: None,
        }
    }
}

/// A served transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionRecord {
    pub transaction: Transaction,
    /// Channel id from `dx.high` (zero for open requests)
    pub channel: u16,
    /// The `bx` argument the guest passed
    pub argument: Register,
    /// Status the host answered with
    pub status: MessageStatus,
}

impl TransactionRecord {
    /// Whether this transaction was an acknowledgment sent by the guest:
    /// a `ReceiveStatus`, or a `ReceivePayload` carrying a failure status.
    pub fn acknowledgment(&self) -> Option<(MessageType, MessageStatus)> {
        let status = MessageStatus::from_raw(self.argument.low());
        match self.transaction {
            Transaction::Narrow(MessageType::ReceiveStatus) => {
                Some((MessageType::ReceiveStatus, status))
            }
            Transaction::Narrow(MessageType::ReceivePayload) if !status.is_success() => {
                Some((MessageType::ReceivePayload, status))
            }
            _ => None,
        }
    }
}

/// Simulated host state container
#[derive(Debug, Default)]
pub struct HostState {
    /// Open sessions by channel id
    pub sessions: HashMap<u16, Session>,
    /// Every transaction served, in order
    pub log: Vec<TransactionRecord>,
    /// Counter for channel ids
    id_counter: u16,
    /// Counter for cookie generation
    cookie_counter: u32,
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return its id and cookie
    pub fn open_session(&mut self, protocol: u32, cookie_requested: bool) -> (u16, Cookie) {
        let (id, cookie) = self.allocate();
        self.sessions
            .insert(id, Session::new(protocol, cookie_requested, cookie));
        (id, cookie)
    }

    /// Take the next id and cookie without registering a session
    pub fn allocate(&mut self) -> (u16, Cookie) {
        let id = self.id_counter;
        self.id_counter = self.id_counter.wrapping_add(1);
        self.cookie_counter = self.cookie_counter.wrapping_add(1);
        let cookie = Cookie::new(
            0xC0DE_0000 | self.cookie_counter,
            self.cookie_counter.rotate_left(16) ^ 0x5A5A_5A5A,
        );
        (id, cookie)
    }

    /// Look up a session, requiring the cookie to match
    pub fn session_mut(&mut self, id: u16, cookie: Cookie) -> Option<&mut Session> {
        self.sessions.get_mut(&id).filter(|s| s.cookie == cookie)
    }

    pub fn record(&mut self, record: TransactionRecord) {
        self.log.push(record);
    }
}
