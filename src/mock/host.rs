//! Simulated Host Implementation
//!
//! Plays the hypervisor side of the RPCI channel in-process, so the channel
//! can be exercised without a trap.

use std::sync::{Arc, Mutex};

use rpci_protocol::{
    Command, Cookie, MessageStatus, MessageType, OpenFlags, RegisterFile,
};

use crate::backdoor::Backdoor;
use crate::codec::{pack_word, WORD_SIZE};

use super::failure::{FailureConfig, FailureInjector, Fault, Transaction};
use super::state::{HostState, Inbound, Session, TransactionRecord};

/// Service behind the channel: maps each complete guest message to an
/// optional reply, which is queued for the same channel.
pub type Responder = Box<dyn FnMut(u16, &[u8]) -> Option<Vec<u8>> + Send>;

/// Configurable capabilities for the simulated host
#[derive(Debug, Clone)]
pub struct HostCapabilities {
    /// Offer the bulk transfer path on size announcements
    pub high_bandwidth: bool,
    /// Accept Open requests that carry the cookie flag
    pub accept_cookie_flag: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self {
            high_bandwidth: true,
            accept_cookie_flag: true,
        }
    }
}

/// Register values the host writes back on a narrow transaction.
struct Answer {
    status: MessageStatus,
    echo: Option<u16>,
    value: Option<u32>,
    session: Option<(u16, Cookie)>,
}

impl Answer {
    fn status(status: MessageStatus) -> Self {
        Self {
            status,
            echo: None,
            value: None,
            session: None,
        }
    }

    fn ok() -> Self {
        Self::status(MessageStatus::SUCCESS)
    }

    fn fail() -> Self {
        Self::status(MessageStatus::FAIL)
    }

    fn apply(&self, out: &mut RegisterFile) {
        out.cx.set_high(self.status.bits());
        if let Some(echo) = self.echo {
            out.dx.set_high(echo);
        }
        if let Some(value) = self.value {
            out.bx.set_word(value);
        }
        if let Some((id, cookie)) = self.session {
            out.dx.set_high(id);
            out.si.set_word(cookie.high);
            out.di.set_word(cookie.low);
        }
    }
}

/// Configurable simulated host for testing
///
/// Cloning yields another handle to the same host, so several channels can
/// share it.
#[derive(Clone)]
pub struct SimulatedHost {
    /// Mutable state (wrapped for interior mutability)
    state: Arc<Mutex<HostState>>,
    /// Fault injector
    failures: Arc<Mutex<FailureInjector>>,
    /// Configurable capabilities
    capabilities: Arc<Mutex<HostCapabilities>>,
    /// Service answering guest messages
    responder: Arc<Mutex<Responder>>,
}

impl SimulatedHost {
    /// Create a host with default capabilities that echoes every message
    pub fn new() -> Self {
        Self::with_capabilities(HostCapabilities::default())
    }

    pub fn with_capabilities(capabilities: HostCapabilities) -> Self {
        let echo: Responder = Box::new(|_, message| Some(message.to_vec()));
        Self {
            state: Arc::new(Mutex::new(HostState::new())),
            failures: Arc::new(Mutex::new(FailureInjector::new())),
            capabilities: Arc::new(Mutex::new(capabilities)),
            responder: Arc::new(Mutex::new(echo)),
        }
    }

    // === Public API for test configuration ===

    pub fn set_high_bandwidth(&self, enabled: bool) {
        self.capabilities.lock().unwrap().high_bandwidth = enabled;
    }

    pub fn set_accept_cookie_flag(&self, accept: bool) {
        self.capabilities.lock().unwrap().accept_cookie_flag = accept;
    }

    /// Replace the service answering guest messages
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(u16, &[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        *self.responder.lock().unwrap() = Box::new(responder);
    }

    /// Inject a fault configuration for a transaction kind
    pub fn inject_failure(&self, transaction: Transaction, config: FailureConfig) {
        self.failures.lock().unwrap().inject(transaction, config);
    }

    /// Clear all fault injections
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Queue a message for delivery to a channel. Returns false if the
    /// channel is not open.
    pub fn queue_message(&self, id: u16, message: Vec<u8>) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.sessions.get_mut(&id) {
            Some(session) => {
                session.outbox.push_back(message);
                true
            }
            None => false,
        }
    }

    // === Inspection for test assertions ===

    /// Every transaction served so far
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.state.lock().unwrap().log.clone()
    }

    /// Number of served transactions of one kind
    pub fn count(&self, transaction: Transaction) -> usize {
        let state = self.state.lock().unwrap();
        state
            .log
            .iter()
            .filter(|r| r.transaction == transaction)
            .count()
    }

    /// Number of served transactions of any kind
    pub fn total_transactions(&self) -> usize {
        self.state.lock().unwrap().log.len()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    /// Acknowledgments the guest sent, in order
    pub fn acknowledgments(&self) -> Vec<(MessageType, MessageStatus)> {
        let state = self.state.lock().unwrap();
        state.log.iter().filter_map(|r| r.acknowledgment()).collect()
    }

    /// Complete messages the host received on a channel
    pub fn received(&self, id: u16) -> Vec<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(&id)
            .map(|s| s.received.clone())
            .unwrap_or_default()
    }

    /// Messages still queued for a channel
    pub fn pending(&self, id: u16) -> usize {
        let state = self.state.lock().unwrap();
        state.sessions.get(&id).map_or(0, |s| s.outbox.len())
    }

    pub fn session_cookie(&self, id: u16) -> Option<Cookie> {
        let state = self.state.lock().unwrap();
        state.sessions.get(&id).map(|s| s.cookie)
    }

    /// Whether the session was opened with the cookie flag
    pub fn cookie_requested(&self, id: u16) -> Option<bool> {
        let state = self.state.lock().unwrap();
        state.sessions.get(&id).map(|s| s.cookie_requested)
    }

    pub fn session_protocol(&self, id: u16) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state.sessions.get(&id).map(|s| s.protocol)
    }

    pub fn is_open(&self, id: u16) -> bool {
        self.state.lock().unwrap().sessions.contains_key(&id)
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    // === Internal helpers ===

    fn check_failure(&self, transaction: &Transaction) -> Option<Fault> {
        self.failures.lock().unwrap().check(transaction)
    }

    fn high_bandwidth_bit(&self) -> MessageStatus {
        if self.capabilities.lock().unwrap().high_bandwidth {
            MessageStatus::HIGH_BANDWIDTH
        } else {
            MessageStatus::empty()
        }
    }

    /// Hand a complete guest message to the responder and queue its reply
    fn deliver(&self, id: u16, session: &mut Session, message: Vec<u8>) {
        let mut responder = self.responder.lock().unwrap();
        let reply = (*responder)(id, &message);
        session.received.push(message);
        if let Some(reply) = reply {
            session.outbox.push_back(reply);
        }
    }

    // === Transaction handlers ===

    fn serve(&self, state: &mut HostState, ty: MessageType, regs: &RegisterFile) -> Answer {
        let id = regs.dx.high();
        let cookie = Cookie::new(regs.si.word(), regs.di.word());

        match ty {
            MessageType::Open => self.serve_open(state, regs.bx.word()),
            MessageType::Close => {
                if state.session_mut(id, cookie).is_none() {
                    return Answer::fail();
                }
                state.sessions.remove(&id);
                Answer::ok()
            }
            _ => match state.session_mut(id, cookie) {
                Some(session) => self.serve_session(id, session, ty, regs),
                None => Answer::fail(),
            },
        }
    }

    fn serve_open(&self, state: &mut HostState, request: u32) -> Answer {
        let cookie_requested = OpenFlags::from_bits_truncate(request).contains(OpenFlags::COOKIE);
        let protocol = request & !OpenFlags::COOKIE.bits();

        if cookie_requested && !self.capabilities.lock().unwrap().accept_cookie_flag {
            // The refusal still consumes an id and cookie, and leaves them in
            // the registers
            return Answer {
                session: Some(state.allocate()),
                ..Answer::fail()
            };
        }

        let (id, cookie) = state.open_session(protocol, cookie_requested);
        Answer {
            session: Some((id, cookie)),
            ..Answer::ok()
        }
    }

    fn serve_session(
        &self,
        id: u16,
        session: &mut Session,
        ty: MessageType,
        regs: &RegisterFile,
    ) -> Answer {
        match ty {
            MessageType::SendSize => {
                let expected = regs.bx.word() as usize;
                if expected == 0 {
                    session.inbound = None;
                    self.deliver(id, session, Vec::new());
                } else {
                    session.inbound = Some(Inbound::new(expected));
                }
                Answer::status(MessageStatus::SUCCESS | self.high_bandwidth_bit())
            }
            MessageType::SendPayload => {
                let Some(inbound) = session.inbound.as_mut() else {
                    return Answer::fail();
                };
                let take = (inbound.expected - inbound.data.len()).min(WORD_SIZE);
                inbound
                    .data
                    .extend_from_slice(&regs.bx.word().to_le_bytes()[..take]);
                if inbound.is_complete() {
                    if let Some(done) = session.inbound.take() {
                        self.deliver(id, session, done.data);
                    }
                }
                Answer::ok()
            }
            MessageType::ReceiveSize => match session.outbox.front().map(Vec::len) {
                Some(size) => {
                    session.delivery = Some(0);
                    Answer {
                        status: MessageStatus::SUCCESS
                            | MessageStatus::DO_RECEIVE
                            | self.high_bandwidth_bit(),
                        echo: Some(MessageType::SendSize.as_u16()),
                        value: Some(size as u32),
                        session: None,
                    }
                }
                None => {
                    session.delivery = None;
                    Answer::ok()
                }
            },
            MessageType::ReceivePayload => {
                if !MessageStatus::from_raw(regs.bx.low()).is_success() {
                    // Guest reports a failed reception; the message stays queued
                    session.delivery = None;
                    return Answer::ok();
                }
                let (Some(offset), Some(message)) = (session.delivery, session.outbox.front())
                else {
                    return Answer::fail();
                };
                if offset >= message.len() {
                    return Answer::fail();
                }
                let end = (offset + WORD_SIZE).min(message.len());
                let word = pack_word(&message[offset..end]);
                session.delivery = Some(end);
                Answer {
                    status: MessageStatus::SUCCESS,
                    echo: Some(MessageType::SendPayload.as_u16()),
                    value: Some(word),
                    session: None,
                }
            }
            MessageType::ReceiveStatus => {
                let delivered = match (session.delivery, session.outbox.front()) {
                    (Some(offset), Some(message)) => offset >= message.len(),
                    _ => false,
                };
                if delivered && MessageStatus::from_raw(regs.bx.low()).is_success() {
                    session.outbox.pop_front();
                }
                session.delivery = None;
                Answer::ok()
            }
            MessageType::Open | MessageType::Close => Answer::fail(),
        }
    }

    fn serve_bulk_out(
        &self,
        state: &mut HostState,
        regs: &RegisterFile,
        buf: &[u8],
    ) -> MessageStatus {
        if regs.bx.low() != Command::HighBandwidthMessage.as_u16()
            || regs.cx.word() as usize != buf.len()
        {
            return MessageStatus::FAIL;
        }
        let id = regs.dx.high();
        let cookie = Cookie::new(regs.bp.word(), regs.di.word());
        let Some(session) = state.session_mut(id, cookie) else {
            return MessageStatus::FAIL;
        };

        match session.inbound.take() {
            Some(inbound) if inbound.expected == buf.len() && inbound.data.is_empty() => {
                self.deliver(id, session, buf.to_vec());
                MessageStatus::SUCCESS
            }
            other => {
                session.inbound = other;
                MessageStatus::FAIL
            }
        }
    }

    fn serve_bulk_in(
        &self,
        state: &mut HostState,
        regs: &RegisterFile,
        buf: &mut [u8],
    ) -> MessageStatus {
        if regs.bx.low() != Command::HighBandwidthMessage.as_u16()
            || regs.cx.word() as usize != buf.len()
        {
            return MessageStatus::FAIL;
        }
        let id = regs.dx.high();
        let cookie = Cookie::new(regs.si.word(), regs.bp.word());
        let Some(session) = state.session_mut(id, cookie) else {
            return MessageStatus::FAIL;
        };

        let (Some(0), Some(message)) = (session.delivery, session.outbox.front()) else {
            return MessageStatus::FAIL;
        };
        if message.len() != buf.len() {
            return MessageStatus::FAIL;
        }
        buf.copy_from_slice(message);
        session.delivery = Some(buf.len());
        MessageStatus::SUCCESS
    }

    fn bulk_status(&self, fault: Option<Fault>, serve: impl FnOnce() -> MessageStatus) -> MessageStatus {
        match fault {
            Some(Fault::Fail) => MessageStatus::FAIL,
            Some(Fault::Checkpoint) => MessageStatus::CHECKPOINT,
            Some(Fault::Echo(_)) | None => serve(),
        }
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Backdoor for SimulatedHost {
    fn in_out(&self, regs: RegisterFile) -> RegisterFile {
        let mut out = regs;
        let ty = match MessageType::try_from(regs.cx.high()) {
            Ok(ty) if regs.cx.low() == Command::Message.as_u16() => ty,
            _ => {
                Answer::fail().apply(&mut out);
                return out;
            }
        };

        let transaction = Transaction::Narrow(ty);
        let fault = self.check_failure(&transaction);
        let mut state = self.state.lock().unwrap();
        let answer = match fault {
            Some(Fault::Fail) => Answer::fail(),
            Some(Fault::Checkpoint) => Answer::status(MessageStatus::CHECKPOINT),
            Some(Fault::Echo(echo)) => Answer {
                echo: Some(echo.as_u16()),
                ..self.serve(&mut state, ty, &regs)
            },
            None => self.serve(&mut state, ty, &regs),
        };

        let channel = match answer.session {
            Some((id, _)) => id,
            None if ty == MessageType::Open => 0,
            None => regs.dx.high(),
        };
        state.record(TransactionRecord {
            transaction,
            channel,
            argument: regs.bx,
            status: answer.status,
        });

        answer.apply(&mut out);
        out
    }

    fn high_bandwidth_out(&self, regs: RegisterFile, buf: &[u8]) -> RegisterFile {
        let transaction = Transaction::BulkOut;
        let fault = self.check_failure(&transaction);
        let mut state = self.state.lock().unwrap();
        let status = self.bulk_status(fault, || self.serve_bulk_out(&mut state, &regs, buf));
        state.record(TransactionRecord {
            transaction,
            channel: regs.dx.high(),
            argument: regs.bx,
            status,
        });

        let mut out = regs;
        out.bx.set_high(status.bits());
        out
    }

    fn high_bandwidth_in(&self, regs: RegisterFile, buf: &mut [u8]) -> RegisterFile {
        let transaction = Transaction::BulkIn;
        let fault = self.check_failure(&transaction);
        let mut state = self.state.lock().unwrap();
        let status = self.bulk_status(fault, || self.serve_bulk_in(&mut state, &regs, buf));
        state.record(TransactionRecord {
            transaction,
            channel: regs.dx.high(),
            argument: regs.bx,
            status,
        });

        let mut out = regs;
        out.bx.set_high(status.bits());
        out
    }
}
