//! RPCI Channel
//!
//! Guest-side client for one RPCI session. Handles session setup with
//! cookie negotiation, the two-phase send and receive protocols over narrow
//! and bulk transfers, and transparent restarts after hypervisor
//! checkpoints.
//!
//! A channel is a strict request/response sequence keyed by its id and
//! cookie, so every operation takes `&mut self`. Distinct channels are
//! independent.

use rpci_protocol::{
    Command, Cookie, MessageStatus, MessageType, OpenFlags, RegisterFile, PROTOCOL_RPCI,
};
use serde::{Deserialize, Serialize};
use tracing::Dispatch;

use crate::backdoor::Backdoor;
use crate::codec::{pack_word, select_transfer, unpack_word, Transfer, WORD_SIZE};
use crate::error::{ChannelError, ChannelResult, ReceiveFailure};

/// Channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Protocol number requested at open
    pub protocol: u32,
    /// Use narrow transfers even when the host offers bulk ones
    pub prefer_low_bandwidth: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_RPCI,
            prefer_low_bandwidth: false,
        }
    }
}

/// Outcome of one pass through a restartable phase.
enum Attempt<T> {
    Complete(T),
    Checkpoint,
}

/// An open RPCI session.
///
/// There is no close on drop: call [`Channel::close`], or the host keeps the
/// session until it expires it.
pub struct Channel<B: Backdoor> {
    backdoor: B,
    id: u16,
    cookie: Cookie,
    prefer_low_bandwidth: bool,
    dispatch: Dispatch,
}

impl<B: Backdoor> Channel<B> {
    /// Open a channel for `protocol` with default settings.
    pub fn open(backdoor: B, protocol: u32) -> ChannelResult<Self> {
        let config = ChannelConfig {
            protocol,
            ..ChannelConfig::default()
        };
        Self::open_with_config(backdoor, &config)
    }

    /// Open a channel, logging to the caller's current default subscriber.
    pub fn open_with_config(backdoor: B, config: &ChannelConfig) -> ChannelResult<Self> {
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        Self::open_with_dispatch(backdoor, config, dispatch)
    }

    /// Open a channel that logs every operation to `dispatch`.
    pub fn open_with_dispatch(
        backdoor: B,
        config: &ChannelConfig,
        dispatch: Dispatch,
    ) -> ChannelResult<Self> {
        let (id, cookie) = tracing::dispatcher::with_default(&dispatch, || {
            negotiate(&backdoor, config.protocol)
        })?;

        Ok(Self {
            backdoor,
            id,
            cookie,
            prefer_low_bandwidth: config.prefer_low_bandwidth,
            dispatch,
        })
    }

    /// Session id assigned by the host.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Session cookie issued by the host.
    pub fn cookie(&self) -> Cookie {
        self.cookie
    }

    pub fn prefer_low_bandwidth(&self) -> bool {
        self.prefer_low_bandwidth
    }

    pub fn set_prefer_low_bandwidth(&mut self, prefer: bool) {
        self.prefer_low_bandwidth = prefer;
    }

    /// End the session. The channel is consumed whatever the outcome.
    pub fn close(self) -> ChannelResult<()> {
        self.traced(|ch| {
            let (_, status) = ch.transact(ch.request(MessageType::Close));
            if !status.is_success() {
                tracing::error!(channel = ch.id, "unable to close communication channel");
                return Err(ChannelError::ChannelCloseFailed { id: ch.id });
            }

            tracing::debug!(channel = ch.id, "closed channel");
            Ok(())
        })
    }

    /// Send one message to the host.
    pub fn send(&mut self, buf: &[u8]) -> ChannelResult<()> {
        self.traced(|ch| ch.send_message(buf))
    }

    /// Receive the host's pending message, if there is one.
    pub fn receive(&mut self) -> ChannelResult<Option<Vec<u8>>> {
        self.traced(|ch| ch.receive_message())
    }

    // === Internal helpers ===

    fn traced<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, || f(self))
    }

    /// Narrow transaction registers carrying this session's id and cookie.
    fn request(&self, ty: MessageType) -> RegisterFile {
        let mut regs = RegisterFile::default();
        regs.cx.set_high(ty.as_u16());
        regs.cx.set_low(Command::Message.as_u16());
        regs.dx.set_high(self.id);
        regs.si.set_word(self.cookie.high);
        regs.di.set_word(self.cookie.low);
        regs
    }

    /// Bulk transfer registers; the cookie halves sit where the buffer
    /// address does not.
    fn bulk_request(&self, len: u32, transfer_in: bool) -> RegisterFile {
        let mut regs = RegisterFile::default();
        regs.bx.set_low(Command::HighBandwidthMessage.as_u16());
        regs.bx.set_high(MessageStatus::SUCCESS.bits());
        regs.cx.set_word(len);
        regs.dx.set_high(self.id);
        if transfer_in {
            regs.si.set_word(self.cookie.high);
            regs.bp.set_word(self.cookie.low);
        } else {
            regs.bp.set_word(self.cookie.high);
            regs.di.set_word(self.cookie.low);
        }
        regs
    }

    fn transact(&self, regs: RegisterFile) -> (RegisterFile, MessageStatus) {
        let out = self.backdoor.in_out(regs);
        (out, MessageStatus::from_raw(out.cx.high()))
    }

    fn send_failed(&self) -> ChannelError {
        tracing::error!(
            channel = self.id,
            "unable to send a message over the communication channel"
        );
        ChannelError::SendFailed { id: self.id }
    }

    fn receive_failed(&self, reason: ReceiveFailure) -> ChannelError {
        tracing::error!(channel = self.id, %reason, "unable to receive a message over the communication channel");
        ChannelError::ReceiveFailed {
            id: self.id,
            reason,
        }
    }

    // === Send ===

    fn send_message(&self, buf: &[u8]) -> ChannelResult<()> {
        let len = u32::try_from(buf.len()).map_err(|_| self.send_failed())?;

        loop {
            let mut regs = self.request(MessageType::SendSize);
            regs.bx.set_word(len);
            let (_, status) = self.transact(regs);
            if !status.is_success() {
                return Err(self.send_failed());
            }

            if buf.is_empty() {
                return Ok(());
            }

            let attempt = match select_transfer(status, self.prefer_low_bandwidth) {
                Transfer::Bulk => self.send_bulk(buf, len)?,
                Transfer::Narrow => Attempt::Complete(self.send_words(buf)?),
            };
            match attempt {
                Attempt::Complete(()) => return Ok(()),
                Attempt::Checkpoint => {
                    tracing::debug!(channel = self.id, "a checkpoint occurred, retrying the send");
                }
            }
        }
    }

    /// One bulk transfer. A checkpoint restarts the send from the size
    /// announcement.
    fn send_bulk(&self, buf: &[u8], len: u32) -> ChannelResult<Attempt<()>> {
        let out = self
            .backdoor
            .high_bandwidth_out(self.bulk_request(len, false), buf);
        let status = MessageStatus::from_raw(out.bx.high());
        if status.is_success() {
            return Ok(Attempt::Complete(()));
        }
        if status.contains(MessageStatus::CHECKPOINT) {
            return Ok(Attempt::Checkpoint);
        }
        Err(self.send_failed())
    }

    /// One transaction per word. A checkpoint here is a plain failure.
    fn send_words(&self, buf: &[u8]) -> ChannelResult<()> {
        for chunk in buf.chunks(WORD_SIZE) {
            let mut regs = self.request(MessageType::SendPayload);
            regs.bx.set_word(pack_word(chunk));
            tracing::trace!(channel = self.id, word = regs.bx.word(), "sending payload word");

            let (_, status) = self.transact(regs);
            if !status.is_success() {
                return Err(self.send_failed());
            }
        }
        Ok(())
    }

    // === Receive ===

    fn receive_message(&self) -> ChannelResult<Option<Vec<u8>>> {
        loop {
            let (out, status) = self.transact(self.request(MessageType::ReceiveSize));
            if !status.is_success() {
                return Err(self.receive_failed(ReceiveFailure::Poll));
            }

            if !status.contains(MessageStatus::DO_RECEIVE) {
                tracing::debug!(channel = self.id, "no message to retrieve");
                return Ok(None);
            }

            let echoed = out.dx.high();
            if echoed != MessageType::SendSize.as_u16() {
                return Err(self.reject(MessageType::SendSize, echoed));
            }

            let size = out.bx.word();
            let buf = if size == 0 {
                Vec::new()
            } else {
                match select_transfer(status, self.prefer_low_bandwidth) {
                    Transfer::Bulk => self.receive_bulk(size)?,
                    Transfer::Narrow => match self.receive_words(size as usize)? {
                        Attempt::Complete(buf) => buf,
                        Attempt::Checkpoint => {
                            tracing::debug!(
                                channel = self.id,
                                "a checkpoint occurred, retrying the receive"
                            );
                            continue;
                        }
                    },
                }
            };

            self.reply(MessageType::ReceiveStatus, MessageStatus::SUCCESS);
            return Ok(Some(buf));
        }
    }

    /// One bulk transfer into a buffer of exactly `size` bytes. Not retried
    /// on checkpoint.
    fn receive_bulk(&self, size: u32) -> ChannelResult<Vec<u8>> {
        let mut buf = vec![0u8; size as usize];
        let out = self
            .backdoor
            .high_bandwidth_in(self.bulk_request(size, true), &mut buf);
        if !MessageStatus::from_raw(out.bx.high()).is_success() {
            let err = self.receive_failed(ReceiveFailure::Transfer);
            self.reply(MessageType::ReceivePayload, MessageStatus::FAIL);
            return Err(err);
        }
        Ok(buf)
    }

    fn receive_words(&self, size: usize) -> ChannelResult<Attempt<Vec<u8>>> {
        let mut buf = Vec::with_capacity(size);
        let mut remaining = size;

        while remaining > 0 {
            let mut regs = self.request(MessageType::ReceivePayload);
            regs.bx.set_low(MessageStatus::SUCCESS.bits());

            let (out, status) = self.transact(regs);
            if !status.is_success() {
                if status.contains(MessageStatus::CHECKPOINT) {
                    return Ok(Attempt::Checkpoint);
                }
                let err = self.receive_failed(ReceiveFailure::Transfer);
                self.reply(MessageType::ReceivePayload, MessageStatus::FAIL);
                return Err(err);
            }

            let echoed = out.dx.high();
            if echoed != MessageType::SendPayload.as_u16() {
                return Err(self.reject(MessageType::SendPayload, echoed));
            }

            tracing::trace!(channel = self.id, word = out.bx.word(), "received payload word");
            remaining -= unpack_word(out.bx, remaining, &mut buf);
        }

        Ok(Attempt::Complete(buf))
    }

    /// Report a protocol violation to the host and build the error.
    fn reject(&self, expected: MessageType, found: u16) -> ChannelError {
        let err = self.receive_failed(ReceiveFailure::ProtocolViolation { expected, found });
        self.reply(MessageType::ReceivePayload, MessageStatus::FAIL);
        err
    }

    /// Best-effort acknowledgment; failure is logged, never returned.
    fn reply(&self, ty: MessageType, status: MessageStatus) {
        let mut regs = self.request(ty);
        regs.bx.set_low(status.bits());

        let (_, answer) = self.transact(regs);
        if answer.is_success() {
            return;
        }
        if status.is_success() {
            tracing::error!(
                channel = self.id,
                message_type = %ty,
                "unable to acknowledge a message over the communication channel"
            );
        } else {
            tracing::error!(
                channel = self.id,
                message_type = %ty,
                "unable to signal a reception error over the communication channel"
            );
        }
    }
}

/// Open a session, asking for a cookie first and retrying once without the
/// capability flag for hosts that reject it.
fn negotiate<B: Backdoor>(backdoor: &B, protocol: u32) -> ChannelResult<(u16, Cookie)> {
    let mut flags = OpenFlags::COOKIE;

    loop {
        let mut regs = RegisterFile::default();
        regs.bx.set_word(protocol | flags.bits());
        regs.cx.set_high(MessageType::Open.as_u16());
        regs.cx.set_low(Command::Message.as_u16());

        let out = backdoor.in_out(regs);
        if MessageStatus::from_raw(out.cx.high()).is_success() {
            let id = out.dx.high();
            tracing::debug!(channel = id, protocol, ?flags, "opened channel");
            return Ok((id, Cookie::new(out.si.word(), out.di.word())));
        }

        if flags.is_empty() {
            tracing::error!(protocol, "unable to open communication channel");
            return Err(ChannelError::ChannelOpenFailed { protocol });
        }
        tracing::debug!(protocol, "open with cookie refused, retrying without capabilities");
        flags = OpenFlags::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailureConfig, SimulatedHost, Transaction};

    #[test]
    fn test_open_uses_host_assigned_id_and_cookie() {
        let host = SimulatedHost::new();
        let channel = Channel::open(host.clone(), PROTOCOL_RPCI).unwrap();

        assert!(host.is_open(channel.id()));
        assert_eq!(host.session_cookie(channel.id()), Some(channel.cookie()));
        assert_eq!(host.cookie_requested(channel.id()), Some(true));
    }

    #[test]
    fn test_open_failure() {
        let host = SimulatedHost::new();
        host.inject_failure(Transaction::Narrow(MessageType::Open), FailureConfig::fail());

        let err = Channel::open(host.clone(), PROTOCOL_RPCI).err().unwrap();
        assert!(matches!(
            err,
            ChannelError::ChannelOpenFailed { protocol: PROTOCOL_RPCI }
        ));
        // Cookie attempt plus one retry, never more
        assert_eq!(host.count(Transaction::Narrow(MessageType::Open)), 2);
    }

    #[test]
    fn test_close_consumes_session() {
        let host = SimulatedHost::new();
        let channel = Channel::open(host.clone(), PROTOCOL_RPCI).unwrap();
        let id = channel.id();

        channel.close().unwrap();
        assert!(!host.is_open(id));
    }

    #[test]
    fn test_close_failure_is_reported() {
        let host = SimulatedHost::new();
        let channel = Channel::open(host.clone(), PROTOCOL_RPCI).unwrap();
        let id = channel.id();
        host.inject_failure(Transaction::Narrow(MessageType::Close), FailureConfig::fail());

        let err = channel.close().unwrap_err();
        assert!(matches!(err, ChannelError::ChannelCloseFailed { id: failed } if failed == id));
        assert_eq!(host.count(Transaction::Narrow(MessageType::Close)), 1);
    }

    #[test]
    fn test_bulk_request_cookie_placement() {
        let host = SimulatedHost::new();
        let channel = Channel::open(host, PROTOCOL_RPCI).unwrap();
        let cookie = channel.cookie();

        let out = channel.bulk_request(9, false);
        assert_eq!(out.bp.word(), cookie.high);
        assert_eq!(out.di.word(), cookie.low);
        assert_eq!(out.cx.word(), 9);
        assert_eq!(out.bx.high(), MessageStatus::SUCCESS.bits());

        let inbound = channel.bulk_request(9, true);
        assert_eq!(inbound.si.word(), cookie.high);
        assert_eq!(inbound.bp.word(), cookie.low);
    }

    #[test]
    fn test_send_then_receive_echo() {
        let host = SimulatedHost::new();
        let mut channel = Channel::open(host.clone(), PROTOCOL_RPCI).unwrap();

        channel.send(b"ping").unwrap();
        assert_eq!(channel.receive().unwrap(), Some(b"ping".to_vec()));
        assert_eq!(channel.receive().unwrap(), None);
    }

    #[test]
    fn test_receive_poll_refused() {
        let host = SimulatedHost::new();
        let mut channel = Channel::open(host.clone(), PROTOCOL_RPCI).unwrap();
        host.inject_failure(
            Transaction::Narrow(MessageType::ReceiveSize),
            FailureConfig::fail(),
        );

        let err = channel.receive().unwrap_err();
        assert!(matches!(
            err,
            ChannelError::ReceiveFailed { reason: ReceiveFailure::Poll, .. }
        ));
    }
}
