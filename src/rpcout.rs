//! Outbound RPC
//!
//! Sends a command to the host over an RPCI channel and reads the single
//! reply. Replies start with a status digit: `"1 "` on success, `"0 "` on
//! failure.

use std::borrow::Cow;

use crate::backdoor::Backdoor;
use crate::channel::{Channel, ChannelConfig};
use crate::error::ChannelError;

/// Outbound RPC errors
#[derive(Debug, thiserror::Error)]
pub enum RpcOutError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("host sent no reply")]
    NoReply,

    #[error("invalid guestinfo key: {0:?}")]
    InvalidKey(String),

    #[error("host rejected the command: {0}")]
    Rejected(String),
}

impl RpcOutError {
    /// Get exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RpcOutError::Channel(e) => e.exit_code(),
            RpcOutError::NoReply => 13,
            RpcOutError::InvalidKey(_) => 1,
            RpcOutError::Rejected(_) => 2,
        }
    }
}

/// Result type for outbound RPC operations
pub type RpcOutResult<T> = Result<T, RpcOutError>;

/// A reply with its status prefix removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Whether the host reported success
    pub ok: bool,
    pub body: Vec<u8>,
}

impl Reply {
    /// Split the status prefix off a raw reply. A reply without one counts
    /// as a failure and is kept whole.
    pub fn parse(raw: Vec<u8>) -> Self {
        match raw.as_slice() {
            [status @ (b'0' | b'1'), rest @ ..] if rest.first().map_or(true, |b| *b == b' ') => {
                Reply {
                    ok: *status == b'1',
                    body: rest.get(1..).unwrap_or_default().to_vec(),
                }
            }
            _ => Reply {
                ok: false,
                body: raw,
            },
        }
    }

    pub fn body_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// An RPCI channel used for command/reply exchanges
pub struct RpcOut<B: Backdoor> {
    channel: Channel<B>,
}

impl<B: Backdoor> RpcOut<B> {
    /// Open the RPCI channel
    pub fn start(backdoor: B, config: &ChannelConfig) -> RpcOutResult<Self> {
        let channel = Channel::open_with_config(backdoor, config)?;
        Ok(Self { channel })
    }

    /// Send one command and wait for its reply
    pub fn send(&mut self, command: &[u8]) -> RpcOutResult<Reply> {
        self.channel.send(command)?;
        let raw = self.channel.receive()?.ok_or_else(|| {
            tracing::error!(channel = self.channel.id(), "no reply to RPCI command");
            RpcOutError::NoReply
        })?;
        Ok(Reply::parse(raw))
    }

    /// Close the channel
    pub fn stop(self) -> RpcOutResult<()> {
        self.channel.close()?;
        Ok(())
    }

    pub fn channel(&self) -> &Channel<B> {
        &self.channel
    }
}

/// Open a channel, send one command, and close the channel again. The
/// channel is closed even when the exchange fails.
pub fn send_one<B: Backdoor>(
    backdoor: B,
    config: &ChannelConfig,
    command: &[u8],
) -> RpcOutResult<Reply> {
    let mut out = RpcOut::start(backdoor, config)?;
    let result = out.send(command);
    let stopped = out.stop();
    let reply = result?;
    stopped?;
    Ok(reply)
}
