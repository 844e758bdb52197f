//! Guest-side RPCI channel over the hypervisor backdoor
//!
//! A guest opens a channel for a protocol number, exchanges whole messages
//! with the host over it, and closes it. Messages move either one 32-bit
//! word per trap (narrow) or in a single block transfer (bulk), depending on
//! what the host offers.

pub mod backdoor;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod guestinfo;
pub mod logging;
pub mod mock;
pub mod rpcout;

#[cfg(target_arch = "x86_64")]
pub use backdoor::IoPortBackdoor;
pub use backdoor::Backdoor;
pub use channel::{Channel, ChannelConfig};
pub use config::{ConfigError, EffectiveConfig};
pub use error::{ChannelError, ChannelResult, ErrorKind, ReceiveFailure};
pub use mock::SimulatedHost;
pub use rpcout::{send_one, Reply, RpcOut, RpcOutError};

pub use rpci_protocol::{Cookie, PROTOCOL_RPCI, PROTOCOL_TCLO};
