//! guestinfo variables
//!
//! Reads and writes `guestinfo.*` keys in the VM's configuration through
//! `info-get` / `info-set` RPCI commands.

use crate::backdoor::Backdoor;
use crate::channel::ChannelConfig;
use crate::rpcout::{send_one, RpcOutError, RpcOutResult};

/// Prefix the host expects in front of every guest-writable key.
pub const KEY_PREFIX: &str = "guestinfo.";

fn qualified_key(key: &str) -> RpcOutResult<String> {
    let key = key.strip_prefix(KEY_PREFIX).unwrap_or(key);
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(RpcOutError::InvalidKey(key.to_string()));
    }
    Ok(format!("{}{}", KEY_PREFIX, key))
}

/// Build the `info-get` command for `key`.
pub fn get_command(key: &str) -> RpcOutResult<String> {
    Ok(format!("info-get {}", qualified_key(key)?))
}

/// Build the `info-set` command for `key`.
pub fn set_command(key: &str, value: &str) -> RpcOutResult<String> {
    Ok(format!("info-set {} {}", qualified_key(key)?, value))
}

/// Read a key. `Ok(None)` means the host has no value for it.
pub fn get<B: Backdoor>(
    backdoor: B,
    config: &ChannelConfig,
    key: &str,
) -> RpcOutResult<Option<String>> {
    let reply = send_one(backdoor, config, get_command(key)?.as_bytes())?;
    if !reply.ok {
        tracing::debug!(key, reply = %reply.body_str(), "guestinfo key not set");
        return Ok(None);
    }
    Ok(Some(reply.body_str().into_owned()))
}

/// Write a key.
pub fn set<B: Backdoor>(
    backdoor: B,
    config: &ChannelConfig,
    key: &str,
    value: &str,
) -> RpcOutResult<()> {
    let reply = send_one(backdoor, config, set_command(key, value)?.as_bytes())?;
    if !reply.ok {
        return Err(RpcOutError::Rejected(reply.body_str().into_owned()));
    }
    Ok(())
}
