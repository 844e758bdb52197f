//! Shared helpers for channel integration tests
//!
//! - Channels opened against a fresh simulated host
//! - Deterministic payloads of any length
//! - A log capture for asserting on emitted events

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use tracing::Dispatch;
use vmw_rpci::{Channel, ChannelConfig, SimulatedHost, PROTOCOL_RPCI};

/// Payload lengths covering empty, partial-word, whole-word and long messages
pub const LENGTHS: &[usize] = &[0, 1, 2, 3, 4, 5, 7, 8, 1000];

/// Deterministic payload of `len` bytes with no zero bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

pub fn config(prefer_low_bandwidth: bool) -> ChannelConfig {
    ChannelConfig {
        protocol: PROTOCOL_RPCI,
        prefer_low_bandwidth,
    }
}

/// Open a channel on a fresh echoing host
pub fn open(prefer_low_bandwidth: bool) -> (SimulatedHost, Channel<SimulatedHost>) {
    let host = SimulatedHost::new();
    let channel = Channel::open_with_config(host.clone(), &config(prefer_low_bandwidth))
        .expect("open channel");
    host.clear_log();
    (host, channel)
}

/// In-memory sink for formatted log lines
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher formatting every event, down to trace, into this capture
    pub fn dispatch(&self) -> Dispatch {
        let capture = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        Dispatch::new(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
