//! Simulated Host Implementation
//!
//! Implements a configurable in-process hypervisor host for testing the RPCI
//! channel. Supports every transaction the channel issues, with fault
//! injection for testing error and checkpoint paths.
//!
//! # Behaviour
//!
//! - `open`: allocate a session id and cookie (optionally refusing the
//!   cookie flag)
//! - size/payload/bulk-out: reassemble a guest message and hand it to the
//!   responder; its reply is queued for the same channel (default: echo)
//! - size query/payload/bulk-in: serve the oldest queued message
//! - receive status: drop a fully delivered message on a success ack
//! - `close`: forget the session
//!
//! Every transaction after open must carry the session's id and cookie.

mod failure;
mod host;
mod state;

pub use failure::{FailureConfig, FailureInjector, Fault, Transaction};
pub use host::{HostCapabilities, Responder, SimulatedHost};
pub use state::{HostState, Inbound, Session, TransactionRecord};
