//! Fault Injection for the Simulated Host
//!
//! Supports configurable faults per transaction kind for testing the
//! channel's error and checkpoint paths.

use std::collections::HashMap;

use rpci_protocol::MessageType;

/// A transaction as the host sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transaction {
    /// Low-bandwidth register transaction of the given type
    Narrow(MessageType),
    /// Bulk transfer from guest to host
    BulkOut,
    /// Bulk transfer from host to guest
    BulkIn,
}

/// What the host does instead of serving a transaction normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer with no status bits set; the transaction is not processed
    Fail,
    /// Answer with only the checkpoint bit; the transaction is not processed
    Checkpoint,
    /// Process normally but echo this message type in `dx.high`
    Echo(MessageType),
}

/// Fault configuration for a transaction kind
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Fault to inject
    pub fault: Fault,
    /// Number of times to fault before serving normally (None = always)
    pub fail_count: Option<u32>,
    /// Calls served normally before the first fault
    pub skip: u32,
}

impl FailureConfig {
    /// Create a config that always injects `fault`
    pub fn new(fault: Fault) -> Self {
        Self {
            fault,
            fail_count: None,
            skip: 0,
        }
    }

    /// Report a checkpoint on every attempt
    pub fn checkpoint() -> Self {
        Self::new(Fault::Checkpoint)
    }

    /// Fail every attempt
    pub fn fail() -> Self {
        Self::new(Fault::Fail)
    }

    /// Set the number of times to fault before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }

    /// Serve the first `calls` normally before faulting
    pub fn after(mut self, calls: u32) -> Self {
        self.skip = calls;
        self
    }
}

/// Fault injector for the simulated host
#[derive(Debug, Default)]
pub struct FailureInjector {
    /// Per-transaction fault configs
    configs: HashMap<Transaction, FailureConfig>,
    /// Call counts per transaction (for fail_count tracking)
    call_counts: HashMap<Transaction, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a fault for a transaction kind
    pub fn inject(&mut self, transaction: Transaction, config: FailureConfig) {
        self.configs.insert(transaction, config);
        self.call_counts.insert(transaction, 0);
    }

    /// Clear all fault injections
    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    /// Clear fault injection for a specific transaction kind
    pub fn clear_transaction(&mut self, transaction: &Transaction) {
        self.configs.remove(transaction);
        self.call_counts.remove(transaction);
    }

    /// Check if a fault should occur for a transaction.
    /// Returns the fault if one should occur, None otherwise
    pub fn check(&mut self, transaction: &Transaction) -> Option<Fault> {
        let config = self.configs.get(transaction)?;
        let count = self.call_counts.entry(*transaction).or_insert(0);
        *count += 1;

        if *count <= config.skip {
            return None;
        }
        if let Some(fail_limit) = config.fail_count {
            if *count - config.skip > fail_limit {
                return None;
            }
        }

        Some(config.fault)
    }
}
