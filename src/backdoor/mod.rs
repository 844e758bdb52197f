//! Backdoor Transaction Layer
//!
//! Abstracts the hypervisor trap for testability. Provides:
//! - Backdoor trait: one blocking register transaction or bulk transfer
//! - IoPortBackdoor: the I/O port trap used inside a real guest (x86_64)
//! - `crate::mock::SimulatedHost`: in-process host for tests

#[cfg(target_arch = "x86_64")]
mod port;

#[cfg(target_arch = "x86_64")]
pub use port::IoPortBackdoor;

use rpci_protocol::RegisterFile;

/// The register transaction primitive.
///
/// Implementations load the backdoor magic into `ax` and the port into
/// `dx.low`; every other register is passed through as given. Each call
/// blocks until the host answers.
pub trait Backdoor: Send + Sync {
    /// Narrow transaction on the low-bandwidth port.
    fn in_out(&self, regs: RegisterFile) -> RegisterFile;

    /// Bulk transfer of `buf` from guest to host.
    fn high_bandwidth_out(&self, regs: RegisterFile, buf: &[u8]) -> RegisterFile;

    /// Bulk transfer from host into `buf`.
    fn high_bandwidth_in(&self, regs: RegisterFile, buf: &mut [u8]) -> RegisterFile;
}

impl<B: Backdoor + ?Sized> Backdoor for &B {
    fn in_out(&self, regs: RegisterFile) -> RegisterFile {
        (**self).in_out(regs)
    }

    fn high_bandwidth_out(&self, regs: RegisterFile, buf: &[u8]) -> RegisterFile {
        (**self).high_bandwidth_out(regs, buf)
    }

    fn high_bandwidth_in(&self, regs: RegisterFile, buf: &mut [u8]) -> RegisterFile {
        (**self).high_bandwidth_in(regs, buf)
    }
}
