//! I/O port backdoor for x86_64 guests.
//!
//! This is the only place in the crate that executes `unsafe` code. Register
//! values are widened to 64 bits on the way in and truncated on the way out;
//! bulk buffers are exposed to the hypervisor by address only for the
//! duration of a single `rep outsb` / `rep insb`.

use std::arch::asm;

use rpci_protocol::{
    Register, RegisterFile, BACKDOOR_HIGH_BANDWIDTH_PORT, BACKDOOR_MAGIC, BACKDOOR_PORT,
};

use super::Backdoor;

/// Traps into the hypervisor through the backdoor I/O ports.
#[derive(Debug)]
pub struct IoPortBackdoor {
    _private: (),
}

impl IoPortBackdoor {
    /// Create a handle to the backdoor ports.
    ///
    /// # Safety
    ///
    /// The caller must ensure the process runs inside a hypervisor that
    /// implements the backdoor protocol. On bare metal, or under a hypervisor
    /// that does not intercept these ports, the trap instructions fault or
    /// touch real hardware.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

/// 64-bit register values for one trap.
struct Raw {
    ax: u64,
    bx: u64,
    cx: u64,
    dx: u64,
    si: u64,
    di: u64,
    bp: u64,
}

impl Raw {
    fn load(regs: &RegisterFile, port: u16) -> Self {
        let mut dx = regs.dx;
        dx.set_low(port);
        Self {
            ax: BACKDOOR_MAGIC as u64,
            bx: regs.bx.word() as u64,
            cx: regs.cx.word() as u64,
            dx: dx.word() as u64,
            si: regs.si.word() as u64,
            di: regs.di.word() as u64,
            bp: regs.bp.word() as u64,
        }
    }

    fn store(self) -> RegisterFile {
        RegisterFile {
            ax: Register::new(self.ax as u32),
            bx: Register::new(self.bx as u32),
            cx: Register::new(self.cx as u32),
            dx: Register::new(self.dx as u32),
            si: Register::new(self.si as u32),
            di: Register::new(self.di as u32),
            bp: Register::new(self.bp as u32),
        }
    }
}

// rbx and rbp cannot be named as asm operands, so both are swapped in and
// out of scratch registers around the trap.

impl Backdoor for IoPortBackdoor {
    fn in_out(&self, regs: RegisterFile) -> RegisterFile {
        let mut raw = Raw::load(&regs, BACKDOOR_PORT);
        // SAFETY: `new` requires a hypervisor that intercepts the port; the
        // trap reads and writes registers only.
        unsafe {
            asm!(
                "xchg {bx}, rbx",
                "push rbp",
                "mov rbp, {bp}",
                "in eax, dx",
                "mov {bp}, rbp",
                "pop rbp",
                "xchg {bx}, rbx",
                bx = inout(reg) raw.bx,
                bp = inout(reg) raw.bp,
                inout("rax") raw.ax,
                inout("rcx") raw.cx,
                inout("rdx") raw.dx,
                inout("rsi") raw.si,
                inout("rdi") raw.di,
            );
        }
        raw.store()
    }

    fn high_bandwidth_out(&self, regs: RegisterFile, buf: &[u8]) -> RegisterFile {
        let mut raw = Raw::load(&regs, BACKDOOR_HIGH_BANDWIDTH_PORT);
        raw.cx = buf.len() as u64;
        raw.si = buf.as_ptr() as u64;
        // SAFETY: the hypervisor reads exactly `cx` bytes starting at `si`,
        // which is the borrowed slice; the borrow outlives the trap.
        unsafe {
            asm!(
                "xchg {bx}, rbx",
                "push rbp",
                "mov rbp, {bp}",
                "rep outsb",
                "mov {bp}, rbp",
                "pop rbp",
                "xchg {bx}, rbx",
                bx = inout(reg) raw.bx,
                bp = inout(reg) raw.bp,
                inout("rax") raw.ax,
                inout("rcx") raw.cx,
                inout("rdx") raw.dx,
                inout("rsi") raw.si,
                inout("rdi") raw.di,
            );
        }
        raw.store()
    }

    fn high_bandwidth_in(&self, regs: RegisterFile, buf: &mut [u8]) -> RegisterFile {
        let mut raw = Raw::load(&regs, BACKDOOR_HIGH_BANDWIDTH_PORT);
        raw.cx = buf.len() as u64;
        raw.di = buf.as_mut_ptr() as u64;
        // SAFETY: the hypervisor writes at most `cx` bytes starting at `di`,
        // which is the exclusively borrowed slice.
        unsafe {
            asm!(
                "xchg {bx}, rbx",
                "push rbp",
                "mov rbp, {bp}",
                "rep insb",
                "mov {bp}, rbp",
                "pop rbp",
                "xchg {bx}, rbx",
                bx = inout(reg) raw.bx,
                bp = inout(reg) raw.bp,
                inout("rax") raw.ax,
                inout("rcx") raw.cx,
                inout("rdx") raw.dx,
                inout("rsi") raw.si,
                inout("rdi") raw.di,
            );
        }
        raw.store()
    }
}
