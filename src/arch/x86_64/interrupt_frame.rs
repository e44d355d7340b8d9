//! Saved register snapshot for preemption and user/kernel transitions
//! (spec.md §2 "Interrupt frame").
//!
//! The actual trap entry stub that populates this from the faulting
//! context is part of the interrupt controller glue (out of scope,
//! spec.md §1); this type is the stable shape every core above it reads
//! and writes.

/// General-purpose registers plus the CPU-pushed trap frame, in the layout
/// the syscall dispatcher (spec.md §4.4) and the user-mode return path
/// expect.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct InterruptFrame {
    // Callee/caller-saved general purpose registers, pushed by the trap stub.
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    // Pushed by the CPU on trap/interrupt entry.
    pub vec_no: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub eflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl InterruptFrame {
    /// Syscall number lives in `rax` (spec.md §4.4/§6 calling convention).
    pub fn syscall_number(&self) -> usize {
        self.rax as usize
    }

    /// The six argument registers, in the fixed order the dispatcher reads
    /// them: rdi, rsi, rdx, r10, r8, r9 (the standard x86_64 syscall ABI —
    /// rcx is clobbered by the `syscall` instruction itself, so arg4 goes
    /// in r10 instead).
    pub fn syscall_args(&self) -> [u64; 6] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }

    /// Write the syscall return value back into `rax`.
    pub fn set_return_value(&mut self, value: i64) {
        self.rax = value as u64;
    }

    /// Was this frame taken while executing in user mode?
    pub fn from_user_mode(&self) -> bool {
        (self.cs & 0x3) == 0x3
    }
}
