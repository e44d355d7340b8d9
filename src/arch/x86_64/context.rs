//! Kernel-thread CPU context for context switching.
//!
//! A much narrower cousin of the teacher's `X86_64Context` (no FPU state,
//! no segment registers beyond what switching kernel threads needs) because
//! this kernel only ever context-switches *kernel* stacks here; the
//! user-register snapshot lives in [`super::interrupt_frame::InterruptFrame`]
//! instead and is restored by the trap-return path, not by
//! `switch_context`.

use core::arch::asm;

/// Callee-saved registers preserved across a kernel-to-kernel context switch
/// (System V AMD64 ABI: rbx, rbp, r12-r15, plus rsp/rip).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuContext {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub rip: u64,
}

impl CpuContext {
    /// Build the initial context for a brand-new kernel stack: `rip` points
    /// at `entry`, `rsp` at the top of the freshly allocated stack.
    pub fn new(entry: usize, stack_top: usize) -> Self {
        Self {
            rip: entry as u64,
            rsp: stack_top as u64,
            ..Default::default()
        }
    }
}

/// Switch from `from`'s context to `to`'s context.
///
/// # Safety
/// Both pointers must reference live, correctly aligned kernel stacks
/// belonging to threads that are not concurrently running elsewhere. The
/// caller must hold the scheduler lock (or have interrupts disabled) across
/// the call, since `to`'s thread resumes execution with whatever lock state
/// held the moment it last called `switch_context`.
#[cfg(target_os = "none")]
pub unsafe fn switch_context(from: *mut CpuContext, to: *const CpuContext) {
    asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
        in("rdi") from,
        in("rsi") to,
    );
}

/// Host stand-in: the test suite never actually switches a live CPU stack,
/// it only exercises the scheduler's bookkeeping, so this just copies the
/// saved-context struct to model "the thread ran and yielded back".
#[cfg(not(target_os = "none"))]
pub unsafe fn switch_context(from: *mut CpuContext, to: *const CpuContext) {
    unsafe {
        *from = CpuContext::default();
        let _ = &*to;
    }
}
