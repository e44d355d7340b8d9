//! x86_64 architecture support.

pub mod context;
pub mod interrupt_frame;
pub mod interrupts;

/// Halt until the next interrupt (the `hlt` instruction).
///
/// # Safety concern
/// On bare metal this must run with interrupts enabled or a wakeup can be
/// lost forever; the idle thread (spec.md §4.1) disables interrupts, checks
/// the ready queue, blocks, then re-enables interrupts and halts as one
/// atomic step via [`interrupts::enable_and_halt`] to close that race.
pub fn halt() {
    #[cfg(target_os = "none")]
    x86_64::instructions::hlt();
    #[cfg(not(target_os = "none"))]
    core::hint::spin_loop();
}

/// Power off the machine (`SYS_HALT`, spec.md §4.4). On bare metal this
/// writes the QEMU/Bochs `isa-debug-exit` shutdown code and never returns;
/// the host test build has no machine to power off, so it is a no-op.
pub fn power_off() -> ! {
    #[cfg(target_os = "none")]
    {
        use x86_64::instructions::port::Port;
        let mut port: Port<u16> = Port::new(0x604);
        unsafe {
            port.write(0x2000u16);
        }
        loop {
            x86_64::instructions::hlt();
        }
    }
    #[cfg(not(target_os = "none"))]
    {
        panic!("power_off() called on a host build with no machine to power off");
    }
}
