//! A hart for running on a hosted OS: every OS thread plays one CPU.
//!
//! The CPU id defaults to 0 and is set per thread with
//! [`HostHart::set_cpu`]. Interrupt state is a per-thread flag, so
//! two threads must not claim the same CPU at the same time.

use super::Hart;
use std::{
    cell::Cell,
    sync::atomic::{AtomicUsize, Ordering},
};

static NEXT_CONTEXT: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static CPU_ID: Cell<usize> = const { Cell::new(0) };
    static CONTEXT_ID: Cell<usize> = const { Cell::new(0) };
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
}

#[derive(Copy, Clone, Debug, Default)]
pub struct HostHart;
impl HostHart {
    pub const fn new() -> HostHart {
        HostHart
    }
    /// Run the calling thread as CPU `cpu` from now on.
    pub fn set_cpu(cpu: usize) {
        CPU_ID.with(|id| id.set(cpu));
    }
}
impl Hart for HostHart {
    fn cpu_id(&self) -> usize {
        CPU_ID.with(Cell::get)
    }
    fn context_id(&self) -> usize {
        CONTEXT_ID.with(|id| {
            if id.get() == 0 {
                id.set(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed));
            }
            id.get()
        })
    }
    fn interrupts_enabled(&self) -> bool {
        INTERRUPTS_ENABLED.with(Cell::get)
    }
    fn disable_interrupts(&self) {
        INTERRUPTS_ENABLED.with(|on| on.set(false));
    }
    fn enable_interrupts(&self) {
        INTERRUPTS_ENABLED.with(|on| on.set(true));
    }
    fn yield_now(&self) {
        std::thread::yield_now();
    }
}
