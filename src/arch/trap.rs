//! Architecture-agnostic interrupt nesting.
//!
//! push_intr_off/pop_intr_off are like disable/enable_interrupts()
//! except that they are matched: it takes two pop_intr_off()s to undo
//! two push_intr_off()s. Also, if interrupts are initially off, then
//! push_intr_off, pop_intr_off leaves them off.

use crate::{hal::Hart, proc::cpu::Cpus};
use core::{marker::PhantomData, sync::atomic::Ordering};

/// Keeps interrupts off on the current CPU while alive.
///
/// Holding one pins the caller to its CPU, so [`cpu_id`] stays
/// valid, and is what spin locks require before they can be taken.
///
/// [`cpu_id`]: InterruptBlocker::cpu_id
pub struct InterruptBlocker<'c, H: Hart> {
    cpus: &'c Cpus<H>,
    cpu_id: usize,
    // Interrupt state belongs to the CPU that pushed it.
    _not_send: PhantomData<*const ()>,
}
impl<'c, H: Hart> InterruptBlocker<'c, H> {
    pub fn new(cpus: &'c Cpus<H>) -> InterruptBlocker<'c, H> {
        unsafe {
            push_intr_off(cpus);
        }
        InterruptBlocker {
            cpus,
            cpu_id: cpus.current_id(),
            _not_send: PhantomData,
        }
    }
    pub fn cpu_id(&self) -> usize {
        self.cpu_id
    }
}
impl<'c, H: Hart> Drop for InterruptBlocker<'c, H> {
    fn drop(&mut self) {
        unsafe { pop_intr_off(self.cpus) }
    }
}

pub unsafe fn push_intr_off<H: Hart>(cpus: &Cpus<H>) {
    let hart = cpus.hart();
    let old = hart.interrupts_enabled();

    hart.disable_interrupts();
    let cpu = cpus.current();
    if cpu.interrupt_disable_layers.load(Ordering::Relaxed) == 0 {
        cpu.previous_interrupts_enabled.store(old, Ordering::Relaxed);
    }
    cpu.interrupt_disable_layers.fetch_add(1, Ordering::Relaxed);
}
pub unsafe fn pop_intr_off<H: Hart>(cpus: &Cpus<H>) {
    let hart = cpus.hart();
    let cpu = cpus.current();

    if hart.interrupts_enabled() {
        panic!("pop_intr_off - interruptible");
    } else if cpu.interrupt_disable_layers.load(Ordering::Relaxed) < 1 {
        panic!("pop_intr_off");
    }

    let layers = cpu.interrupt_disable_layers.fetch_sub(1, Ordering::Relaxed) - 1;

    if layers == 0 && cpu.previous_interrupts_enabled.load(Ordering::Relaxed) {
        hart.enable_interrupts();
    }
}
