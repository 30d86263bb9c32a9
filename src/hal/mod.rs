//! Hardware abstraction.
//!
//! The pools never touch CSRs or the scheduler directly. Everything
//! they need to know about the machine they are running on goes
//! through a [`Hart`].

pub mod hardware;
#[cfg(any(test, feature = "std"))]
pub mod host;

/// One hardware thread, as seen from the code currently running on it.
pub trait Hart: Sync {
    /// Id of the CPU executing the caller.
    ///
    /// Only stable while interrupts are off, otherwise the
    /// caller may be moved to a different CPU.
    fn cpu_id(&self) -> usize;
    /// Identifies the thread of control (process or kernel thread)
    /// currently running. Sleep locks use it to track their holder.
    fn context_id(&self) -> usize;
    fn interrupts_enabled(&self) -> bool;
    fn disable_interrupts(&self);
    fn enable_interrupts(&self);
    /// Give up the CPU for one scheduling round.
    fn yield_now(&self);
}
