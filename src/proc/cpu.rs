use crate::{hal::Hart, ConfigError, NCPU};
use arrayvec::ArrayVec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Per-CPU state.
///
/// Only ever touched by its own CPU with interrupts off, so relaxed
/// atomics are enough.
#[derive(Debug, Default)]
pub struct Cpu {
    /// Depth of push_intr_off() nesting.
    pub interrupt_disable_layers: AtomicU32,
    /// Were interrupts enabled before push_intr_off()?
    pub previous_interrupts_enabled: AtomicBool,
}
impl Cpu {
    pub const fn new() -> Cpu {
        Cpu {
            interrupt_disable_layers: AtomicU32::new(0),
            previous_interrupts_enabled: AtomicBool::new(false),
        }
    }
    pub fn interrupt_disable_layers(&self) -> u32 {
        self.interrupt_disable_layers.load(Ordering::Relaxed)
    }
}

/// The CPUs of the machine, with the hart used to query them.
pub struct Cpus<H> {
    hart: H,
    cpus: ArrayVec<Cpu, NCPU>,
}
impl<H: Hart> Cpus<H> {
    pub fn new(hart: H, ncpu: usize) -> Result<Cpus<H>, ConfigError> {
        if ncpu == 0 {
            return Err(ConfigError::NoCpus);
        } else if ncpu > NCPU {
            return Err(ConfigError::TooManyCpus {
                requested: ncpu,
                max: NCPU,
            });
        }

        let mut cpus = ArrayVec::new();
        for _ in 0..ncpu {
            cpus.push(Cpu::new());
        }
        Ok(Cpus { hart, cpus })
    }
    pub fn hart(&self) -> &H {
        &self.hart
    }
    /// Number of CPUs.
    pub fn len(&self) -> usize {
        self.cpus.len()
    }
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }
    /// Must be called with interrupts disabled
    /// to prevent race with process being moved
    /// to a different CPU.
    pub fn current_id(&self) -> usize {
        let id = self.hart.cpu_id();
        if id >= self.cpus.len() {
            panic!("cpu id {} out of range", id);
        }
        id
    }
    /// Return this CPU's cpu struct.
    /// Interrupts must be disabled.
    pub fn current(&self) -> &Cpu {
        &self.cpus[self.current_id()]
    }
}
