use crate::{arch::trap::InterruptBlocker, hal::Hart};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut, Drop},
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

/// No CPU holds the lock.
const NO_CPU: usize = usize::MAX;

/// How often a lock was taken, and how long takers spun for it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LockStats {
    pub acquisitions: u64,
    /// Spin iterations spent waiting for another CPU to let go.
    pub contended_spins: u64,
}
impl core::ops::Add for LockStats {
    type Output = LockStats;

    fn add(self, rhs: LockStats) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions + rhs.acquisitions,
            contended_spins: self.contended_spins + rhs.contended_spins,
        }
    }
}

/// Short-held mutual exclusion.
///
/// Taking the lock requires an [`InterruptBlocker`]: an interrupt
/// handler on the same CPU trying to take a lock its CPU already holds
/// would spin forever. The guard borrows the blocker, so interrupts
/// cannot come back on while the lock is held.
pub struct SpinMutex<T> {
    locked: AtomicBool,
    /// CPU holding the lock.
    cpu: AtomicUsize,
    acquisitions: AtomicU64,
    contended_spins: AtomicU64,
    inner: UnsafeCell<T>,
}
impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> SpinMutex<T> {
        SpinMutex {
            locked: AtomicBool::new(false),
            cpu: AtomicUsize::new(NO_CPU),
            acquisitions: AtomicU64::new(0),
            contended_spins: AtomicU64::new(0),
            inner: UnsafeCell::new(value),
        }
    }
    pub fn lock<'a, H: Hart>(
        &'a self,
        intr: &'a InterruptBlocker<'_, H>,
    ) -> SpinMutexGuard<'a, T> {
        if self.holding(intr) {
            panic!("acquire");
        }

        let mut spins = 0;
        while self.locked.swap(true, Ordering::Acquire) {
            spins += 1;
            core::hint::spin_loop();
        }
        self.cpu.store(intr.cpu_id(), Ordering::Relaxed);

        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        if spins > 0 {
            self.contended_spins.fetch_add(spins, Ordering::Relaxed);
        }

        SpinMutexGuard {
            mutex: self,
            cpu: intr.cpu_id(),
        }
    }
    /// Check whether this CPU is holding the lock.
    pub fn holding<H: Hart>(&self, intr: &InterruptBlocker<'_, H>) -> bool {
        self.locked.load(Ordering::Relaxed) && self.cpu.load(Ordering::Relaxed) == intr.cpu_id()
    }
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended_spins: self.contended_spins.load(Ordering::Relaxed),
        }
    }
    unsafe fn unlock(&self, cpu: usize) {
        if !self.locked.load(Ordering::Relaxed) || self.cpu.load(Ordering::Relaxed) != cpu {
            panic!("release");
        }
        self.cpu.store(NO_CPU, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
    }
}
unsafe impl<T> Sync for SpinMutex<T> where T: Send {}

pub struct SpinMutexGuard<'m, T> {
    mutex: &'m SpinMutex<T>,
    cpu: usize,
}
impl<'m, T> Deref for SpinMutexGuard<'m, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.inner.get() }
    }
}
impl<'m, T> DerefMut for SpinMutexGuard<'m, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.inner.get() }
    }
}
impl<'m, T> Drop for SpinMutexGuard<'m, T> {
    fn drop(&mut self) {
        unsafe { self.mutex.unlock(self.cpu) }
    }
}
