use crate::hal::Hart;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Nobody holds the lock.
const NO_HOLDER: usize = usize::MAX;

/// Long-term lock for things like disk buffers.
///
/// Waiters give up the CPU instead of spinning, so this must never
/// be taken while a spin lock is held.
pub struct Sleeplock<T> {
    locked: AtomicBool,
    /// Context holding the lock.
    holder: AtomicUsize,
    inner: UnsafeCell<T>,
}
impl<T> Sleeplock<T> {
    pub const fn new(value: T) -> Sleeplock<T> {
        Sleeplock {
            locked: AtomicBool::new(false),
            holder: AtomicUsize::new(NO_HOLDER),
            inner: UnsafeCell::new(value),
        }
    }
    pub fn lock<H: Hart>(&self, hart: &H) -> SleeplockGuard<'_, T> {
        while self.locked.swap(true, Ordering::Acquire) {
            // Let the holder run until it gets released.
            hart.yield_now();
        }
        self.holder.store(hart.context_id(), Ordering::Relaxed);
        SleeplockGuard { lock: self }
    }
    /// Check whether the running context holds the lock.
    pub fn holding<H: Hart>(&self, hart: &H) -> bool {
        self.locked.load(Ordering::Relaxed)
            && self.holder.load(Ordering::Relaxed) == hart.context_id()
    }
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
    unsafe fn unlock(&self) {
        self.holder.store(NO_HOLDER, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
    }
}
unsafe impl<T> Sync for Sleeplock<T> where T: Send {}

pub struct SleeplockGuard<'l, T> {
    lock: &'l Sleeplock<T>,
}
impl<'l, T> SleeplockGuard<'l, T> {
    pub fn lock(&self) -> &'l Sleeplock<T> {
        self.lock
    }
}
impl<'l, T> Deref for SleeplockGuard<'l, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.inner.get() }
    }
}
impl<'l, T> DerefMut for SleeplockGuard<'l, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.inner.get() }
    }
}
impl<'l, T> Drop for SleeplockGuard<'l, T> {
    fn drop(&mut self) {
        unsafe { self.lock.unlock() }
    }
}
