//! Device drivers and hardware implementations.

pub mod ramdisk;

use crate::BSIZE;

/// A disk that moves whole blocks at a time.
pub trait BlockDevice: Sync {
    /// Synchronously read block `blockno` of device `dev` into `data`,
    /// or write `data` to it when `write` is set.
    ///
    /// Callers hold the buffer's sleep lock for the duration, so no two
    /// transfers for the same block ever overlap.
    fn rw(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE], write: bool);
}
