use crate::{sync::sleeplock::Sleeplock, BSIZE};
use core::sync::atomic::{AtomicBool, Ordering};

/// A cached block and where it lives: its bucket and its slot there.
///
/// Only the cache hands these out. An id outlives the binding it names
/// once the buffer is recycled for another block, so the cache checks
/// the block again before trusting it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferId {
    bucket: usize,
    slot: usize,
    dev: u32,
    blockno: u32,
}
impl BufferId {
    pub(crate) fn new(bucket: usize, slot: usize, dev: u32, blockno: u32) -> BufferId {
        BufferId {
            bucket,
            slot,
            dev,
            blockno,
        }
    }
    pub fn bucket(&self) -> usize {
        self.bucket
    }
    pub(crate) fn slot(&self) -> usize {
        self.slot
    }
    pub fn dev(&self) -> u32 {
        self.dev
    }
    pub fn blockno(&self) -> u32 {
        self.blockno
    }
    pub(crate) fn block(&self) -> (u32, u32) {
        (self.dev, self.blockno)
    }
}

/// One cached disk block.
///
/// Which block it holds, and how many users it has, is bookkeeping of
/// the bucket that owns it. The buffer itself only has the data.
pub struct Buffer {
    /// Has data been read from disk?
    ///
    /// Changed with the sleep lock held, or by the bucket while
    /// nobody references the buffer.
    valid: AtomicBool,
    pub lock: Sleeplock<[u8; BSIZE]>,
}
impl Buffer {
    pub const fn new() -> Buffer {
        Buffer {
            valid: AtomicBool::new(false),
            lock: Sleeplock::new([0u8; BSIZE]),
        }
    }
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
    pub(crate) fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }
}
impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}
