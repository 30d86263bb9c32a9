//! Buffer cache.
//!
//! The buffer cache holds cached copies of disk block contents in a
//! fixed set of buffers. Caching disk blocks in memory reduces the
//! number of disk reads and also provides a synchronization point
//! for disk blocks used by multiple processes.
//!
//! The buffers are split evenly between buckets, and block `blockno`
//! is only ever cached by bucket `blockno % nbucket`. Each bucket has
//! its own lock and its own recency list, so lookups of blocks in
//! different buckets never contend. A bucket that runs out of unused
//! buffers is fatal even if other buckets have room.
//!
//! Interface:
//! - To get a buffer for a particular disk block, call read.
//! - After changing buffer data, call write to write it to disk.
//! - When done with the buffer, call release (or drop the guard).
//! - Only one process at a time can use a buffer,
//!   so do not keep them longer than necessary.

use crate::{
    arch::trap::InterruptBlocker,
    hal::{hardware::BlockDevice, Hart},
    io::buf::{Buffer, BufferId},
    proc::cpu::Cpus,
    sync::{
        sleeplock::SleeplockGuard,
        spinmutex::{LockStats, SpinMutex, SpinMutexGuard},
    },
    ConfigError, BSIZE, NBUCKET, NBUF,
};
use arrayvec::ArrayVec;
use core::{
    cell::UnsafeCell,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU64, Ordering},
};

/// The list head, which is not a slot.
const HEAD: usize = usize::MAX;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BcacheConfig {
    pub nbucket: usize,
    /// Buffers shared out between the buckets.
    /// Any remainder after an even split goes unused.
    pub nbuf: usize,
}
impl Default for BcacheConfig {
    fn default() -> BcacheConfig {
        BcacheConfig {
            nbucket: NBUCKET,
            nbuf: NBUF,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BcacheStats {
    /// Lookups that found their block cached.
    pub hits: u64,
    /// Lookups that had to recycle a buffer.
    pub misses: u64,
    /// Recycled buffers that were holding another block.
    pub evictions: u64,
    /// Bucket locks, summed.
    pub lock: LockStats,
}

#[derive(Copy, Clone, Debug)]
struct Link {
    prev: usize,
    next: usize,
}

#[derive(Debug)]
struct Slot {
    /// (dev, blockno) of the cached block, if any.
    block: Option<(u32, u32)>,
    refcnt: u32,
    link: Link,
}

/// Bookkeeping for one buffer, owned by the bucket of that buffer.
struct SlotCell(UnsafeCell<Slot>);
impl SlotCell {
    const fn new() -> SlotCell {
        SlotCell(UnsafeCell::new(Slot {
            block: None,
            refcnt: 0,
            link: Link {
                prev: HEAD,
                next: HEAD,
            },
        }))
    }
}
// Only touched through a LockedBucket.
unsafe impl Sync for SlotCell {}

struct Bucket {
    head: Link,
}

/// A bucket with its lock held, and the slots it owns.
///
/// The slots form a circular list through `link`, sorted by how
/// recently the buffer was used. head.next is most recent,
/// head.prev is least.
struct LockedBucket<'a> {
    bucket: SpinMutexGuard<'a, Bucket>,
    slots: &'a [SlotCell],
}
impl<'a> LockedBucket<'a> {
    fn slot(&self, i: usize) -> &Slot {
        unsafe { &*self.slots[i].0.get() }
    }
    fn slot_mut(&mut self, i: usize) -> &mut Slot {
        unsafe { &mut *self.slots[i].0.get() }
    }
    fn link(&self, i: usize) -> Link {
        if i == HEAD {
            self.bucket.head
        } else {
            self.slot(i).link
        }
    }
    fn link_mut(&mut self, i: usize) -> &mut Link {
        if i == HEAD {
            &mut self.bucket.head
        } else {
            &mut self.slot_mut(i).link
        }
    }
    fn unlink(&mut self, i: usize) {
        let Link { prev, next } = self.link(i);
        self.link_mut(next).prev = prev;
        self.link_mut(prev).next = next;
    }
    /// Insert slot `i` as the most recently used.
    fn push_front(&mut self, i: usize) {
        let next = self.bucket.head.next;
        *self.link_mut(i) = Link { prev: HEAD, next };
        self.link_mut(next).prev = i;
        self.bucket.head.next = i;
    }
    /// Most recently used first.
    fn find(&self, dev: u32, blockno: u32) -> Option<usize> {
        let mut i = self.bucket.head.next;
        while i != HEAD {
            if self.slot(i).block == Some((dev, blockno)) {
                return Some(i);
            }
            i = self.slot(i).link.next;
        }
        None
    }
    /// Least recently used first.
    fn find_unused(&self) -> Option<usize> {
        let mut i = self.bucket.head.prev;
        while i != HEAD {
            if self.slot(i).refcnt == 0 {
                return Some(i);
            }
            i = self.slot(i).link.prev;
        }
        None
    }
    /// The slot of `id`, if it is still bound to the block of `id`.
    fn bound(&mut self, id: BufferId) -> Option<&mut Slot> {
        let slot = self.slot_mut(id.slot());
        if slot.block == Some(id.block()) {
            Some(slot)
        } else {
            None
        }
    }
    #[cfg(test)]
    fn recency(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut i = self.bucket.head.next;
        while i != HEAD {
            order.push(i);
            i = self.slot(i).link.next;
        }
        order
    }
}

/// A disk block cache holding at most `N` buffers.
pub struct BufferCache<'c, H: Hart, D: BlockDevice, const N: usize = { NBUF }> {
    cpus: &'c Cpus<H>,
    disk: D,
    per_bucket: usize,
    buckets: ArrayVec<SpinMutex<Bucket>, N>,
    /// Bucket `b` owns `slots` and `buffers` from `b * per_bucket`
    /// up to `(b + 1) * per_bucket`.
    slots: ArrayVec<SlotCell, N>,
    buffers: ArrayVec<Buffer, N>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}
impl<'c, H: Hart, D: BlockDevice, const N: usize> BufferCache<'c, H, D, N> {
    pub fn new(
        cpus: &'c Cpus<H>,
        disk: D,
        config: BcacheConfig,
    ) -> Result<BufferCache<'c, H, D, N>, ConfigError> {
        let BcacheConfig { nbucket, nbuf } = config;
        if nbucket == 0 {
            return Err(ConfigError::NoBuckets);
        } else if nbuf > N {
            return Err(ConfigError::TooManyBuffers {
                requested: nbuf,
                max: N,
            });
        } else if nbucket > nbuf {
            return Err(ConfigError::BucketsExceedBuffers { nbucket, nbuf });
        }

        let per_bucket = nbuf / nbucket;
        let mut cache = BufferCache {
            cpus,
            disk,
            per_bucket,
            buckets: ArrayVec::new(),
            slots: ArrayVec::new(),
            buffers: ArrayVec::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };
        for _ in 0..nbucket {
            cache.buckets.push(SpinMutex::new(Bucket {
                head: Link {
                    prev: HEAD,
                    next: HEAD,
                },
            }));
            for _ in 0..per_bucket {
                cache.slots.push(SlotCell::new());
                cache.buffers.push(Buffer::new());
            }
        }

        // Create linked list of buffers
        for b in 0..nbucket {
            let intr = InterruptBlocker::new(cpus);
            let mut bucket = cache.lock_bucket(b, &intr);
            for i in 0..per_bucket {
                bucket.push_front(i);
            }
        }
        log::info!(
            "bcache: {} buckets of {} buffers",
            nbucket,
            per_bucket
        );

        Ok(cache)
    }
    pub fn disk(&self) -> &D {
        &self.disk
    }
    pub fn nbucket(&self) -> usize {
        self.buckets.len()
    }
    pub fn buffers_per_bucket(&self) -> usize {
        self.per_bucket
    }
    /// The bucket caching `blockno`.
    pub fn bucket_of(&self, blockno: u32) -> usize {
        blockno as usize % self.buckets.len()
    }
    fn buffer(&self, id: BufferId) -> &Buffer {
        &self.buffers[id.bucket() * self.per_bucket + id.slot()]
    }
    fn lock_bucket<'a>(
        &'a self,
        b: usize,
        intr: &'a InterruptBlocker<'_, H>,
    ) -> LockedBucket<'a> {
        let first = b * self.per_bucket;
        LockedBucket {
            bucket: self.buckets[b].lock(intr),
            slots: &self.slots[first..first + self.per_bucket],
        }
    }

    /// Look through the buffer cache for block on device dev.
    ///
    /// If not found, recycle the least recently used unused buffer
    /// of the block's bucket. In either case, return locked buffer.
    pub fn get(&self, dev: u32, blockno: u32) -> BufGuard<'_, 'c, H, D, N> {
        let b = self.bucket_of(blockno);

        let id = {
            let intr = InterruptBlocker::new(self.cpus);
            let mut bucket = self.lock_bucket(b, &intr);

            // Is the block already cached?
            if let Some(slot) = bucket.find(dev, blockno) {
                bucket.slot_mut(slot).refcnt += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                log::trace!("bget: hit {}/{} in bucket {} slot {}", dev, blockno, b, slot);
                BufferId::new(b, slot, dev, blockno)
            } else if let Some(slot) = bucket.find_unused() {
                let id = BufferId::new(b, slot, dev, blockno);
                let entry = bucket.slot_mut(slot);
                if let Some((old_dev, old_blockno)) = entry.block {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "bget: evicting {}/{} for {}/{} in bucket {}",
                        old_dev,
                        old_blockno,
                        dev,
                        blockno,
                        b
                    );
                }
                entry.block = Some((dev, blockno));
                entry.refcnt = 1;
                self.buffer(id).set_valid(false);
                self.misses.fetch_add(1, Ordering::Relaxed);
                id
            } else {
                panic!("bget: no buffers");
            }
        };

        // Bucket lock is dropped; now wait for the buffer itself.
        let data = self.buffer(id).lock.lock(self.cpus.hart());
        BufGuard {
            cache: self,
            id,
            data: ManuallyDrop::new(data),
        }
    }

    /// Return a locked buffer with the contents of the indicated block.
    pub fn read(&self, dev: u32, blockno: u32) -> BufGuard<'_, 'c, H, D, N> {
        let mut b = self.get(dev, blockno);
        if !b.is_valid() {
            self.disk.rw(dev, blockno, &mut b.data, false);
            self.buffer(b.id).set_valid(true);
        }
        b
    }

    /// Write b's contents to disk. Must be locked.
    pub fn write(&self, b: &mut BufGuard<'_, 'c, H, D, N>) {
        if !core::ptr::eq(b.cache, self) || !b.data.lock().holding(self.cpus.hart()) {
            panic!("bwrite");
        }
        self.disk.rw(b.dev(), b.blockno(), &mut b.data, true);
    }

    /// Release a locked buffer.
    /// Move to the head of the most-recently-used list.
    ///
    /// Same as dropping the guard.
    pub fn release(&self, b: BufGuard<'_, 'c, H, D, N>) {
        if !core::ptr::eq(b.cache, self) {
            panic!("brelse");
        }
        drop(b);
    }

    /// Keep a buffer cached without holding it locked.
    ///
    /// `id` must still name the block its buffer holds.
    pub fn pin(&self, id: BufferId) {
        let intr = InterruptBlocker::new(self.cpus);
        let mut bucket = self.lock_bucket(id.bucket(), &intr);
        match bucket.bound(id) {
            Some(slot) => slot.refcnt += 1,
            None => panic!("bpin"),
        }
    }

    /// Undo a [`pin`](BufferCache::pin).
    pub fn unpin(&self, id: BufferId) {
        let intr = InterruptBlocker::new(self.cpus);
        let mut bucket = self.lock_bucket(id.bucket(), &intr);
        // While the sleep lock is held, one reference is the holder's.
        let held = self.buffer(id).lock.is_locked();
        match bucket.bound(id) {
            Some(slot) if slot.refcnt > u32::from(held) => slot.refcnt -= 1,
            _ => panic!("bunpin"),
        }
    }

    /// Current reference count of a buffer.
    ///
    /// Zero once the buffer has been recycled for another block.
    pub fn refcnt(&self, id: BufferId) -> u32 {
        let intr = InterruptBlocker::new(self.cpus);
        let mut bucket = self.lock_bucket(id.bucket(), &intr);
        bucket.bound(id).map_or(0, |slot| slot.refcnt)
    }

    pub fn stats(&self) -> BcacheStats {
        BcacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            lock: self
                .buckets
                .iter()
                .map(SpinMutex::stats)
                .fold(LockStats::default(), |a, b| a + b),
        }
    }

    /// Called once the sleep lock of `id` has been let go.
    fn put(&self, id: BufferId) {
        let intr = InterruptBlocker::new(self.cpus);
        let mut bucket = self.lock_bucket(id.bucket(), &intr);

        let slot = bucket.slot_mut(id.slot());
        if slot.refcnt == 0 {
            panic!("brelse: refcnt");
        }
        slot.refcnt -= 1;
        if slot.refcnt == 0 {
            // No one is waiting for it.
            bucket.unlink(id.slot());
            bucket.push_front(id.slot());
        }
    }
}

/// A buffer locked for the current context, holding one reference.
///
/// Dropping it releases the buffer.
pub struct BufGuard<'b, 'c, H: Hart, D: BlockDevice, const N: usize> {
    cache: &'b BufferCache<'c, H, D, N>,
    id: BufferId,
    data: ManuallyDrop<SleeplockGuard<'b, [u8; BSIZE]>>,
}
impl<'b, 'c, H: Hart, D: BlockDevice, const N: usize> BufGuard<'b, 'c, H, D, N> {
    pub fn id(&self) -> BufferId {
        self.id
    }
    pub fn dev(&self) -> u32 {
        self.id.dev()
    }
    pub fn blockno(&self) -> u32 {
        self.id.blockno()
    }
    /// Has data been read from disk?
    pub fn is_valid(&self) -> bool {
        self.cache.buffer(self.id).is_valid()
    }
}
impl<'b, 'c, H: Hart, D: BlockDevice, const N: usize> Deref for BufGuard<'b, 'c, H, D, N> {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
impl<'b, 'c, H: Hart, D: BlockDevice, const N: usize> DerefMut for BufGuard<'b, 'c, H, D, N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}
impl<'b, 'c, H: Hart, D: BlockDevice, const N: usize> Drop for BufGuard<'b, 'c, H, D, N> {
    fn drop(&mut self) {
        if !self.data.lock().holding(self.cache.cpus.hart()) {
            panic!("brelse");
        }
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.cache.put(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hal::hardware::ramdisk::RamDisk, hal::host::HostHart, NCPU};
    use std::{
        mem::size_of,
        sync::atomic::{AtomicBool, AtomicUsize},
        thread,
    };

    const DEV: u32 = 1;

    /// Bucket and slot, whichever block is in there.
    fn place(id: BufferId) -> (usize, usize) {
        (id.bucket(), id.slot())
    }

    fn cpus() -> Cpus<HostHart> {
        Cpus::new(HostHart::new(), NCPU).unwrap()
    }

    /// Two buckets of three buffers: even blocks share bucket 0.
    fn small<'c>(
        cpus: &'c Cpus<HostHart>,
        image: &'c mut [u8],
    ) -> BufferCache<'c, HostHart, RamDisk<'c>, 6> {
        let disk = unsafe { RamDisk::new(image) };
        BufferCache::new(cpus, disk, BcacheConfig { nbucket: 2, nbuf: 6 }).unwrap()
    }

    #[test]
    fn bad_configs() {
        let cpus = cpus();
        let mut image = vec![0u8; BSIZE];
        let mut new = |nbucket, nbuf| {
            let disk = unsafe { RamDisk::new(&mut image) };
            BufferCache::<_, _, 6>::new(&cpus, disk, BcacheConfig { nbucket, nbuf })
                .err()
        };
        assert_eq!(new(0, 6), Some(ConfigError::NoBuckets));
        assert_eq!(
            new(2, 7),
            Some(ConfigError::TooManyBuffers {
                requested: 7,
                max: 6
            })
        );
        assert_eq!(
            new(4, 3),
            Some(ConfigError::BucketsExceedBuffers { nbucket: 4, nbuf: 3 })
        );
        assert_eq!(new(4, 6), None);
    }

    #[test]
    fn default_split() {
        let cpus = cpus();
        let mut image = vec![0u8; BSIZE];
        let disk = unsafe { RamDisk::new(&mut image) };
        let cache: BufferCache<_, _> =
            BufferCache::new(&cpus, disk, BcacheConfig::default()).unwrap();
        assert_eq!(cache.nbucket(), NBUCKET);
        assert_eq!(cache.buffers_per_bucket(), NBUF / NBUCKET);
        assert_eq!(cache.bucket_of(15), 1);
    }

    #[test]
    fn slot_metadata_is_not_per_bucket_capacity() {
        type Cache = BufferCache<'static, HostHart, RamDisk<'static>>;
        let overhead = size_of::<Cache>() - NBUF * size_of::<Buffer>();
        assert!(overhead < NBUF * 128, "{} bytes of bookkeeping", overhead);
    }

    #[test]
    fn fresh_bucket_recycles_lowest_slot_first() {
        let cpus = cpus();
        let mut image = vec![0u8; BSIZE];
        let cache = small(&cpus, &mut image);
        let intr = InterruptBlocker::new(&cpus);
        let bucket = cache.lock_bucket(0, &intr);
        assert_eq!(bucket.recency(), vec![2, 1, 0]);
        assert_eq!(bucket.find_unused(), Some(0));
    }

    #[test]
    fn release_moves_to_front() {
        let cpus = cpus();
        let mut image = vec![0u8; BSIZE];
        let cache = small(&cpus, &mut image);
        let intr = InterruptBlocker::new(&cpus);
        let mut bucket = cache.lock_bucket(1, &intr);
        bucket.unlink(0);
        bucket.push_front(0);
        assert_eq!(bucket.recency(), vec![0, 2, 1]);
        bucket.unlink(2);
        bucket.push_front(2);
        assert_eq!(bucket.recency(), vec![2, 0, 1]);
    }

    #[test]
    fn read_goes_to_disk_once() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        image[3 * BSIZE] = 42;
        let cache = small(&cpus, &mut image);

        let b = cache.read(DEV, 3);
        assert!(b.is_valid());
        assert_eq!(b[0], 42);
        let id = b.id();
        assert_eq!(id.bucket(), 1);
        cache.release(b);

        let b = cache.read(DEV, 3);
        assert_eq!(b.id(), id);
        assert_eq!(b[0], 42);
        drop(b);

        assert_eq!(cache.disk().reads(), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.evictions), (1, 1, 0));
        assert_eq!(cache.refcnt(id), 0);
    }

    #[test]
    fn devices_do_not_share_buffers() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);

        let a = cache.get(1, 4);
        let b = cache.get(2, 4);
        assert_ne!(place(a.id()), place(b.id()));
        assert_eq!((b.dev(), b.blockno()), (2, 4));
    }

    #[test]
    fn write_then_read_back() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        {
            let cache = small(&cpus, &mut image);

            let mut b = cache.read(DEV, 5);
            b[..5].copy_from_slice(b"hello");
            cache.write(&mut b);
            cache.release(b);

            // Push block 5 out of bucket 1.
            let held: Vec<_> = [1, 3, 7].iter().map(|&n| cache.get(DEV, n)).collect();
            assert_eq!(cache.stats().evictions, 1);
            drop(held);

            let b = cache.read(DEV, 5);
            assert_eq!(&b[..5], b"hello");
            assert_eq!(cache.disk().writes(), 1);
        }
        assert_eq!(&image[5 * BSIZE..5 * BSIZE + 5], b"hello");
    }

    #[test]
    fn recycles_least_recently_released() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);

        let places: Vec<_> = [0, 2, 4]
            .iter()
            .map(|&n| {
                let b = cache.get(DEV, n);
                place(b.id())
            })
            .collect();
        // Touch block 0 again, so block 2 is now the oldest.
        drop(cache.get(DEV, 0));

        let b6 = cache.get(DEV, 6);
        assert_eq!(place(b6.id()), places[1]);
        drop(b6);
        let b8 = cache.get(DEV, 8);
        assert_eq!(place(b8.id()), places[2]);
        drop(b8);
        let b10 = cache.get(DEV, 10);
        assert_eq!(place(b10.id()), places[0]);
        drop(b10);

        // Bucket 1 was never involved.
        let intr = InterruptBlocker::new(&cpus);
        assert_eq!(cache.lock_bucket(1, &intr).recency(), vec![2, 1, 0]);
    }

    #[test]
    fn full_bucket_reuses_the_released_buffer() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);

        let b0 = cache.get(DEV, 0);
        let b2 = cache.get(DEV, 2);
        let b4 = cache.get(DEV, 4);
        // Bucket 1 still has room, but block 6 can't use it.
        let _b1 = cache.get(DEV, 1);

        let freed = place(b2.id());
        cache.release(b2);
        let b6 = cache.get(DEV, 6);
        assert_eq!(place(b6.id()), freed);
        assert!(!b6.is_valid());
        drop((b0, b4, b6));
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn full_bucket_is_fatal() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);

        let _held: Vec<_> = [0, 2, 4].iter().map(|&n| cache.get(DEV, n)).collect();
        cache.get(DEV, 6);
    }

    #[test]
    fn pinned_buffers_are_not_recycled() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);

        let b = cache.read(DEV, 0);
        let pinned = b.id();
        cache.pin(pinned);
        drop(b);
        assert_eq!(cache.refcnt(pinned), 1);

        for n in [2, 4, 6, 8] {
            assert_ne!(place(cache.get(DEV, n).id()), place(pinned));
        }

        cache.unpin(pinned);
        assert_eq!(cache.refcnt(pinned), 0);
        // Still cached after unpinning.
        let b = cache.read(DEV, 0);
        assert_eq!(b.id(), pinned);
        assert_eq!(cache.disk().reads(), 1);
    }

    #[test]
    #[should_panic(expected = "bunpin")]
    fn unpin_below_zero() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);

        let id = cache.get(DEV, 0).id();
        cache.unpin(id);
    }

    #[test]
    #[should_panic(expected = "bunpin")]
    fn unpin_cannot_take_the_holders_reference() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);

        let b = cache.get(DEV, 0);
        cache.unpin(b.id());
    }

    /// Cache block 0, then fill its bucket with 2, 4 and 6 so block 0
    /// is recycled. Returns the old id of block 0 and the holders.
    fn evict_block_0<'b, 'c>(
        cache: &'b BufferCache<'c, HostHart, RamDisk<'c>, 6>,
    ) -> (BufferId, Vec<BufGuard<'b, 'c, HostHart, RamDisk<'c>, 6>>) {
        let b = cache.read(DEV, 0);
        let id = b.id();
        cache.pin(id);
        drop(b);
        cache.unpin(id);

        let held: Vec<_> = [2, 4, 6].iter().map(|&n| cache.get(DEV, n)).collect();
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.refcnt(id), 0);
        (id, held)
    }

    #[test]
    #[should_panic(expected = "bunpin")]
    fn unpin_after_recycle() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);

        let (old, held) = evict_block_0(&cache);
        let reused = held.iter().find(|b| place(b.id()) == place(old)).unwrap();
        assert_eq!(cache.refcnt(reused.id()), 1);
        cache.unpin(old);
    }

    #[test]
    #[should_panic(expected = "bpin")]
    fn pin_after_recycle() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);

        let (old, held) = evict_block_0(&cache);
        drop(held);
        let b = cache.get(DEV, 0);
        assert_ne!(place(b.id()), place(old));
        drop(b);
        cache.pin(old);
    }

    #[test]
    fn write_without_the_lock_is_fatal() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);

        let mut b = cache.read(DEV, 2);
        let result = thread::scope(|s| s.spawn(|| cache.write(&mut b)).join());
        assert!(result.is_err());
        assert_eq!(cache.disk().writes(), 0);
    }

    #[test]
    fn release_without_the_lock_is_fatal() {
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);

        let b = cache.read(DEV, 2);
        let id = b.id();
        let result = thread::scope(|s| s.spawn(move || drop(b)).join());
        assert!(result.is_err());
        assert_eq!(cache.refcnt(id), 1);
    }

    #[test]
    fn one_holder_at_a_time() {
        const THREADS: usize = 4;
        const ROUNDS: usize = 200;
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        let cache = small(&cpus, &mut image);
        let inside = AtomicBool::new(false);
        let max_refs = AtomicUsize::new(0);

        thread::scope(|s| {
            for cpu in 0..THREADS {
                let (cache, inside, max_refs) = (&cache, &inside, &max_refs);
                s.spawn(move || {
                    HostHart::set_cpu(cpu);
                    let hart = HostHart::new();
                    for _ in 0..ROUNDS {
                        let mut b = cache.read(DEV, 7);
                        assert!(!inside.swap(true, Ordering::SeqCst));
                        max_refs.fetch_max(cache.refcnt(b.id()) as usize, Ordering::Relaxed);
                        let n = u64::from_le_bytes(b[..8].try_into().unwrap());
                        hart.yield_now();
                        b[..8].copy_from_slice(&(n + 1).to_le_bytes());
                        inside.store(false, Ordering::SeqCst);
                        cache.release(b);
                    }
                });
            }
        });

        let b = cache.read(DEV, 7);
        let n = u64::from_le_bytes(b[..8].try_into().unwrap());
        assert_eq!(n, (THREADS * ROUNDS) as u64);
        assert_eq!(cache.refcnt(b.id()), 1);
        assert!(max_refs.load(Ordering::Relaxed) <= THREADS);
        assert_eq!(cache.disk().reads(), 1);
    }

    #[test]
    fn churn_through_one_bucket() {
        const THREADS: usize = 3;
        const ROUNDS: usize = 300;
        const BLOCKS: [u32; 5] = [1, 3, 5, 7, 9];
        let cpus = cpus();
        let mut image = vec![0u8; 16 * BSIZE];
        for n in BLOCKS {
            image[n as usize * BSIZE] = n as u8;
        }
        let cache = small(&cpus, &mut image);

        thread::scope(|s| {
            for cpu in 0..THREADS {
                let cache = &cache;
                s.spawn(move || {
                    HostHart::set_cpu(cpu);
                    let hart = HostHart::new();
                    for round in 0..ROUNDS {
                        let n = BLOCKS[(round + cpu) % BLOCKS.len()];
                        let b = cache.read(DEV, n);
                        assert_eq!((b.dev(), b.blockno()), (DEV, n));
                        assert_eq!(b.id().bucket(), 1);
                        assert_eq!(b[0], n as u8);
                        hart.yield_now();
                        cache.release(b);
                    }
                });
            }
        });

        let intr = InterruptBlocker::new(&cpus);
        let bucket = cache.lock_bucket(1, &intr);
        for i in 0..cache.buffers_per_bucket() {
            assert_eq!(bucket.slot(i).refcnt, 0);
        }
        assert_eq!(
            cache.stats().hits + cache.stats().misses,
            (THREADS * ROUNDS) as u64
        );
    }
}
