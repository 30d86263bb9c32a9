//! Ramdisk that uses a region of memory as the disk image,
//! like the one loaded by qemu -initrd fs.img.

use super::BlockDevice;
use crate::BSIZE;
use core::{
    marker::PhantomData,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

pub struct RamDisk<'a> {
    base: NonNull<u8>,
    nblocks: usize,
    reads: AtomicUsize,
    writes: AtomicUsize,
    _image: PhantomData<&'a mut [u8]>,
}
impl<'a> RamDisk<'a> {
    /// Use `image` as the disk. Trailing bytes short of a whole block are ignored.
    ///
    /// # Safety
    ///
    /// Transfers for the same block must never overlap. That holds when
    /// the disk is only used through one buffer cache, which keeps each
    /// block under a single buffer's sleep lock.
    pub unsafe fn new(image: &'a mut [u8]) -> RamDisk<'a> {
        RamDisk {
            nblocks: image.len() / BSIZE,
            base: NonNull::new_unchecked(image.as_mut_ptr()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            _image: PhantomData,
        }
    }
    pub fn nblocks(&self) -> usize {
        self.nblocks
    }
    /// Number of blocks read from the disk so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
    /// Number of blocks written to the disk so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}
impl<'a> BlockDevice for RamDisk<'a> {
    fn rw(&self, _dev: u32, blockno: u32, data: &mut [u8; BSIZE], write: bool) {
        if blockno as usize >= self.nblocks {
            panic!("ramdiskrw: blockno too big");
        }

        unsafe {
            let block = self.base.as_ptr().add(blockno as usize * BSIZE);
            if write {
                core::ptr::copy_nonoverlapping(data.as_ptr(), block, BSIZE);
                self.writes.fetch_add(1, Ordering::Relaxed);
            } else {
                core::ptr::copy_nonoverlapping(block, data.as_mut_ptr(), BSIZE);
                self.reads.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
unsafe impl<'a> Sync for RamDisk<'a> {}
unsafe impl<'a> Send for RamDisk<'a> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_land_at_their_offset() {
        let mut image = vec![0u8; 4 * BSIZE];
        image[2 * BSIZE] = 0xab;
        let disk = unsafe { RamDisk::new(&mut image) };
        assert_eq!(disk.nblocks(), 4);

        let mut data = [0u8; BSIZE];
        disk.rw(1, 2, &mut data, false);
        assert_eq!(data[0], 0xab);

        data[1] = 0xcd;
        disk.rw(1, 3, &mut data, true);
        assert_eq!((disk.reads(), disk.writes()), (1, 1));
        drop(disk);
        assert_eq!(&image[3 * BSIZE..3 * BSIZE + 2], &[0xab, 0xcd]);
    }

    #[test]
    #[should_panic(expected = "ramdiskrw: blockno too big")]
    fn past_the_end() {
        let mut image = vec![0u8; BSIZE];
        let disk = unsafe { RamDisk::new(&mut image) };
        disk.rw(1, 1, &mut [0u8; BSIZE], false);
    }
}
