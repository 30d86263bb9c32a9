//! Resource pools for the xv6 kernel.
//!
//! - [`io::bio::BufferCache`]: disk blocks cached in a fixed set of
//!   buffers, split into buckets by block number, each bucket
//!   recycling its least recently used buffer.
//! - [`mem::kalloc::Kmem`]: whole 4096-byte physical pages handed
//!   out from per-CPU free lists, stealing from other CPUs when the
//!   local list runs dry.
//!
//! Both are plain values owned by the kernel and shared by reference.
//! Platform facts (which CPU is running, interrupt state, how to give
//! up the CPU) come from a [`hal::Hart`].

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![allow(clippy::missing_safety_doc)]

pub mod arch;
pub mod hal;
pub mod io;
pub mod mem;
pub mod proc;
pub mod sync;

use core::fmt;

/// Maximum number of CPUs
pub const NCPU: usize = 8;
/// Max num of blocks any FS op writes
pub const MAXOPBLOCKS: usize = 10;
/// Size of disk block cache
pub const NBUF: usize = MAXOPBLOCKS * 3;
/// Number of buckets the disk block cache is split into
pub const NBUCKET: usize = 7;
/// Block size
pub const BSIZE: usize = 1024;

/// Bad parameters given when building a pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A CPU table needs at least one CPU.
    NoCpus,
    /// More CPUs than `NCPU`.
    TooManyCpus { requested: usize, max: usize },
    /// A buffer cache needs at least one bucket.
    NoBuckets,
    /// Every bucket must get at least one buffer.
    BucketsExceedBuffers { nbucket: usize, nbuf: usize },
    /// More buffers than the cache was built to hold.
    TooManyBuffers { requested: usize, max: usize },
    /// The physical range holds no whole page.
    EmptyRange { start: usize, end: usize },
}
impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoCpus => write!(f, "no cpus"),
            ConfigError::TooManyCpus { requested, max } => {
                write!(f, "{} cpus requested, at most {} supported", requested, max)
            }
            ConfigError::NoBuckets => write!(f, "buffer cache needs at least one bucket"),
            ConfigError::BucketsExceedBuffers { nbucket, nbuf } => {
                write!(f, "{} buckets cannot share {} buffers", nbucket, nbuf)
            }
            ConfigError::TooManyBuffers { requested, max } => {
                write!(f, "{} buffers requested, capacity is {}", requested, max)
            }
            ConfigError::EmptyRange { start, end } => {
                write!(f, "no whole page in {:#x}..{:#x}", start, end)
            }
        }
    }
}
