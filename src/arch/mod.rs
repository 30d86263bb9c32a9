//! Architecture-agnostic machine support.

pub mod mem;
pub mod trap;
