//! Architecture model
//!
//! The machine modeled here is a single-CPU MIPS-style board with a
//! software-managed TLB and a direct-mapped kernel segment. Nothing in this
//! module touches real hardware; the point is that the memory-management and
//! trap contracts above it are bit-exact.

pub mod mips;
