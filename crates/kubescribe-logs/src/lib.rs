//! Log tailing for kubescribe
//!
//! This crate turns classified pod events into per-container log files:
//! line filtering, secret masking, tail sessions and the registry that owns them.

mod filter;
mod mask;
mod registry;
mod tail;

#[cfg(test)]
mod testing;

pub use filter::LineFilter;
pub use mask::{MASK, MaskError, Masker};
pub use registry::TailRegistry;
pub use tail::{Tail, TailError, TailHandle, TailOptions, output_dir};

// Re-export types used in our public API
pub use kubescribe_types::{QueuedTarget, Target, TargetId};
