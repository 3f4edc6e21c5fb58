//! Page-granular memory for coroutine stacks.

#[cfg_attr(unix, path = "mmap_unix.rs")]
#[cfg_attr(not(unix), path = "mmap_fallback.rs")]
pub mod mmap;

pub mod stack;

pub use stack::StackPages;

#[cfg(test)]
mod tests;
