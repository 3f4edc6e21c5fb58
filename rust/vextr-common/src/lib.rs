//! Core definitions (error taxonomy, result alias and verification macros) relied upon
//! by all vextr-* crates.

pub mod error;
pub mod result;

pub use error::{Error, ErrorKind, InterruptionReason};
pub use result::Result;
