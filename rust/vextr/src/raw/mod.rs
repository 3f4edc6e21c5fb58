//! The type-erased storage engine behind every vector and string.
//!
//! [`RawVextr`] describes one contiguous array: where it lives ([`Storage`]), how many
//! items are in use and how many fit. Two specializations build on it:
//!
//! - [`RawTrivialVextr`] moves items with plain memory copies and can keep a NUL
//!   terminator past the last item (used by strings);
//! - [`RawComplexVextr`] routes every item copy and destruction through a [`TypeOps`]
//!   record so that item types with drop glue or fallible clones are handled once,
//!   not per instantiation.
//!
//! Any change of the backing array goes through a transaction that either commits as
//! a whole or leaves the buffer untouched.
//!
//! Most functions here are `unsafe`: callers must pass the [`TypeOps`] (or
//! [`ItemLayout`]) of the item type actually stored in the buffer, and the
//! [`EmbeddedArray`] that belongs to the container owning the buffer.

mod base;
mod complex;
mod descriptor;
pub mod policy;
mod transaction;
mod trivial;
mod type_ops;

pub use base::{EmbeddedArray, ItemLayout, RawVextr, Storage};
pub use complex::{RawComplexVextr, Source, SourceMode};
pub use descriptor::{Descriptor, DescriptorFlags};
pub use trivial::RawTrivialVextr;
pub use type_ops::TypeOps;

#[cfg(test)]
mod tests;
