//! Growable contiguous storage shared by vectors and strings.
//!
//! All containers in this crate delegate allocation, growth, insertion and removal
//! bookkeeping to the type-erased engine in [`raw`]. The engine supports four kinds of
//! backing array: none, a borrowed read-only array, an owned heap array, and an
//! embedded fixed-capacity array that lives inside the container value itself.
//!
//! Every mutating operation is transactional: when it fails, either because an
//! allocation fails or because element code panics, the container is left exactly as
//! it was before the call.
//!
//! Each value kind comes in ownership tiers:
//!
//! | Kind   | Immutable, shareable | Mutable view  | Heap-owned    | Embedded         |
//! |--------|----------------------|---------------|---------------|------------------|
//! | vector | [`IVector<T>`]       | [`MVector`]   | [`DmVector`]  | [`SmVector<T,N>`]|
//! | string | [`IStr`]             | [`MStr`]      | [`DmStr`]     | [`SmStr<N>`]     |
//!
//! The concrete mutable types never convert into each other implicitly; functions
//! that only need to edit a container in place take the mutable view.

pub mod memory;
pub mod raw;
pub mod slice_ext;
pub mod string;
pub mod vector;

pub use slice_ext::SliceExt;
pub use string::{DmStr, IStr, MStr, SmStr};
pub use vector::{DmVector, IVector, MVector, SmVector};
pub use vextr_common::{Error, ErrorKind, Result};
