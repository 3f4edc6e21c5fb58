//! Python-style indexing and search helpers shared by every vector type.

use std::ops::Range;

use vextr_common::{Error, Result};

/// Item access with negative indices counted from the end (`-1` is the last item).
pub trait SliceExt<T> {
    /// Returns the item at `index`, or an index error.
    fn at(&self, index: isize) -> Result<&T>;

    fn at_mut(&mut self, index: isize) -> Result<&mut T>;

    /// Returns the items in `begin..end`; both bounds may be negative and are clipped
    /// to the slice, so this never fails.
    fn slice_at(&self, begin: isize, end: isize) -> &[T];

    /// Position of the first item equal to `value`.
    fn index_of(&self, value: &T) -> Option<usize>
    where
        T: PartialEq;

    /// Position of the last item equal to `value`.
    fn last_index_of(&self, value: &T) -> Option<usize>
    where
        T: PartialEq;
}

/// Resolves a possibly negative index against `len`.
pub fn translate_index(index: isize, len: usize) -> Result<usize> {
    let resolved = if index < 0 {
        index.checked_add(len as isize)
    } else {
        Some(index)
    };
    match resolved {
        Some(i) if i >= 0 && (i as usize) < len => Ok(i as usize),
        _ => Err(Error::index(index, len)),
    }
}

/// Resolves and clips a pair of possibly negative bounds against `len`.
pub fn translate_range(begin: isize, end: isize, len: usize) -> Range<usize> {
    let ilen = len as isize;
    let clip = |i: isize| (if i < 0 { i.saturating_add(ilen) } else { i }).clamp(0, ilen) as usize;
    let begin = clip(begin);
    begin..clip(end).max(begin)
}

impl<T> SliceExt<T> for [T] {
    fn at(&self, index: isize) -> Result<&T> {
        let i = translate_index(index, self.len())?;
        Ok(&self[i])
    }

    fn at_mut(&mut self, index: isize) -> Result<&mut T> {
        let i = translate_index(index, self.len())?;
        Ok(&mut self[i])
    }

    fn slice_at(&self, begin: isize, end: isize) -> &[T] {
        &self[translate_range(begin, end, self.len())]
    }

    fn index_of(&self, value: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.iter().position(|v| v == value)
    }

    fn last_index_of(&self, value: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.iter().rposition(|v| v == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_indices() {
        let items = [10, 20, 30];
        assert_eq!(*items.at(-1).unwrap(), 30);
        assert_eq!(*items.at(-3).unwrap(), 10);
        assert!(items.at(-4).is_err());
        assert!(items.at(3).is_err());
        assert!(items.at(isize::MIN).is_err());
    }

    #[test]
    fn test_slice_at_clips() {
        let items = [1, 2, 3, 4, 5];
        assert_eq!(items.slice_at(1, -1), [2, 3, 4]);
        assert_eq!(items.slice_at(-100, 2), [1, 2]);
        assert_eq!(items.slice_at(4, 1), [] as [i32; 0]);
        assert_eq!(items.slice_at(0, isize::MAX), items);
    }

    #[test]
    fn test_search() {
        let items = [1, 2, 1, 3];
        assert_eq!(items.index_of(&1), Some(0));
        assert_eq!(items.last_index_of(&1), Some(2));
        assert_eq!(items.index_of(&7), None);
    }
}
