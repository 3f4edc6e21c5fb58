//! Growth policy of owned arrays.

/// Smallest number of item slots in a newly allocated array.
pub const CAPACITY_MIN: usize = 8;

/// Factor by which the capacity grows when an append does not fit.
pub const GROWTH_RATE: usize = 2;

/// Returns the capacity of the array that replaces one of `old_capacity` slots when
/// `required` slots are needed.
///
/// The result doubles the old capacity with a floor of [`CAPACITY_MIN`], and is never
/// less than `required`.
pub fn calculate_increased_capacity(old_capacity: usize, required: usize) -> usize {
    old_capacity
        .saturating_mul(GROWTH_RATE)
        .max(CAPACITY_MIN)
        .max(required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increased_capacity() {
        assert_eq!(calculate_increased_capacity(0, 1), CAPACITY_MIN);
        assert_eq!(calculate_increased_capacity(8, 9), 16);
        assert_eq!(calculate_increased_capacity(16, 100), 100);
        assert_eq!(calculate_increased_capacity(usize::MAX / 2 + 1, 3), usize::MAX);
    }
}
