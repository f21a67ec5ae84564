//! Batch partitioning.

use std::ops::Range;

/// Split `len` entities into ordered batches.
///
/// A `batch_size` of zero or less yields a single batch holding everything;
/// otherwise fixed-size chunks in input order, the last one possibly smaller.
pub fn partition(len: usize, batch_size: i64) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    if batch_size <= 0 {
        return vec![0..len];
    }

    let size = usize::try_from(batch_size).unwrap_or(usize::MAX);
    (0..len)
        .step_by(size)
        .map(|start| start..start.saturating_add(size).min(len))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(len: usize, batch_size: i64) -> Vec<usize> {
        partition(len, batch_size).into_iter().map(|r| r.len()).collect()
    }

    #[test]
    fn test_fixed_size_batches() {
        assert_eq!(sizes(7, 3), vec![3, 3, 1]);
        assert_eq!(partition(7, 3), vec![0..3, 3..6, 6..7]);
    }

    #[test]
    fn test_non_positive_batch_size_is_one_batch() {
        assert_eq!(sizes(7, 0), vec![7]);
        assert_eq!(sizes(7, -1), vec![7]);
    }

    #[test]
    fn test_batch_larger_than_input() {
        assert_eq!(sizes(2, 10), vec![2]);
    }

    #[test]
    fn test_empty_input() {
        assert!(partition(0, 3).is_empty());
        assert!(partition(0, 0).is_empty());
    }
}
