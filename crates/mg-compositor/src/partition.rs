use mg_image::Region;

use crate::error::CompositeError;

/// `getPieceRange(total, i, n)`: the `i`-th of `n` nearly-equal contiguous
/// slices of `[0, total)`. Used both by Direct-Send's partitioning and by
/// the 2-3 tree's "distributed evenly" fallback for unequal sub-groups.
pub fn piece_range(total: usize, i: usize, n: usize) -> Result<Region, CompositeError> {
    if n == 0 || i >= n {
        return Err(CompositeError::PartitionOutOfRange { index: i, count: n });
    }
    let base = total / n;
    let remainder = total % n;
    let begin = i * base + i.min(remainder);
    let extra = if i < remainder { 1 } else { 0 };
    Ok(Region::new(begin, begin + base + extra))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evenly_divisible_total_splits_equally() {
        for i in 0..4 {
            assert_eq!(piece_range(100, i, 4).unwrap().len(), 25);
        }
    }

    #[test]
    fn remainder_lands_on_leading_pieces() {
        // 10 into 3: sizes 4,3,3 (remainder absorbed by the leading pieces)
        let sizes: Vec<usize> = (0..3).map(|i| piece_range(10, i, 3).unwrap().len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        let total: usize = sizes.iter().sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn pieces_form_a_contiguous_partition() {
        let mut prev_end = 0;
        for i in 0..7 {
            let r = piece_range(53, i, 7).unwrap();
            assert_eq!(r.begin, prev_end);
            prev_end = r.end;
        }
        assert_eq!(prev_end, 53);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        assert!(matches!(piece_range(10, 3, 3), Err(CompositeError::PartitionOutOfRange { .. })));
    }
}
