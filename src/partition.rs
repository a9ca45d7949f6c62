//! Dataset decomposition.
//!
//! A coordinator sizes its worker group with [`effective_task_count`] and cuts
//! its buffer with [`split_contiguous`]. Partitions are contiguous and
//! balanced (sizes differ by at most one), so the default concatenating
//! combiner reassembles them in their original order.

/// Number of workers to spawn for `len` elements.
///
/// `min(configured, ceil(len / min_range), len)`, where an unset or zero
/// `min_range` places no extra limit. Returns `0` only for an empty dataset.
pub fn effective_task_count(configured: usize, min_range: Option<usize>, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let by_range = match min_range {
        Some(m) if m > 0 => len.div_ceil(m),
        _ => len,
    };
    configured.max(1).min(by_range).min(len)
}

/// Split `data` into exactly `parts` contiguous partitions.
///
/// The first `len % parts` partitions carry one extra element. `parts == 0`
/// yields no partitions and is only meaningful for empty input.
pub fn split_contiguous<T>(data: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    if parts == 0 {
        return Vec::new();
    }
    if parts == 1 {
        return vec![data];
    }
    let base = data.len() / parts;
    let extra = data.len() % parts;
    let mut it = data.into_iter();
    (0..parts)
        .map(|i| it.by_ref().take(base + usize::from(i < extra)).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_count_never_exceeds_elements() {
        assert_eq!(effective_task_count(8, None, 3), 3);
        assert_eq!(effective_task_count(2, None, 100), 2);
        assert_eq!(effective_task_count(0, None, 5), 1);
        assert_eq!(effective_task_count(4, None, 0), 0);
    }

    #[test]
    fn min_range_limits_task_count() {
        assert_eq!(effective_task_count(16, Some(10), 95), 10);
        assert_eq!(effective_task_count(16, Some(10), 5), 1);
        assert_eq!(effective_task_count(3, Some(10), 95), 3);
        assert_eq!(effective_task_count(16, Some(0), 5), 5);
    }

    #[test]
    fn split_is_balanced_and_covers_input_once() {
        for len in 0..40usize {
            for parts in 1..=len.max(1) {
                let data: Vec<usize> = (0..len).collect();
                let chunks = split_contiguous(data.clone(), parts);
                assert_eq!(chunks.len(), parts);
                let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
                let (lo, hi) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
                assert!(hi - lo <= 1, "unbalanced {sizes:?}");
                assert_eq!(chunks.concat(), data);
            }
        }
    }
}
