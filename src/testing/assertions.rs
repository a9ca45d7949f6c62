//! Assertion functions for testing stage outputs.

use std::cmp::Ordering;
use std::fmt::Debug;

/// Assert that two collections are equal in order and content.
///
/// # Panics
///
/// Panics if the collections differ in length or content.
///
/// # Example
///
/// ```
/// use stagebeam::testing::assert_collections_equal;
///
/// assert_collections_equal(&[1, 2, 3], &[1, 2, 3]);
/// ```
pub fn assert_collections_equal<T: Debug + PartialEq>(actual: &[T], expected: &[T]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Collection length mismatch:\n  Expected length: {}\n  Actual length: {}\n  \
         Expected: {expected:?}\n  Actual: {actual:?}",
        expected.len(),
        actual.len()
    );

    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert_eq!(
            a, e,
            "Collection mismatch at index {i}:\n  Expected: {e:?}\n  Actual: {actual:?}"
        );
    }
}

/// Assert that two collections hold the same elements with the same
/// multiplicities, ignoring order.
///
/// # Panics
///
/// Panics if the multisets differ.
///
/// # Example
///
/// ```
/// use stagebeam::testing::assert_collections_unordered_equal;
///
/// assert_collections_unordered_equal(&[3, 1, 1, 2], &[1, 2, 1, 3]);
/// ```
pub fn assert_collections_unordered_equal<T: Debug + Ord + Clone>(actual: &[T], expected: &[T]) {
    let mut a = actual.to_vec();
    let mut e = expected.to_vec();
    a.sort();
    e.sort();
    assert_eq!(
        a, e,
        "Collections differ as multisets:\n  Expected: {expected:?}\n  Actual: {actual:?}"
    );
}

/// Assert that `actual` is ordered by `cmp` (non-decreasing).
///
/// # Panics
///
/// Panics at the first adjacent pair that is out of order.
pub fn assert_sorted_by<T: Debug>(actual: &[T], cmp: impl Fn(&T, &T) -> Ordering) {
    for (i, pair) in actual.windows(2).enumerate() {
        assert!(
            cmp(&pair[0], &pair[1]) != Ordering::Greater,
            "Out of order at index {i}: {:?} before {:?}\n  Actual: {actual:?}",
            pair[0],
            pair[1]
        );
    }
}

/// Assert that `actual` is in ascending order.
///
/// # Panics
///
/// Panics if any adjacent pair is descending.
pub fn assert_sorted<T: Debug + Ord>(actual: &[T]) {
    assert_sorted_by(actual, T::cmp);
}
