pub mod geometry;

/// Whether the permutation that sorts `sequence` ascending is odd.
///
/// Elements are compared by value; the sequence is expected to hold distinct values.
pub fn is_odd_permutation(sequence: &[usize]) -> bool {
    let mut inversions = 0usize;
    for i in 0..sequence.len() {
        for j in (i + 1)..sequence.len() {
            if sequence[i] > sequence[j] {
                inversions += 1;
            }
        }
    }
    inversions % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_counts_inversions() {
        assert!(!is_odd_permutation(&[0, 1, 2, 3]));
        assert!(is_odd_permutation(&[1, 0, 2, 3]));
        assert!(!is_odd_permutation(&[2, 0, 1]));
        assert!(is_odd_permutation(&[5, 3, 7]));
        assert!(!is_odd_permutation(&[]));
    }
}
