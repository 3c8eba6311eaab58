use std::collections::BTreeMap;

/// Shannon entropy in bits over the string's character distribution.
///
/// Counts are accumulated in character order so the floating-point sum is
/// identical for any permutation of the same characters.
pub fn shannon_entropy(s: &str) -> f64 {
    let mut counts: BTreeMap<char, usize> = BTreeMap::new();
    let mut total = 0usize;
    for c in s.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let len = total as f64;
    let entropy = counts
        .values()
        .map(|&n| {
            let p = n as f64 / len;
            -p * p.log2()
        })
        .sum::<f64>();

    // a single repeated symbol gives -1*log2(1) = -0.0
    entropy.max(0.0)
}
