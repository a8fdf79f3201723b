//! Fuzzy string similarity used to match headers against the outline

/// Normalized Indel similarity in `0..=100`
///
/// `2 * lcs(a, b) / (len(a) + len(b)) * 100`, computed over chars.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// Best `ratio` of the shorter string against every equal-length window of
/// the longer one
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };

    if short.is_empty() {
        return if long.is_empty() { 100.0 } else { 0.0 };
    }
    if short.len() == long.len() {
        return ratio_chars(short, long);
    }

    let mut best = 0.0f64;
    for start in 0..=(long.len() - short.len()) {
        let score = ratio_chars(short, &long[start..start + short.len()]);
        if score > best {
            best = score;
            if best >= 100.0 {
                break;
            }
        }
    }
    best
}

/// `partial_ratio` after lowercasing both sides
pub fn partial_ratio_ci(a: &str, b: &str) -> f64 {
    partial_ratio(&a.to_lowercase(), &b.to_lowercase())
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    2.0 * lcs_len(a, b) as f64 / total as f64 * 100.0
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
