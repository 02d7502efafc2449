//! Title similarity scoring.
//!
//! Scores are normalized Levenshtein similarity on a `0..=100` scale:
//!
//! ```text
//! score = 100 × (1 − distance / max(len(a), len(b)))
//! ```
//!
//! Lengths and distances are counted in Unicode scalar values, so a CJK
//! title such as `我的暑假生活` has length 6.

/// Lowercase and drop all whitespace.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Similarity between a search keyword and a candidate title, in `[0, 100]`.
///
/// Two empty strings (after normalization) are a vacuous exact match.
pub fn score(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100.0;
    }

    let distance = strsim::levenshtein(&a, &b);
    (100.0 * (1.0 - distance as f64 / max_len as f64)).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "a",
        "essay",
        "Essay Draft",
        "我的暑假",
        "我的暑假生活",
        "难忘的一天",
        "My Summer 假期",
    ];

    #[test]
    fn identical_strings_score_100() {
        for s in SAMPLES.iter().filter(|s| !s.is_empty()) {
            assert_eq!(score(s, s), 100.0, "{}", s);
        }
    }

    #[test]
    fn both_empty_scores_100() {
        assert_eq!(score("", ""), 100.0);
        assert_eq!(score("  ", "\t"), 100.0);
    }

    #[test]
    fn one_empty_scores_zero() {
        assert_eq!(score("", "essay"), 0.0);
        assert_eq!(score("我的暑假", ""), 0.0);
    }

    #[test]
    fn symmetric_and_bounded() {
        for a in SAMPLES {
            for b in SAMPLES {
                let ab = score(a, b);
                assert_eq!(ab, score(b, a), "{:?} vs {:?}", a, b);
                assert!((0.0..=100.0).contains(&ab));
            }
        }
    }

    #[test]
    fn case_and_whitespace_insensitive() {
        assert_eq!(score("My Essay", "myessay"), 100.0);
    }

    #[test]
    fn cjk_prefix_match() {
        // distance 2 over max length 6
        let s = score("我的暑假", "我的暑假生活");
        assert!((s - 100.0 * (1.0 - 2.0 / 6.0)).abs() < 1e-9);
        assert!(s >= 50.0);
    }

    #[test]
    fn fewer_edits_score_higher() {
        let close = score("难忘的一天", "难忘的一天啊");
        let far = score("难忘的一天", "快乐的周末啊");
        assert!(close > far);
    }
}
