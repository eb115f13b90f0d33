//! Character-boundary truncation helpers used to keep the rolling summary
//! under `summary_max_tokens + slack`. Adapted from a char-cap technique
//! used for workspace-file injection (`truncate_per_file` /
//! `apply_total_cap`), generalized to cap by estimated tokens instead of a
//! fixed char budget.

use crate::estimator::TokenEstimator;

/// Truncate `text` to at most `max_tokens` as estimated by `estimator`,
/// cutting at a valid UTF-8 boundary and marking the cut.
pub fn cap_to_tokens(text: &str, max_tokens: usize, estimator: &dyn TokenEstimator) -> (String, bool) {
    if estimator.estimate(text) <= max_tokens {
        return (text.to_string(), false);
    }
    // Binary search the longest prefix (by char boundary) whose estimate fits.
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut lo = 0usize;
    let mut hi = chars.len();
    while lo < hi {
        let mid = (lo + hi).div_ceil(2);
        let boundary = chars.get(mid).map(|(i, _)| *i).unwrap_or(text.len());
        if estimator.estimate(&text[..boundary]) <= max_tokens {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    let boundary = chars.get(lo).map(|(i, _)| *i).unwrap_or(0);
    (format!("{}\n\n[SUMMARY_TRUNCATED]", &text[..boundary]), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::DefaultEstimator;

    #[test]
    fn no_truncation_under_budget() {
        let (out, truncated) = cap_to_tokens("short", 100, &DefaultEstimator);
        assert_eq!(out, "short");
        assert!(!truncated);
    }

    #[test]
    fn truncates_when_over_budget() {
        let long = "a".repeat(400);
        let (out, truncated) = cap_to_tokens(&long, 10, &DefaultEstimator);
        assert!(truncated);
        assert!(out.len() < long.len());
        assert!(out.contains("[SUMMARY_TRUNCATED]"));
    }
}
