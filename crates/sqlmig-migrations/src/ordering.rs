//! The ordering relation over migration ids.
//!
//! Ids with a leading run of digits are ordered by that number; an id with a
//! numeric prefix sorts before one without; everything else falls back to
//! plain string comparison. So `"2" < "10"` and `"1_foo" < "10_bar"`, while
//! `"1-a"` and `"1-b"` compare as strings.
//!
//! The numeric prefix is compared as a digit string (leading zeros dropped,
//! shorter first), so arbitrarily long timestamps never overflow.

use std::cmp::Ordering;

/// Returns the leading run of ASCII digits in `id`, if any.
pub fn numeric_prefix(id: &str) -> Option<&str> {
    let end = id
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(id.len(), |(i, _)| i);
    if end == 0 {
        None
    } else {
        Some(&id[..end])
    }
}

/// Parses the numeric prefix of `id` as a 64-bit version number.
///
/// Returns `None` when the id has no numeric prefix or the prefix does not
/// fit in an `i64`.
///
/// # Examples
///
/// ```
/// use sqlmig_migrations::ordering::version_of;
///
/// assert_eq!(version_of("20160126_1100_create"), Some(20_160_126));
/// assert_eq!(version_of("create_users"), None);
/// ```
pub fn version_of(id: &str) -> Option<i64> {
    numeric_prefix(id)?.parse().ok()
}

fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compares two migration ids.
///
/// This is a total order, consistent with `==` on the ids themselves.
///
/// # Examples
///
/// ```
/// use std::cmp::Ordering;
/// use sqlmig_migrations::ordering::compare_ids;
///
/// assert_eq!(compare_ids("2", "10"), Ordering::Less);
/// assert_eq!(compare_ids("10_abc", "efg"), Ordering::Less);
/// assert_eq!(compare_ids("1-b", "1-a"), Ordering::Greater);
/// ```
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (numeric_prefix(a), numeric_prefix(b)) {
        (Some(x), Some(y)) => compare_digits(x, y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Returns `true` if `a` sorts strictly before `b`.
pub fn less(a: &str, b: &str) -> bool {
    compare_ids(a, b) == Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_less() {
        let cases = [
            ("1", "2", true),
            ("2", "1", false),
            ("1", "a", true),
            ("a", "1", false),
            ("a", "b", true),
            ("b", "a", false),
            ("1", "1", false),
            ("a", "a", false),
            ("2", "10", true),
            ("10", "2", false),
            ("1_foo", "10_bar", true),
            ("10_bar", "1_foo", false),
            ("20160126_1100", "20160126_1200", true),
            ("20160126_1200", "20160126_1100", false),
        ];
        for (a, b, expected) in cases {
            assert_eq!(less(a, b), expected, "less({a:?}, {b:?})");
        }
    }

    #[test]
    fn test_sort_mixed_ids() {
        let mut ids = vec![
            "efg", "120_cde", "35_cde", "10_abc", "4_abc", "3_efg", "2_cde", "1_abc",
        ];
        ids.sort_by(|a, b| compare_ids(a, b));
        assert_eq!(
            ids,
            vec!["1_abc", "2_cde", "3_efg", "4_abc", "10_abc", "35_cde", "120_cde", "efg"]
        );
    }

    #[test]
    fn test_equal_prefix_falls_back_to_string() {
        assert!(less("1-a", "1-b"));
        assert!(less("01_x", "1_x"));
        assert_eq!(compare_ids("007", "007"), Ordering::Equal);
    }

    #[test]
    fn test_long_prefix_does_not_overflow() {
        let huge = "123456789012345678901234567890_x";
        assert!(less("9_x", huge));
        assert_eq!(version_of(huge), None);
        assert!(numeric_prefix(huge).is_some());
    }

    #[test]
    fn test_numeric_prefix() {
        assert_eq!(numeric_prefix("123_create.sql"), Some("123"));
        assert_eq!(numeric_prefix("abc"), None);
        assert_eq!(numeric_prefix(""), None);
        assert_eq!(version_of("124.sql"), Some(124));
    }

    #[test]
    fn test_order_is_transitive_over_samples() {
        let ids = ["1", "01", "2", "10", "10a", "10b", "a", "b", "", "9z"];
        for a in ids {
            assert!(!less(a, a));
            for b in ids {
                if less(a, b) {
                    assert!(!less(b, a), "{a:?} vs {b:?}");
                }
                for c in ids {
                    if less(a, b) && less(b, c) {
                        assert!(less(a, c), "{a:?} < {b:?} < {c:?}");
                    }
                }
            }
        }
    }
}
