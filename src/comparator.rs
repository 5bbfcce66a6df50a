//! Key comparators.
//!
//! Every ordered structure in the engine (skip list, table search, level
//! bookkeeping, compaction) orders user keys through the comparator chosen at
//! open time.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;

/// Total order over raw user keys.
pub trait Comparator: Send + Sync + Debug {
    /// Compares two user keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// A stable name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Shared comparator handle.
pub type ComparatorRef = Arc<dyn Comparator>;

/// Plain lexicographic byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &'static str {
        "sepkv.Bytewise"
    }
}

/// Orders decimal keys by their numeric value.
///
/// Keys made only of ASCII digits (at most 19 of them, so the value fits in a
/// `u64`) compare numerically, with byte order breaking ties such as `"07"`
/// vs `"7"`. Any pair where one side is not such a key falls back to byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericComparator;

impl NumericComparator {
    fn parse(key: &[u8]) -> Option<u64> {
        if key.is_empty() || key.len() > 19 {
            return None;
        }
        let mut value = 0u64;
        for &b in key {
            if !b.is_ascii_digit() {
                return None;
            }
            value = value * 10 + u64::from(b - b'0');
        }
        Some(value)
    }
}

impl Comparator for NumericComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (Self::parse(a), Self::parse(b)) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
            _ => a.cmp(b),
        }
    }

    fn name(&self) -> &'static str {
        "sepkv.Numeric"
    }
}

/// The default comparator handle.
pub fn bytewise() -> ComparatorRef {
    Arc::new(BytewiseComparator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytewise_order() {
        let cmp = BytewiseComparator;
        assert_eq!(cmp.compare(b"a", b"b"), Ordering::Less);
        assert_eq!(cmp.compare(b"10", b"9"), Ordering::Less);
        assert_eq!(cmp.compare(b"abc", b"abc"), Ordering::Equal);
    }

    #[test]
    fn test_numeric_order() {
        let cmp = NumericComparator;
        assert_eq!(cmp.compare(b"9", b"10"), Ordering::Less);
        assert_eq!(cmp.compare(b"5000", b"4999"), Ordering::Greater);
        assert_eq!(cmp.compare(b"42", b"42"), Ordering::Equal);
        // Same value, different spelling.
        assert_eq!(cmp.compare(b"07", b"7"), Ordering::Less);
    }

    #[test]
    fn test_numeric_falls_back_to_bytes() {
        let cmp = NumericComparator;
        assert_eq!(cmp.compare(b"key1", b"key2"), Ordering::Less);
        assert_eq!(cmp.compare(b"9", b"a"), Ordering::Less);
        assert_eq!(cmp.compare(b"99999999999999999999", b"1"), Ordering::Greater);
    }
}
