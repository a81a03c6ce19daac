//! Membership snapshot diffing
//!
//! Compares two full membership snapshots and reports only aggregate
//! added/removed counts; no identifier survives beyond the two snapshots
//! being compared.

use std::collections::HashSet;

/// Opaque stable identifiers captured at one poll cycle
pub type MembershipSnapshot = HashSet<String>;

/// Count elements of `a` that are not in `b`
fn difference_size(a: &MembershipSnapshot, b: &MembershipSnapshot) -> usize {
    a.iter().filter(|key| !b.contains(*key)).count()
}

/// Added/removed counts between consecutive snapshots
///
/// An empty previous snapshot means "no baseline yet" and yields `None`;
/// the first cycle reports only the total size.
pub fn diff(previous: &MembershipSnapshot, current: &MembershipSnapshot) -> Option<(usize, usize)> {
    if previous.is_empty() {
        return None;
    }
    Some((
        difference_size(current, previous),
        difference_size(previous, current),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(keys: &[&str]) -> MembershipSnapshot {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_one_added_one_removed() {
        let previous = snapshot(&["a", "b", "c"]);
        let current = snapshot(&["b", "c", "d"]);
        assert_eq!(diff(&previous, &current), Some((1, 1)));
    }

    #[test]
    fn test_empty_previous_means_no_baseline() {
        let previous = snapshot(&[]);
        let current = snapshot(&["a", "b"]);
        assert_eq!(diff(&previous, &current), None);
    }

    #[test]
    fn test_identical_snapshots() {
        let previous = snapshot(&["a", "b"]);
        assert_eq!(diff(&previous, &previous.clone()), Some((0, 0)));
    }

    #[test]
    fn test_everything_removed() {
        let previous = snapshot(&["a", "b"]);
        let current = snapshot(&[]);
        assert_eq!(diff(&previous, &current), Some((0, 2)));
    }
}
