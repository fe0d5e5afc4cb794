//! Deterministic selection of one value from a variable's available set.

/// Pick exactly one value from `available`.
///
/// Precedence is a hard contract: the prior selection when it is still
/// among the available values, otherwise the default selection when it is,
/// otherwise the first available value in the collection's order. Returns
/// `None` only when `available` is empty.
pub fn select_value<'a>(
    available: &[&'a str],
    prev_selection: Option<&str>,
    default_selection: Option<&str>,
) -> Option<&'a str> {
    for candidate in [prev_selection, default_selection].into_iter().flatten() {
        if let Some(found) = available.iter().find(|value| **value == candidate) {
            return Some(found);
        }
    }
    available.first().copied()
}
