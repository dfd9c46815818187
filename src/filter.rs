use crate::models::NOT_AVAILABLE;

/// Keep a listing when any allow-list token occurs, case-insensitively,
/// inside its location text.
///
/// Empty or placeholder locations never match: an unlocated listing cannot be
/// filtered by geography, so it is dropped.
pub fn keep_location(location: &str, allowed: &[String]) -> bool {
    let location = location.trim();
    if location.is_empty() || location == NOT_AVAILABLE {
        return false;
    }

    let location = location.to_lowercase();
    allowed
        .iter()
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
        .any(|token| location.contains(&token.to_lowercase()))
}
