use regex::Regex;
use std::sync::LazyLock;

use crate::models::Contacts;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern compiles")
});

// Optional "+CC", then 2-4 groups of 2-4 digits joined by spaces or hyphens.
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[ \t-]?)?\b\d{2,4}(?:[ \t-]\d{2,4}){1,3}\b").expect("phone pattern compiles")
});

/// Pull email addresses and phone-number-shaped tokens out of free text.
///
/// Best effort: anything shaped like a phone number is kept, so reference
/// numbers and dates can show up in `phones`.
pub fn extract_contacts(text: &str) -> Contacts {
    let emails = EMAIL
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();
    let phones = PHONE
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .collect();

    Contacts { emails, phones }
}
