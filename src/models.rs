use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Placeholder for a text field no extraction strategy could fill.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contacts {
    pub emails: BTreeSet<String>,
    pub phones: BTreeSet<String>,
}

impl Contacts {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.phones.is_empty()
    }
}

/// A listing assembled from one search-results card and its detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCandidate {
    pub title: String,
    pub company: String,
    pub location: String,
    pub detail_link: Option<String>,
    pub easy_apply_link: Option<String>,
    pub description: String,
    pub contacts: Contacts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredListing {
    pub id: i64,
    pub title: String,
    pub company: String,
    pub location: String,
    pub detail_link: String,
    pub easy_apply: Option<String>,
    pub description: String,
    pub contacts: Contacts,
    pub captured_at: NaiveDateTime,
}
