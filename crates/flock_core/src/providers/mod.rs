//! Provider adapters
//!
//! Read-only clients for the third-party book data sources. Every adapter translates a provider
//! response into a typed partial record and degrades to [`Lookup::NotFound`] or
//! [`Lookup::Malformed`] instead of failing, so one misbehaving provider never aborts a batch.
pub mod errors;
pub mod google_books;
pub mod http;
pub mod isbndb;
pub mod nytimes;
pub mod openlibrary;
pub mod recommender;

use crate::subjects::RawSubject;

/// Outcome of a single provider lookup
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    /// 404, empty result list, or the record lacks the fields the caller needs
    NotFound,
    /// Response body did not have the expected shape
    Malformed(String),
    /// Usable data that fails a content filter, e.g. a box set
    Rejected(String),
}

impl<T> Lookup<T> {
    #[must_use]
    #[inline]
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound | Self::Malformed(_) | Self::Rejected(_) => None,
        }
    }

    #[must_use]
    #[inline]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    #[inline]
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Lookup<U> {
        match self {
            Self::Found(value) => Lookup::Found(f(value)),
            Self::NotFound => Lookup::NotFound,
            Self::Malformed(reason) => Lookup::Malformed(reason),
            Self::Rejected(reason) => Lookup::Rejected(reason),
        }
    }

    #[inline]
    pub fn and_then<U, F: FnOnce(T) -> Lookup<U>>(self, f: F) -> Lookup<U> {
        match self {
            Self::Found(value) => f(value),
            Self::NotFound => Lookup::NotFound,
            Self::Malformed(reason) => Lookup::Malformed(reason),
            Self::Rejected(reason) => Lookup::Rejected(reason),
        }
    }

    /// Short label for log fields
    #[must_use]
    #[inline]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::NotFound => "not_found",
            Self::Malformed(_) => "malformed",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Normalized, provider-independent view of one book, only alive for a single pipeline run.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRecord {
    pub title: String,
    pub author_name: Option<String>,
    /// OpenLibrary author id, e.g. `OL123A`
    pub author_olid: Option<String>,
    pub author_bio: String,
    pub isbn: Option<String>,
    /// OpenLibrary work id, e.g. `OL456W`
    pub olid: Option<String>,
    pub cover_url: Option<String>,
    pub description: String,
    pub raw_subjects: Vec<RawSubject>,
}

impl ProviderRecord {
    #[must_use]
    #[inline]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Trims and drops empty strings, the way every adapter reads optional text fields
#[must_use]
#[inline]
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}

/// Lowercased alphanumerics only, so punctuation such as the dots in initials is ignored
fn normalized(text: &str) -> String {
    text.chars()
        .filter(|character| character.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Determines if a provider string contains what we asked for, ignoring case and punctuation.
#[must_use]
#[inline]
pub fn matches_loosely(found: &str, wanted: &str) -> bool {
    let wanted = normalized(wanted);
    !wanted.is_empty() && normalized(found).contains(&wanted)
}

/// Same comparison as [`matches_loosely`], but the whole string has to match.
#[must_use]
#[inline]
pub fn matches_exactly(found: &str, wanted: &str) -> bool {
    let wanted = normalized(wanted);
    !wanted.is_empty() && normalized(found) == wanted
}
