//! Pipeline settings
//!
//! Plain typed settings consumed by the pipelines. The worker binary fills them from flags and
//! environment variables; defaults mirror what production runs with.

/// Box-set, collection and study-guide markers that disqualify an ISBNdb candidate
pub const DEFAULT_EXCLUDED_TITLE_TERMS: [&str; 12] = [
    "Trilogy",
    "Box Set",
    "Boxed Set",
    "Boxset",
    "Collection",
    "Study Guide",
    "Summary",
    "SparkNotes",
    "CliffsNotes",
    "Omnibus",
    "Complete Series",
    "Books 1-",
];

/// Quality gates. The values were tuned by trial, hence configurable.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualitySettings {
    /// Cover payloads below this many bytes are treated as placeholders
    pub min_cover_bytes: usize,
    /// Uploaded covers are resized to fit a square of this many pixels
    pub cover_size: u32,
    pub excluded_title_terms: Vec<String>,
}

impl Default for QualitySettings {
    #[inline]
    fn default() -> Self {
        Self {
            min_cover_bytes: 5_000,
            cover_size: 400,
            excluded_title_terms: DEFAULT_EXCLUDED_TITLE_TERMS
                .iter()
                .map(|term| (*term).to_owned())
                .collect(),
        }
    }
}

/// Base URLs and credentials of the external providers
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub isbndb_url: String,
    pub isbndb_key: String,
    pub openlibrary_url: String,
    pub google_books_url: String,
    pub nytimes_url: String,
    pub nytimes_key: String,
    pub openai_url: String,
    pub openai_key: String,
    pub openai_model: String,
}

impl Default for ProviderSettings {
    #[inline]
    fn default() -> Self {
        Self {
            isbndb_url: "https://api2.isbndb.com".to_owned(),
            isbndb_key: String::new(),
            openlibrary_url: "https://openlibrary.org".to_owned(),
            google_books_url: "https://www.googleapis.com/books/v1".to_owned(),
            nytimes_url: "https://api.nytimes.com/svc/books/v3".to_owned(),
            nytimes_key: String::new(),
            openai_url: "https://api.openai.com/v1".to_owned(),
            openai_key: String::new(),
            openai_model: "gpt-4o-mini".to_owned(),
        }
    }
}

/// Everything the pipelines are configured with
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSettings {
    pub providers: ProviderSettings,
    pub quality: QualitySettings,
}

impl PipelineSettings {
    #[must_use]
    #[inline]
    pub const fn new(providers: ProviderSettings, quality: QualitySettings) -> Self {
        Self { providers, quality }
    }
}
