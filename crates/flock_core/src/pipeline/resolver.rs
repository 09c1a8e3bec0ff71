//! Multi-provider resolution
//!
//! Runs ISBNdb, then OpenLibrary, then Google Books for one candidate and merges what they found
//! into a single [`ProviderRecord`]. Each provider only contributes the fields it is trusted for.
use crate::providers::google_books::GoogleBooksClient;
use crate::providers::isbndb::IsbnDbClient;
use crate::providers::openlibrary::{OpenLibraryAuthor, OpenLibraryClient};
use crate::providers::{Lookup, ProviderRecord, non_empty};
use crate::reconcile::editions::select_edition;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What the caller already knows about a candidate before any provider is asked
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hint {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub olid: Option<String>,
    pub cover_url: Option<String>,
    pub description: Option<String>,
}

impl Hint {
    #[must_use]
    #[inline]
    pub fn titled(title: &str, author: &str) -> Self {
        Self {
            title: non_empty(Some(title)),
            author: non_empty(Some(author)),
            ..Self::default()
        }
    }

    fn label(&self) -> &str {
        self.title
            .as_deref()
            .or(self.isbn.as_deref())
            .or(self.olid.as_deref())
            .unwrap_or_default()
    }
}

/// Partial records as each provider returned them
#[derive(Debug, Default)]
struct Findings {
    isbndb: Option<ProviderRecord>,
    openlibrary: Option<ProviderRecord>,
    google: Option<ProviderRecord>,
    author: Option<OpenLibraryAuthor>,
}

pub struct Resolver {
    isbndb: Arc<IsbnDbClient>,
    openlibrary: OpenLibraryClient,
    google: GoogleBooksClient,
}

impl Resolver {
    #[must_use]
    #[inline]
    pub const fn new(
        isbndb: Arc<IsbnDbClient>,
        openlibrary: OpenLibraryClient,
        google: GoogleBooksClient,
    ) -> Self {
        Self {
            isbndb,
            openlibrary,
            google,
        }
    }

    /// `Rejected` when ISBNdb identifies the candidate as a box set or similar, `NotFound` when
    /// no provider knows it.
    #[instrument(skip_all, fields(candidate = %hint.label()))]
    #[allow(clippy::missing_inline_in_public_items, reason = "Called once per item")]
    pub async fn resolve(&self, hint: &Hint) -> Lookup<ProviderRecord> {
        let mut findings = Findings::default();

        match self.from_isbndb(hint).await {
            Lookup::Found(record) => findings.isbndb = Some(record),
            Lookup::Rejected(reason) => {
                info!(%reason, "candidate rejected by ISBNdb filter");
                return Lookup::Rejected(reason);
            }
            other => debug!(lookup = other.label(), "no ISBNdb data"),
        }

        let title = first_of(&[
            findings.isbndb.as_ref().map(|r| r.title.as_str()),
            hint.title.as_deref(),
        ]);
        let author_name = first_of(&[
            hint.author.as_deref(),
            findings
                .isbndb
                .as_ref()
                .and_then(|r| r.author_name.as_deref()),
        ]);
        let isbn = first_of(&[
            hint.isbn.as_deref(),
            findings.isbndb.as_ref().and_then(|r| r.isbn.as_deref()),
        ]);

        findings.openlibrary = self
            .from_openlibrary(
                hint.olid.as_deref(),
                isbn.as_deref(),
                title.as_deref(),
                author_name.as_deref(),
            )
            .await;
        let author_olid = findings
            .openlibrary
            .as_ref()
            .and_then(|r| r.author_olid.as_deref());
        findings.author = self
            .openlibrary
            .resolve_author(author_olid, author_name.as_deref())
            .await;

        let title = title.or_else(|| {
            findings
                .openlibrary
                .as_ref()
                .and_then(|r| non_empty(Some(r.title.as_str())))
        });
        let author_name = findings
            .author
            .as_ref()
            .map(|author| author.name.clone())
            .or(author_name);
        if let (Some(title), Some(author)) = (title.as_deref(), author_name.as_deref()) {
            findings.google = self
                .google
                .search(title, author)
                .await
                .found()
                .map(|volume| volume.to_record());
        }

        if findings.isbndb.is_none() && findings.openlibrary.is_none() && findings.google.is_none()
        {
            info!("no provider knows the candidate");
            return Lookup::NotFound;
        }
        Lookup::Found(merge(hint, findings))
    }

    async fn from_isbndb(&self, hint: &Hint) -> Lookup<ProviderRecord> {
        let lookup = match (&hint.isbn, &hint.title, &hint.author) {
            (Some(isbn), _, _) => self.isbndb.fetch_by_isbn(isbn).await,
            (None, Some(title), Some(author)) => {
                self.isbndb.search_by_author_title(author, title).await
            }
            _ => return Lookup::NotFound,
        };
        lookup.map(|book| book.to_record())
    }

    /// Work record, identified by the known work id, else the ISBN, else a title search. Editions
    /// are only scanned when the work itself lacks a description, subjects or author.
    async fn from_openlibrary(
        &self,
        olid: Option<&str>,
        isbn: Option<&str>,
        title: Option<&str>,
        author: Option<&str>,
    ) -> Option<ProviderRecord> {
        let mut searched_author = None;
        let work_olid = match (olid, isbn) {
            (Some(olid), _) => Some(olid.to_owned()),
            (None, Some(isbn)) => self.openlibrary.work_id_by_isbn(isbn).await.found(),
            (None, None) => None,
        };
        let work_olid = match work_olid {
            Some(olid) => olid,
            None => {
                let hit = self.openlibrary.search_work(title?, author?).await.found()?;
                searched_author = hit.author_olid;
                hit.olid
            }
        };

        let Some(work) = self.openlibrary.work(&work_olid).await.found() else {
            debug!(%work_olid, "work document unavailable");
            let mut record = ProviderRecord::new(title.unwrap_or_default());
            record.olid = Some(work_olid);
            record.author_olid = searched_author;
            return Some(record);
        };
        let mut record = work.to_record();
        if record.author_olid.is_none() {
            record.author_olid = searched_author;
        }

        let incomplete = record.description.trim().is_empty()
            || record.raw_subjects.is_empty()
            || record.author_olid.is_none();
        if incomplete {
            let editions = self
                .openlibrary
                .editions(&work_olid)
                .await
                .found()
                .unwrap_or_default();
            match select_edition(&editions) {
                Some(edition) => {
                    debug!(edition = %edition.olid, "completing work from edition");
                    edition.complete(&mut record);
                }
                None => debug!(%work_olid, "no qualifying edition, keeping work record"),
            }
        }
        Some(record)
    }
}

/// First present, non-blank value
fn first_of(values: &[Option<&str>]) -> Option<String> {
    values.iter().find_map(|value| non_empty(*value))
}

/// Field precedence: title ISBNdb, OpenLibrary, Google, hint; description ISBNdb, Google,
/// OpenLibrary, hint; cover ISBNdb, Google, OpenLibrary, hint; ISBN hint, ISBNdb, edition; work id
/// hint, OpenLibrary; author OpenLibrary, ISBNdb, hint. Subjects come from every provider.
fn merge(hint: &Hint, findings: Findings) -> ProviderRecord {
    let Findings {
        isbndb,
        openlibrary,
        google,
        author,
    } = findings;
    let isbndb = isbndb.as_ref();
    let openlibrary = openlibrary.as_ref();
    let google = google.as_ref();

    let title = first_of(&[
        isbndb.map(|r| r.title.as_str()),
        openlibrary.map(|r| r.title.as_str()),
        google.map(|r| r.title.as_str()),
        hint.title.as_deref(),
    ]);
    let description = first_of(&[
        isbndb.map(|r| r.description.as_str()),
        google.map(|r| r.description.as_str()),
        openlibrary.map(|r| r.description.as_str()),
        hint.description.as_deref(),
    ]);
    let cover_url = first_of(&[
        isbndb.and_then(|r| r.cover_url.as_deref()),
        google.and_then(|r| r.cover_url.as_deref()),
        openlibrary.and_then(|r| r.cover_url.as_deref()),
        hint.cover_url.as_deref(),
    ]);
    let isbn = first_of(&[
        hint.isbn.as_deref(),
        isbndb.and_then(|r| r.isbn.as_deref()),
        openlibrary.and_then(|r| r.isbn.as_deref()),
    ]);
    let olid = first_of(&[
        hint.olid.as_deref(),
        openlibrary.and_then(|r| r.olid.as_deref()),
    ]);
    let author_name = first_of(&[
        author.as_ref().map(|a| a.name.as_str()),
        isbndb.and_then(|r| r.author_name.as_deref()),
        hint.author.as_deref(),
    ]);

    let raw_subjects = [isbndb, openlibrary, google]
        .into_iter()
        .flatten()
        .flat_map(|record| record.raw_subjects.iter().cloned())
        .collect();

    ProviderRecord {
        title: title.unwrap_or_default(),
        author_name,
        author_olid: author.as_ref().map(|a| a.olid.clone()),
        author_bio: author.map(|a| a.bio).unwrap_or_default(),
        isbn,
        olid,
        cover_url,
        description: description.unwrap_or_default(),
        raw_subjects,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{Fixtures, ISBN};
    use crate::subjects::{Delimiter, RawSubject};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn merges_providers_by_field_precedence() {
        let fixtures = Fixtures::new();
        fixtures.isbndb_book(ISBN, "Dune", "Frank Herbert", "https://isbndb.test/cover.jpg");
        fixtures.openlibrary_isbn(ISBN, "OL1W");
        fixtures.openlibrary_work("OL1W", "Dune (Work)", "OL123A");
        fixtures.openlibrary_author("OL123A", "Frank Herbert");
        fixtures.google_volume("dune", "frank+herbert", "g1", "Dune", &["Fiction / Classics"]);

        let hint = Hint {
            isbn: Some(ISBN.to_owned()),
            ..Hint::default()
        };
        let record = fixtures.resolver().resolve(&hint).await.found().unwrap();

        assert_eq!(record.title, "Dune");
        assert_eq!(record.isbn.as_deref(), Some(ISBN));
        assert_eq!(record.olid.as_deref(), Some("OL1W"));
        assert_eq!(record.author_olid.as_deref(), Some("OL123A"));
        assert_eq!(record.author_name.as_deref(), Some("Frank Herbert"));
        assert_eq!(record.description, "<p>A desert planet.</p>");
        assert_eq!(record.cover_url.as_deref(), Some("https://isbndb.test/cover.jpg"));
        assert_eq!(
            record.raw_subjects,
            vec![
                RawSubject::new("Fiction -> Science Fiction", Delimiter::Arrow),
                RawSubject::new("Science fiction", Delimiter::Slash),
                RawSubject::new("Fiction / Classics", Delimiter::Slash),
            ]
        );
    }

    #[tokio::test]
    async fn box_set_stops_resolution() {
        let fixtures = Fixtures::new();
        fixtures.isbndb_book(ISBN, "Dune Box Set", "Frank Herbert", "https://isbndb.test/c.jpg");

        let hint = Hint {
            isbn: Some(ISBN.to_owned()),
            ..Hint::default()
        };
        let lookup = fixtures.resolver().resolve(&hint).await;

        assert!(matches!(lookup, Lookup::Rejected(_)));
        assert_eq!(fixtures.fetch.calls().len(), 1);
    }

    #[tokio::test]
    async fn unknown_everywhere_is_not_found() {
        let fixtures = Fixtures::new();
        let lookup = fixtures
            .resolver()
            .resolve(&Hint::titled("Nothing", "Nobody"))
            .await;
        assert_eq!(lookup, Lookup::NotFound);
    }

    #[tokio::test]
    async fn title_search_fallback_finds_work_and_author() {
        let fixtures = Fixtures::new();
        fixtures.openlibrary_search("dune", "frank+herbert", "OL1W", "OL123A");
        fixtures.openlibrary_work("OL1W", "Dune", "OL123A");
        fixtures.openlibrary_author("OL123A", "Frank Herbert");

        let record = fixtures
            .resolver()
            .resolve(&Hint::titled("Dune", "Frank Herbert"))
            .await
            .found()
            .unwrap();

        assert_eq!(record.olid.as_deref(), Some("OL1W"));
        assert_eq!(record.author_olid.as_deref(), Some("OL123A"));
        assert_eq!(record.isbn, None);
    }

    #[tokio::test]
    async fn edition_fills_gaps_of_bare_work() {
        let fixtures = Fixtures::new();
        fixtures.fetch.json(
            "https://openlibrary.test/works/OL1W.json",
            &serde_json::json!({ "title": "Dune", "authors": [{ "author": { "key": "/authors/OL123A" } }] }),
        );
        fixtures.fetch.json(
            "https://openlibrary.test/works/OL1W/editions.json?limit=50",
            &serde_json::json!({ "entries": [
                {
                    "key": "/books/OL1M", "title": "Dune", "revision": 2,
                    "description": "Old blurb.", "languages": [{ "key": "/languages/eng" }],
                    "authors": [{ "key": "/authors/OL123A" }], "subjects": ["Fantasy"]
                },
                {
                    "key": "/books/OL2M", "title": "Dune", "revision": 8,
                    "description": "New blurb.", "languages": [{ "key": "/languages/eng" }],
                    "authors": [{ "key": "/authors/OL123A" }], "subjects": ["Science fiction"],
                    "isbn_13": ["9780000000009"]
                }
            ] }),
        );
        fixtures.openlibrary_author("OL123A", "Frank Herbert");

        let hint = Hint {
            olid: Some("OL1W".to_owned()),
            title: Some("Dune".to_owned()),
            ..Hint::default()
        };
        let record = fixtures.resolver().resolve(&hint).await.found().unwrap();

        assert_eq!(record.description, "New blurb.");
        assert_eq!(record.isbn.as_deref(), Some("9780000000009"));
        assert_eq!(
            record.raw_subjects,
            vec![RawSubject::new("Science fiction", Delimiter::Slash)]
        );
    }
}
