//! OpenLibrary adapter
//!
//! OpenLibrary is the identity authority: its work and author ids are the keys books and authors
//! are deduplicated by. Every step of the ISBN → work → author chain may come back empty, in
//! which case the caller simply gets less data.
use crate::providers::http::{HttpFetch, get_json};
use crate::providers::{Lookup, ProviderRecord, matches_loosely, non_empty};
use crate::sanitize::url_encode;
use crate::subjects::{Delimiter, RawSubject};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use urlencoding::encode;

const COVERS_URL: &str = "https://covers.openlibrary.org/b/id";

/// Text fields are either a bare string or `{ "type": "/type/text", "value": "..." }`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Text {
    Plain(String),
    Typed { value: String },
}

impl Text {
    fn into_string(self) -> String {
        match self {
            Self::Plain(text) | Self::Typed { value: text } => text,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeyRef {
    key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WorkAuthorRef {
    author: Option<KeyRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiIsbnEdition {
    works: Option<Vec<KeyRef>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiWork {
    title: Option<String>,
    description: Option<Text>,
    subjects: Option<Vec<String>>,
    authors: Option<Vec<WorkAuthorRef>>,
    covers: Option<Vec<i64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiEdition {
    key: Option<String>,
    title: Option<String>,
    description: Option<Text>,
    languages: Option<Vec<KeyRef>>,
    authors: Option<Vec<KeyRef>>,
    subjects: Option<Vec<String>>,
    revision: Option<i64>,
    isbn_13: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiEditions {
    entries: Option<Vec<ApiEdition>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiAuthor {
    name: Option<String>,
    bio: Option<Text>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiAuthorDoc {
    key: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiAuthorSearch {
    docs: Option<Vec<ApiAuthorDoc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiWorkDoc {
    key: Option<String>,
    title: Option<String>,
    author_key: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiWorkSearch {
    docs: Option<Vec<ApiWorkDoc>>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenLibraryWork {
    pub olid: String,
    pub title: String,
    /// Raw description, may contain markup
    pub description: String,
    pub subjects: Vec<String>,
    pub author_olids: Vec<String>,
    pub cover_id: Option<i64>,
}

impl OpenLibraryWork {
    #[must_use]
    #[inline]
    pub fn cover_url(&self) -> Option<String> {
        self.cover_id
            .filter(|id| *id > 0)
            .map(|id| format!("{COVERS_URL}/{id}-L.jpg"))
    }

    #[must_use]
    #[inline]
    pub fn to_record(&self) -> ProviderRecord {
        ProviderRecord {
            title: self.title.clone(),
            author_olid: self.author_olids.first().cloned(),
            olid: Some(self.olid.clone()),
            cover_url: self.cover_url(),
            description: self.description.clone(),
            raw_subjects: slash_subjects(&self.subjects),
            ..ProviderRecord::default()
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenLibraryEdition {
    pub olid: String,
    pub title: String,
    pub description: String,
    /// Language codes such as `eng`
    pub languages: Vec<String>,
    pub author_olids: Vec<String>,
    pub subjects: Vec<String>,
    pub revision: i64,
    pub isbn_13: Option<String>,
}

impl OpenLibraryEdition {
    /// Fills the gaps of a work-level record with this edition's data
    #[inline]
    pub fn complete(&self, record: &mut ProviderRecord) {
        if record.description.trim().is_empty() {
            record.description.clone_from(&self.description);
        }
        if record.raw_subjects.is_empty() {
            record.raw_subjects = slash_subjects(&self.subjects);
        }
        if record.author_olid.is_none() {
            record.author_olid = self.author_olids.first().cloned();
        }
        if record.isbn.is_none() {
            record.isbn.clone_from(&self.isbn_13);
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenLibraryAuthor {
    pub olid: String,
    pub name: String,
    pub bio: String,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSearchHit {
    pub olid: String,
    pub title: String,
    pub author_olid: Option<String>,
}

pub struct OpenLibraryClient {
    fetch: Arc<dyn HttpFetch>,
    base_url: String,
}

impl OpenLibraryClient {
    #[must_use]
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once per program run"
    )]
    pub fn new(fetch: Arc<dyn HttpFetch>, base_url: &str) -> Self {
        Self {
            fetch,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Work id of the first work an ISBN's edition belongs to
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn work_id_by_isbn(&self, isbn: &str) -> Lookup<String> {
        let url = format!("{}/isbn/{isbn}.json", self.base_url);
        let edition: Lookup<ApiIsbnEdition> = get_json(&*self.fetch, &url, &[]).await;

        edition.and_then(|edition| {
            edition
                .works
                .unwrap_or_default()
                .into_iter()
                .find_map(|work| work.key.as_deref().and_then(last_segment))
                .map_or(Lookup::NotFound, Lookup::Found)
        })
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn work(&self, olid: &str) -> Lookup<OpenLibraryWork> {
        let url = format!("{}/works/{olid}.json", self.base_url);
        let work: Lookup<ApiWork> = get_json(&*self.fetch, &url, &[]).await;

        work.and_then(|work| {
            let Some(title) = non_empty(work.title.as_deref()) else {
                return Lookup::NotFound;
            };
            Lookup::Found(OpenLibraryWork {
                olid: olid.to_owned(),
                title,
                description: work.description.map(Text::into_string).unwrap_or_default(),
                subjects: work.subjects.unwrap_or_default(),
                author_olids: work
                    .authors
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|entry| entry.author?.key)
                    .filter_map(|key| last_segment(&key))
                    .collect(),
                cover_id: work.covers.unwrap_or_default().first().copied(),
            })
        })
    }

    /// All editions of a work, in the order OpenLibrary lists them
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn editions(&self, work_olid: &str) -> Lookup<Vec<OpenLibraryEdition>> {
        let url = format!("{}/works/{work_olid}/editions.json?limit=50", self.base_url);
        let editions: Lookup<ApiEditions> = get_json(&*self.fetch, &url, &[]).await;

        editions.map(|editions| {
            editions
                .entries
                .unwrap_or_default()
                .into_iter()
                .map(|edition| OpenLibraryEdition {
                    olid: edition
                        .key
                        .as_deref()
                        .and_then(last_segment)
                        .unwrap_or_default(),
                    title: edition.title.unwrap_or_default(),
                    description: edition
                        .description
                        .map(Text::into_string)
                        .unwrap_or_default(),
                    languages: keys(edition.languages),
                    author_olids: keys(edition.authors),
                    subjects: edition.subjects.unwrap_or_default(),
                    revision: edition.revision.unwrap_or_default(),
                    isbn_13: edition.isbn_13.unwrap_or_default().into_iter().next(),
                })
                .collect()
        })
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn author(&self, olid: &str) -> Lookup<OpenLibraryAuthor> {
        let url = format!("{}/authors/{olid}.json", self.base_url);
        let author: Lookup<ApiAuthor> = get_json(&*self.fetch, &url, &[]).await;

        author.and_then(|author| {
            non_empty(author.name.as_deref()).map_or(Lookup::NotFound, |name| {
                Lookup::Found(OpenLibraryAuthor {
                    olid: olid.to_owned(),
                    name,
                    bio: author.bio.map(Text::into_string).unwrap_or_default(),
                })
            })
        })
    }

    /// Author id of the first search hit whose name matches
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn search_author(&self, name: &str) -> Lookup<String> {
        let url = format!(
            "{}/search/authors.json?q={}",
            self.base_url,
            encode(name.trim())
        );
        let search: Lookup<ApiAuthorSearch> = get_json(&*self.fetch, &url, &[]).await;

        search.and_then(|search| {
            search
                .docs
                .unwrap_or_default()
                .into_iter()
                .filter(|doc| matches_loosely(doc.name.as_deref().unwrap_or_default(), name))
                .find_map(|doc| doc.key.as_deref().and_then(last_segment))
                .map_or(Lookup::NotFound, Lookup::Found)
        })
    }

    /// Best-rated work for a title and author, the identity fallback when no ISBN is known
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn search_work(&self, title: &str, author: &str) -> Lookup<WorkSearchHit> {
        let url = format!(
            "{}/search.json?title={}&author={}&sort=rating&limit=1&fields=title,key,author_key,subject_key",
            self.base_url,
            url_encode(title),
            url_encode(author)
        );
        let search: Lookup<ApiWorkSearch> = get_json(&*self.fetch, &url, &[]).await;

        search.and_then(|search| {
            let Some(doc) = search.docs.unwrap_or_default().into_iter().next() else {
                return Lookup::NotFound;
            };
            let Some(olid) = doc.key.as_deref().and_then(last_segment) else {
                return Lookup::Malformed("search hit without key".to_owned());
            };
            Lookup::Found(WorkSearchHit {
                olid,
                title: doc.title.unwrap_or_default(),
                author_olid: doc.author_key.unwrap_or_default().into_iter().next(),
            })
        })
    }

    /// Author of a work: the work's first listed author, or a name search when the work lists
    /// none. Returns `None` if neither yields an author.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn resolve_author(
        &self,
        author_olid: Option<&str>,
        name_hint: Option<&str>,
    ) -> Option<OpenLibraryAuthor> {
        if let Some(olid) = author_olid {
            match self.author(olid).await {
                Lookup::Found(author) => return Some(author),
                other => debug!(%olid, lookup = other.label(), "author lookup by id failed"),
            }
        }

        let name = name_hint?;
        let olid = self.search_author(name).await.found()?;
        match self.author(&olid).await {
            Lookup::Found(author) => Some(author),
            // The search hit is trusted even if the detail document is unavailable
            _ => Some(OpenLibraryAuthor {
                olid,
                name: name.to_owned(),
                bio: String::new(),
            }),
        }
    }
}

/// `/works/OL45883W` → `OL45883W`
fn last_segment(key: &str) -> Option<String> {
    key.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(ToOwned::to_owned)
}

fn keys(refs: Option<Vec<KeyRef>>) -> Vec<String> {
    refs.unwrap_or_default()
        .into_iter()
        .filter_map(|entry| entry.key)
        .filter_map(|key| last_segment(&key))
        .collect()
}

fn slash_subjects(subjects: &[String]) -> Vec<RawSubject> {
    subjects
        .iter()
        .map(|subject| RawSubject::new(subject.as_str(), Delimiter::Slash))
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::providers::http::fake::FakeFetch;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const BASE: &str = "https://openlibrary.test";

    fn client(fetch: &Arc<FakeFetch>) -> OpenLibraryClient {
        OpenLibraryClient::new(Arc::clone(fetch) as Arc<dyn HttpFetch>, BASE)
    }

    #[tokio::test]
    async fn isbn_resolves_to_first_work() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            &format!("{BASE}/isbn/9780441013593.json"),
            &json!({ "works": [{ "key": "/works/OL893415W" }, { "key": "/works/OL1W" }] }),
        );
        fetch.json(&format!("{BASE}/isbn/1.json"), &json!({ "works": [] }));

        let client = client(&fetch);
        assert_eq!(
            client.work_id_by_isbn("9780441013593").await,
            Lookup::Found("OL893415W".to_owned())
        );
        assert_eq!(client.work_id_by_isbn("1").await, Lookup::NotFound);
        assert_eq!(client.work_id_by_isbn("2").await, Lookup::NotFound);
    }

    #[tokio::test]
    async fn work_reads_both_description_shapes() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            &format!("{BASE}/works/OL1W.json"),
            &json!({
                "title": "Dune",
                "description": { "type": "/type/text", "value": "Spice." },
                "subjects": ["Science fiction"],
                "authors": [{ "author": { "key": "/authors/OL79034A" }, "type": { "key": "/type/author_role" } }],
                "covers": [11481354]
            }),
        );
        fetch.json(
            &format!("{BASE}/works/OL2W.json"),
            &json!({ "title": "Children of Dune", "description": "Plain." }),
        );

        let client = client(&fetch);
        let work = client.work("OL1W").await.found().unwrap();
        assert_eq!(work.description, "Spice.");
        assert_eq!(work.author_olids, vec!["OL79034A".to_owned()]);
        assert_eq!(
            work.cover_url().as_deref(),
            Some("https://covers.openlibrary.org/b/id/11481354-L.jpg")
        );

        let record = work.to_record();
        assert_eq!(record.olid.as_deref(), Some("OL1W"));
        assert_eq!(record.author_olid.as_deref(), Some("OL79034A"));

        let work = client.work("OL2W").await.found().unwrap();
        assert_eq!(work.description, "Plain.");
        assert!(work.author_olids.is_empty());
        assert_eq!(work.cover_url(), None);
    }

    #[tokio::test]
    async fn work_with_wrong_shape_is_malformed() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            &format!("{BASE}/works/OL1W.json"),
            &json!({ "title": "Dune", "authors": "Frank Herbert" }),
        );

        let lookup = client(&fetch).work("OL1W").await;
        assert!(matches!(lookup, Lookup::Malformed(_)));
    }

    #[tokio::test]
    async fn editions_are_flattened() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            &format!("{BASE}/works/OL1W/editions.json?limit=50"),
            &json!({ "entries": [{
                "key": "/books/OL1M",
                "title": "Dune",
                "languages": [{ "key": "/languages/eng" }],
                "authors": [{ "key": "/authors/OL79034A" }],
                "subjects": ["Fiction"],
                "revision": 7,
                "isbn_13": ["9780441013593"]
            }, {}] }),
        );

        let editions = client(&fetch).editions("OL1W").await.found().unwrap();
        assert_eq!(editions.len(), 2);
        assert_eq!(editions[0].olid, "OL1M");
        assert_eq!(editions[0].languages, vec!["eng".to_owned()]);
        assert_eq!(editions[0].revision, 7);
        assert_eq!(editions[0].isbn_13.as_deref(), Some("9780441013593"));
        assert_eq!(editions[1], OpenLibraryEdition::default());
    }

    #[tokio::test]
    async fn author_falls_back_to_name_search() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            &format!("{BASE}/search/authors.json?q=Frank%20Herbert"),
            &json!({ "docs": [
                { "key": "OL1A", "name": "Brian Herbert" },
                { "key": "OL79034A", "name": "Frank Herbert" }
            ] }),
        );
        fetch.json(
            &format!("{BASE}/authors/OL79034A.json"),
            &json!({ "name": "Frank Herbert", "bio": { "value": "American author." } }),
        );

        let client = client(&fetch);
        let author = client
            .resolve_author(Some("OL404A"), Some("Frank Herbert"))
            .await
            .unwrap();
        assert_eq!(author.olid, "OL79034A");
        assert_eq!(author.bio, "American author.");

        assert_eq!(client.resolve_author(None, None).await, None);
        assert_eq!(client.resolve_author(None, Some("Nobody")).await, None);
    }

    #[tokio::test]
    async fn work_search_takes_first_doc() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            &format!(
                "{BASE}/search.json?title=the+hobbit&author=j.r.r.+tolkien&sort=rating&limit=1&fields=title,key,author_key,subject_key"
            ),
            &json!({ "docs": [{ "key": "/works/OL27482W", "title": "The Hobbit", "author_key": ["OL26320A"] }] }),
        );

        let hit = client(&fetch)
            .search_work("The Hobbit", "J.R.R. Tolkien")
            .await
            .found()
            .unwrap();
        assert_eq!(
            hit,
            WorkSearchHit {
                olid: "OL27482W".to_owned(),
                title: "The Hobbit".to_owned(),
                author_olid: Some("OL26320A".to_owned()),
            }
        );
    }
}
