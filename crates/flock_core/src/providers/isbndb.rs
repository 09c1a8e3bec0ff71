//! ISBNdb adapter
//!
//! The most complete source for synopses, subjects and cover images, but its catalogue is full
//! of box sets, omnibus editions and study guides. Those are filtered out here because they do
//! not represent a single literary work.
use crate::providers::http::{HttpFetch, get_json};
use crate::providers::{Lookup, ProviderRecord, matches_exactly, matches_loosely, non_empty};
use crate::sanitize::url_encode;
use crate::subjects::{Delimiter, RawSubject};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Shape of a book object in ISBNdb responses. Every field is optional on the wire.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiBook {
    isbn13: Option<String>,
    title: Option<String>,
    title_long: Option<String>,
    edition: Option<Value>,
    synopsis: Option<String>,
    subjects: Option<Vec<String>>,
    image: Option<String>,
    authors: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BookResponse {
    book: Option<ApiBook>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    books: Option<Vec<ApiBook>>,
}

/// An ISBNdb book that passed both the content filter and the completeness check
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsbnDbBook {
    pub isbn13: String,
    pub title: String,
    /// Raw synopsis, may still contain markup
    pub synopsis: String,
    pub subjects: Vec<String>,
    pub image: String,
    pub authors: Vec<String>,
}

impl IsbnDbBook {
    /// Partial record carrying everything ISBNdb knows about the book
    #[must_use]
    #[inline]
    pub fn to_record(&self) -> ProviderRecord {
        ProviderRecord {
            title: self.title.clone(),
            author_name: self.authors.first().cloned(),
            isbn: Some(self.isbn13.clone()),
            cover_url: Some(self.image.clone()),
            description: self.synopsis.clone(),
            raw_subjects: self
                .subjects
                .iter()
                .map(|subject| RawSubject::new(subject.as_str(), Delimiter::Arrow))
                .collect(),
            ..ProviderRecord::default()
        }
    }
}

pub struct IsbnDbClient {
    fetch: Arc<dyn HttpFetch>,
    base_url: String,
    api_key: String,
    /// Lowercased box-set/collection/study-guide terms
    excluded_terms: Vec<String>,
}

impl IsbnDbClient {
    #[must_use]
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once per program run"
    )]
    pub fn new(
        fetch: Arc<dyn HttpFetch>,
        base_url: &str,
        api_key: &str,
        excluded_terms: &[String],
    ) -> Self {
        Self {
            fetch,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            excluded_terms: excluded_terms
                .iter()
                .map(|term| term.trim().to_lowercase())
                .filter(|term| !term.is_empty())
                .collect(),
        }
    }

    /// Looks up a single edition by ISBN.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn fetch_by_isbn(&self, isbn: &str) -> Lookup<IsbnDbBook> {
        let url = format!("{}/book/{isbn}", self.base_url);
        let response: Lookup<BookResponse> = get_json(&*self.fetch, &url, &self.headers()).await;

        response.and_then(|BookResponse { book }| match book {
            Some(book) => self.validate(book),
            None => Lookup::Malformed("response has no book object".to_owned()),
        })
    }

    /// Searches by title and keeps the first result whose title and author match the request.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn search_by_author_title(&self, author: &str, title: &str) -> Lookup<IsbnDbBook> {
        let url = format!(
            "{}/books/{}?page=1&pageSize=20&column=title",
            self.base_url,
            url_encode(title)
        );
        let response: Lookup<SearchResponse> = get_json(&*self.fetch, &url, &self.headers()).await;

        response.and_then(|SearchResponse { books }| {
            self.pick_match(books.unwrap_or_default(), author, title)
        })
    }

    /// Cover image only, used by the refresh pass which does not need any other field.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn fetch_cover_url(&self, isbn: &str) -> Lookup<String> {
        let url = format!("{}/book/{isbn}", self.base_url);
        let response: Lookup<BookResponse> = get_json(&*self.fetch, &url, &self.headers()).await;

        response.and_then(|BookResponse { book }| match book {
            Some(book) => non_empty(book.image.as_deref()).map_or(Lookup::NotFound, Lookup::Found),
            None => Lookup::Malformed("response has no book object".to_owned()),
        })
    }

    /// Candidates by the requested author whose title is exactly the requested one come first,
    /// titles that merely contain it (sequels, subtitled editions) after them.
    fn pick_match(&self, books: Vec<ApiBook>, author: &str, title: &str) -> Lookup<IsbnDbBook> {
        let (exact, partial): (Vec<ApiBook>, Vec<ApiBook>) = books
            .into_iter()
            .filter(|book| {
                let author_matches = book
                    .authors
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .any(|found| matches_loosely(found, author));
                author_matches && matches_loosely(book.title.as_deref().unwrap_or_default(), title)
            })
            .partition(|book| matches_exactly(book.title.as_deref().unwrap_or_default(), title));

        let mut rejection = None;
        for book in exact.into_iter().chain(partial) {
            match self.validate(book) {
                Lookup::Found(book) => return Lookup::Found(book),
                Lookup::Rejected(reason) => rejection = Some(reason),
                Lookup::NotFound | Lookup::Malformed(_) => {}
            }
        }

        rejection.map_or(Lookup::NotFound, Lookup::Rejected)
    }

    fn headers(&self) -> [(&str, &str); 1] {
        [("Authorization", self.api_key.as_str())]
    }

    /// Returns the first excluded term found in the title, long title or edition
    fn excluded_term(&self, book: &ApiBook) -> Option<&str> {
        let edition = match &book.edition {
            Some(Value::String(edition)) => edition.clone(),
            Some(Value::Number(edition)) => edition.to_string(),
            _ => String::new(),
        };
        let haystacks = [
            book.title.as_deref().unwrap_or_default().to_lowercase(),
            book.title_long.as_deref().unwrap_or_default().to_lowercase(),
            edition.to_lowercase(),
        ];

        self.excluded_terms
            .iter()
            .find(|term| haystacks.iter().any(|text| text.contains(term.as_str())))
            .map(String::as_str)
    }

    fn validate(&self, book: ApiBook) -> Lookup<IsbnDbBook> {
        if let Some(term) = self.excluded_term(&book) {
            info!(
                title = book.title.as_deref().unwrap_or_default(),
                term, "isbndb candidate rejected by content filter"
            );
            return Lookup::Rejected(format!("title or edition matches {term:?}"));
        }

        let authors: Vec<String> = book
            .authors
            .unwrap_or_default()
            .iter()
            .filter_map(|author| non_empty(Some(author.as_str())))
            .collect();
        let subjects: Vec<String> = book
            .subjects
            .unwrap_or_default()
            .iter()
            .filter_map(|subject| non_empty(Some(subject.as_str())))
            .collect();

        let (Some(isbn13), Some(title), Some(synopsis), Some(image)) = (
            non_empty(book.isbn13.as_deref()),
            non_empty(book.title.as_deref()),
            non_empty(book.synopsis.as_deref()),
            non_empty(book.image.as_deref()),
        ) else {
            debug!("isbndb candidate lacks required fields");
            return Lookup::NotFound;
        };
        if authors.is_empty() || subjects.is_empty() {
            debug!(%isbn13, "isbndb candidate has no authors or subjects");
            return Lookup::NotFound;
        }

        Lookup::Found(IsbnDbBook {
            isbn13,
            title,
            synopsis,
            subjects,
            image,
            authors,
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::config::QualitySettings;
    use crate::providers::http::fake::FakeFetch;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const BASE: &str = "https://isbndb.test";

    fn client(fetch: Arc<FakeFetch>) -> IsbnDbClient {
        IsbnDbClient::new(
            fetch,
            BASE,
            "key",
            &QualitySettings::default().excluded_title_terms,
        )
    }

    fn full_book(title: &str) -> Value {
        json!({
            "isbn13": "9780000000001",
            "title": title,
            "synopsis": "<p>A desert planet.</p>",
            "subjects": ["Fiction -> Science Fiction"],
            "image": "https://images.isbndb.test/covers/01.jpg",
            "authors": ["Frank Herbert"]
        })
    }

    #[tokio::test]
    async fn fetch_by_isbn_complete_book() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            &format!("{BASE}/book/9780000000001"),
            &json!({ "book": full_book("Dune") }),
        );

        let book = client(Arc::clone(&fetch))
            .fetch_by_isbn("9780000000001")
            .await
            .found()
            .unwrap();
        assert_eq!(book.title, "Dune");
        assert_eq!(book.authors, vec!["Frank Herbert".to_owned()]);

        let record = book.to_record();
        assert_eq!(record.isbn.as_deref(), Some("9780000000001"));
        assert_eq!(record.author_name.as_deref(), Some("Frank Herbert"));
        assert_eq!(
            record.raw_subjects,
            vec![RawSubject::new("Fiction -> Science Fiction", Delimiter::Arrow)]
        );
    }

    #[tokio::test]
    async fn box_set_is_rejected_even_when_complete() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            &format!("{BASE}/book/9780000000001"),
            &json!({ "book": full_book("The Dune Chronicles Box Set") }),
        );

        let lookup = client(fetch).fetch_by_isbn("9780000000001").await;
        assert!(matches!(lookup, Lookup::Rejected(_)));
    }

    #[tokio::test]
    async fn box_set_term_in_edition_is_rejected() {
        let fetch = Arc::new(FakeFetch::new());
        let mut book = full_book("Dune");
        book["edition"] = json!("Deluxe Box Set");
        fetch.json(&format!("{BASE}/book/1"), &json!({ "book": book }));

        let lookup = client(fetch).fetch_by_isbn("1").await;
        assert!(matches!(lookup, Lookup::Rejected(_)));
    }

    #[tokio::test]
    async fn incomplete_book_is_not_usable() {
        let fetch = Arc::new(FakeFetch::new());
        let mut book = full_book("Dune");
        book["authors"] = json!([]);
        fetch.json(&format!("{BASE}/book/1"), &json!({ "book": book }));
        let mut book = full_book("Dune");
        book.as_object_mut().unwrap().remove("synopsis");
        fetch.json(&format!("{BASE}/book/2"), &json!({ "book": book }));

        let client = client(fetch);
        assert_eq!(client.fetch_by_isbn("1").await, Lookup::NotFound);
        assert_eq!(client.fetch_by_isbn("2").await, Lookup::NotFound);
    }

    #[tokio::test]
    async fn missing_book_and_bad_shapes() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(&format!("{BASE}/book/2"), &json!({ "unexpected": true }));
        fetch.respond(&format!("{BASE}/book/3"), 200, b"not json".to_vec());
        fetch.json(&format!("{BASE}/book/4"), &json!({ "book": { "authors": "nobody" } }));

        let client = client(fetch);
        assert_eq!(client.fetch_by_isbn("1").await, Lookup::NotFound);
        assert!(matches!(client.fetch_by_isbn("2").await, Lookup::Malformed(_)));
        assert!(matches!(client.fetch_by_isbn("3").await, Lookup::Malformed(_)));
        assert!(matches!(client.fetch_by_isbn("4").await, Lookup::Malformed(_)));
    }

    #[tokio::test]
    async fn search_skips_other_authors_and_box_sets() {
        let fetch = Arc::new(FakeFetch::new());
        let mut other_author = full_book("Dune");
        other_author["authors"] = json!(["Someone Else"]);
        let box_set = full_book("Dune Trilogy");
        let mut wanted = full_book("Dune");
        wanted["isbn13"] = json!("9780441013593");
        fetch.json(
            &format!("{BASE}/books/dune?page=1&pageSize=20&column=title"),
            &json!({ "total": 3, "books": [other_author, box_set, wanted] }),
        );

        let book = client(fetch)
            .search_by_author_title("Frank Herbert", "Dune")
            .await
            .found()
            .unwrap();
        assert_eq!(book.isbn13, "9780441013593");
    }

    #[tokio::test]
    async fn search_prefers_exact_title_over_sequel() {
        let fetch = Arc::new(FakeFetch::new());
        let mut sequel = full_book("Dune Messiah");
        sequel["isbn13"] = json!("9780593098233");
        let mut wanted = full_book("Dune");
        wanted["isbn13"] = json!("9780441013593");
        fetch.json(
            &format!("{BASE}/books/dune?page=1&pageSize=20&column=title"),
            &json!({ "books": [sequel, wanted] }),
        );

        let book = client(fetch)
            .search_by_author_title("Frank Herbert", "Dune")
            .await
            .found()
            .unwrap();
        assert_eq!(book.title, "Dune");
        assert_eq!(book.isbn13, "9780441013593");
    }

    #[tokio::test]
    async fn search_falls_back_to_containing_title() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            &format!("{BASE}/books/dune?page=1&pageSize=20&column=title"),
            &json!({ "books": [full_book("Dune: Deluxe Edition")] }),
        );

        let book = client(fetch)
            .search_by_author_title("Frank Herbert", "Dune")
            .await
            .found()
            .unwrap();
        assert_eq!(book.title, "Dune: Deluxe Edition");
    }

    #[tokio::test]
    async fn search_with_only_box_sets_is_rejected() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            &format!("{BASE}/books/dune?page=1&pageSize=20&column=title"),
            &json!({ "books": [full_book("Dune Box Set")] }),
        );

        let lookup = client(fetch)
            .search_by_author_title("Frank Herbert", "Dune")
            .await;
        assert!(matches!(lookup, Lookup::Rejected(_)));
    }

    #[tokio::test]
    async fn cover_url_only_needs_an_image() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            &format!("{BASE}/book/1"),
            &json!({ "book": { "image": "https://images.isbndb.test/1.jpg" } }),
        );
        fetch.json(&format!("{BASE}/book/2"), &json!({ "book": { "title": "x" } }));

        let client = client(fetch);
        assert_eq!(
            client.fetch_cover_url("1").await,
            Lookup::Found("https://images.isbndb.test/1.jpg".to_owned())
        );
        assert_eq!(client.fetch_cover_url("2").await, Lookup::NotFound);
    }
}
