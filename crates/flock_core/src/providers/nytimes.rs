//! NY Times Best Sellers adapter
//!
//! Bestseller entries only nominate books. Their metadata is provisional and every entry is
//! re-resolved through ISBNdb and OpenLibrary before anything is stored.
use crate::providers::http::{HttpFetch, get_json};
use crate::providers::{Lookup, non_empty};
use serde::Deserialize;
use std::sync::Arc;
use urlencoding::encode;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiBook {
    title: Option<String>,
    author: Option<String>,
    description: Option<String>,
    book_image: Option<String>,
    primary_isbn13: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiList {
    books: Option<Vec<ApiBook>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiResults {
    lists: Option<Vec<ApiList>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiOverview {
    results: Option<ApiResults>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bestseller {
    pub title: String,
    pub author: String,
    pub description: String,
    pub cover_url: Option<String>,
    pub isbn: Option<String>,
}

pub struct NyTimesClient {
    fetch: Arc<dyn HttpFetch>,
    base_url: String,
    api_key: String,
}

impl NyTimesClient {
    #[must_use]
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once per program run"
    )]
    pub fn new(fetch: Arc<dyn HttpFetch>, base_url: &str, api_key: &str) -> Self {
        Self {
            fetch,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
        }
    }

    /// Every book of every current list, flattened in list order. Entries without title or
    /// author are dropped.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called once per run")]
    pub async fn list_bestsellers(&self) -> Lookup<Vec<Bestseller>> {
        let url = format!(
            "{}/lists/full-overview.json?api-key={}",
            self.base_url,
            encode(&self.api_key)
        );
        let overview: Lookup<ApiOverview> = get_json(&*self.fetch, &url, &[]).await;

        overview.and_then(|overview| {
            let Some(results) = overview.results else {
                return Lookup::Malformed("overview has no results".to_owned());
            };
            Lookup::Found(
                results
                    .lists
                    .unwrap_or_default()
                    .into_iter()
                    .flat_map(|list| list.books.unwrap_or_default())
                    .filter_map(|book| {
                        Some(Bestseller {
                            title: non_empty(book.title.as_deref())?,
                            author: non_empty(book.author.as_deref())?,
                            description: book.description.unwrap_or_default(),
                            cover_url: non_empty(book.book_image.as_deref()),
                            isbn: non_empty(book.primary_isbn13.as_deref()),
                        })
                    })
                    .collect(),
            )
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
    use crate::providers::http::fake::FakeFetch;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const URL: &str = "https://nyt.test/lists/full-overview.json?api-key=secret";

    #[tokio::test]
    async fn flattens_all_lists() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            URL,
            &json!({ "results": { "lists": [
                { "books": [
                    { "title": "DUNE", "author": "Frank Herbert", "description": "Spice.", "book_image": "https://nyt.test/dune.jpg", "primary_isbn13": "9780441013593" },
                    { "title": "", "author": "Nobody" }
                ] },
                { "books": [{ "title": "THE HOBBIT", "author": "J.R.R. Tolkien" }] },
                {}
            ] } }),
        );

        let books = NyTimesClient::new(fetch, "https://nyt.test/", "secret")
            .list_bestsellers()
            .await
            .found()
            .unwrap();
        assert_eq!(books.len(), 2);
        assert_eq!(books[0].isbn.as_deref(), Some("9780441013593"));
        assert_eq!(books[1].title, "THE HOBBIT");
        assert_eq!(books[1].cover_url, None);
    }

    #[tokio::test]
    async fn missing_results_is_malformed() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(URL, &json!({ "status": "OK" }));

        let lookup = NyTimesClient::new(fetch, "https://nyt.test", "secret")
            .list_bestsellers()
            .await;
        assert!(matches!(lookup, Lookup::Malformed(_)));
    }
}
