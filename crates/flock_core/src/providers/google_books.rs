//! Google Books adapter
//!
//! Used for categories, which the other providers rarely get right, and as a secondary source
//! of descriptions and thumbnails.
use crate::providers::http::{HttpFetch, get_json};
use crate::providers::{Lookup, ProviderRecord, non_empty};
use crate::sanitize::url_encode;
use crate::subjects::{Delimiter, RawSubject};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ImageLinks {
    thumbnail: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VolumeInfo {
    title: Option<String>,
    description: Option<String>,
    categories: Option<Vec<String>>,
    image_links: Option<ImageLinks>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiVolume {
    id: Option<String>,
    volume_info: Option<VolumeInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiSearch {
    items: Option<Vec<ApiVolume>>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleVolume {
    pub id: String,
    pub title: String,
    /// Raw description from the search result, may contain markup
    pub description: String,
    pub categories: Vec<String>,
    pub thumbnail: Option<String>,
}

impl GoogleVolume {
    #[must_use]
    #[inline]
    pub fn to_record(&self) -> ProviderRecord {
        ProviderRecord {
            title: self.title.clone(),
            cover_url: self.thumbnail.clone(),
            description: self.description.clone(),
            raw_subjects: self
                .categories
                .iter()
                .map(|category| RawSubject::new(category.as_str(), Delimiter::Slash))
                .collect(),
            ..ProviderRecord::default()
        }
    }
}

pub struct GoogleBooksClient {
    fetch: Arc<dyn HttpFetch>,
    base_url: String,
}

impl GoogleBooksClient {
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

    /// Searches English volumes by title and author. The top hit is only usable if it carries
    /// at least one category; its full volume document then supplies title, categories and
    /// thumbnail.
    #[allow(clippy::missing_inline_in_public_items, reason = "Called rarely")]
    pub async fn search(&self, title: &str, author: &str) -> Lookup<GoogleVolume> {
        let url = format!(
            "{}/volumes?q=intitle:{}+inauthor:{}&projection=full&langRestrict=en",
            self.base_url,
            url_encode(title),
            url_encode(author)
        );
        let search: Lookup<ApiSearch> = get_json(&*self.fetch, &url, &[]).await;
        let top = match search {
            Lookup::Found(search) => search.items.unwrap_or_default().into_iter().next(),
            other => return other.and_then(|_| Lookup::NotFound),
        };

        let Some(ApiVolume {
            id: Some(id),
            volume_info: Some(summary),
        }) = top
        else {
            return Lookup::NotFound;
        };
        if summary.categories.as_ref().is_none_or(Vec::is_empty) {
            debug!(%id, "top google books hit has no categories");
            return Lookup::NotFound;
        }

        let url = format!("{}/volumes/{id}", self.base_url);
        let detail: Lookup<ApiVolume> = get_json(&*self.fetch, &url, &[]).await;
        let info = match detail {
            Lookup::Found(ApiVolume {
                volume_info: Some(info),
                ..
            }) => info,
            _ => VolumeInfo::default(),
        };

        let categories = info
            .categories
            .filter(|categories| !categories.is_empty())
            .or(summary.categories)
            .unwrap_or_default();
        let thumbnail = info
            .image_links
            .and_then(|links| links.thumbnail)
            .or_else(|| summary.image_links.and_then(|links| links.thumbnail))
            .map(|url| strip_curl(&url))
            .filter(|url| !url.is_empty());

        Lookup::Found(GoogleVolume {
            title: non_empty(info.title.as_deref())
                .or_else(|| non_empty(summary.title.as_deref()))
                .unwrap_or_default(),
            description: summary.description.unwrap_or_default(),
            categories,
            thumbnail,
            id,
        })
    }
}

/// Google thumbnails with `edge=curl` render a page-curl effect over the cover
fn strip_curl(url: &str) -> String {
    url.replace("edge=curl&", "")
        .replace("&edge=curl", "")
        .replace("edge=curl", "")
        .trim_end_matches(['?', '&'])
        .to_owned()
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

    const BASE: &str = "https://books.test/v1";
    const SEARCH: &str = "https://books.test/v1/volumes?q=intitle:dune+inauthor:frank+herbert&projection=full&langRestrict=en";

    fn client(fetch: &Arc<FakeFetch>) -> GoogleBooksClient {
        GoogleBooksClient::new(Arc::clone(fetch) as Arc<dyn HttpFetch>, BASE)
    }

    #[test]
    fn strips_page_curl_parameter() {
        assert_eq!(
            strip_curl("http://books.google.com/books/content?id=1&printsec=frontcover&img=1&zoom=1&edge=curl&source=gbs_api"),
            "http://books.google.com/books/content?id=1&printsec=frontcover&img=1&zoom=1&source=gbs_api"
        );
        assert_eq!(
            strip_curl("http://books.google.com/books/content?id=1&edge=curl"),
            "http://books.google.com/books/content?id=1"
        );
    }

    #[tokio::test]
    async fn search_uses_volume_details() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            SEARCH,
            &json!({ "items": [{
                "id": "B1",
                "volumeInfo": { "title": "Dune", "description": "<b>Spice</b>", "categories": ["Fiction"] }
            }] }),
        );
        fetch.json(
            &format!("{BASE}/volumes/B1"),
            &json!({ "id": "B1", "volumeInfo": {
                "title": "Dune (Deluxe Edition)",
                "categories": ["Fiction / Science Fiction / Space Opera"],
                "imageLinks": { "thumbnail": "http://books.google.com/c?id=B1&edge=curl&zoom=1" }
            } }),
        );

        let volume = client(&fetch).search("Dune", "Frank Herbert").await.found().unwrap();
        assert_eq!(volume.title, "Dune (Deluxe Edition)");
        assert_eq!(volume.description, "<b>Spice</b>");
        assert_eq!(
            volume.categories,
            vec!["Fiction / Science Fiction / Space Opera".to_owned()]
        );
        assert_eq!(
            volume.thumbnail.as_deref(),
            Some("http://books.google.com/c?id=B1&zoom=1")
        );
    }

    #[tokio::test]
    async fn top_hit_without_categories_is_unusable() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            SEARCH,
            &json!({ "items": [
                { "id": "B1", "volumeInfo": { "title": "Dune" } },
                { "id": "B2", "volumeInfo": { "title": "Dune", "categories": ["Fiction"] } }
            ] }),
        );

        assert_eq!(
            client(&fetch).search("Dune", "Frank Herbert").await,
            Lookup::NotFound
        );
        assert_eq!(fetch.calls_starting_with(&format!("{BASE}/volumes/")).len(), 0);
    }

    #[tokio::test]
    async fn empty_results_and_missing_details() {
        let fetch = Arc::new(FakeFetch::new());
        fetch.json(SEARCH, &json!({ "totalItems": 0 }));
        assert_eq!(
            client(&fetch).search("Dune", "Frank Herbert").await,
            Lookup::NotFound
        );

        let fetch = Arc::new(FakeFetch::new());
        fetch.json(
            SEARCH,
            &json!({ "items": [{ "id": "B1", "volumeInfo": { "title": "Dune", "categories": ["Fiction"] } }] }),
        );
        let volume = client(&fetch).search("Dune", "Frank Herbert").await.found().unwrap();
        assert_eq!(volume.title, "Dune");
        assert_eq!(volume.categories, vec!["Fiction".to_owned()]);
        assert_eq!(volume.thumbnail, None);
    }
}
