//! Batch pipelines
//!
//! One runner per trigger. Items of a batch are processed strictly in order: the reconciliation
//! of an item may depend on rows written by the items before it.
pub mod messages;
pub mod population;
pub mod recommendation;
pub mod refresh;
pub mod report;
pub mod resolver;
pub mod sync;

pub use population::PopulationPipeline;
pub use recommendation::RecommendationPipeline;
pub use refresh::RefreshPipeline;
pub use report::BatchReport;
pub use sync::SyncPipeline;

use crate::config::PipelineSettings;
use crate::covers::CoverPipeline;
use crate::covers::storage::ObjectStore;
use crate::database::Store;
use crate::pipeline::resolver::Resolver;
use crate::providers::google_books::GoogleBooksClient;
use crate::providers::http::HttpFetch;
use crate::providers::isbndb::IsbnDbClient;
use crate::providers::nytimes::NyTimesClient;
use crate::providers::openlibrary::OpenLibraryClient;
use crate::providers::recommender::RecommenderClient;
use crate::reconcile::Reconciler;
use crate::subjects::SubjectTable;
use std::sync::Arc;

/// Shared clients every pipeline draws from, built once per process
pub struct Services {
    pub store: Arc<dyn Store>,
    pub isbndb: Arc<IsbnDbClient>,
    pub nytimes: Arc<NyTimesClient>,
    pub recommender: Arc<RecommenderClient>,
    pub covers: Arc<CoverPipeline>,
    pub resolver: Arc<Resolver>,
    pub reconciler: Arc<Reconciler>,
}

impl Services {
    #[must_use]
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once per program run"
    )]
    pub fn new(
        fetch: Arc<dyn HttpFetch>,
        store: Arc<dyn Store>,
        objects: Arc<dyn ObjectStore>,
        subjects: Arc<SubjectTable>,
        settings: &PipelineSettings,
    ) -> Self {
        let providers = &settings.providers;
        let isbndb = Arc::new(IsbnDbClient::new(
            Arc::clone(&fetch),
            &providers.isbndb_url,
            &providers.isbndb_key,
            &settings.quality.excluded_title_terms,
        ));
        let resolver = Resolver::new(
            Arc::clone(&isbndb),
            OpenLibraryClient::new(Arc::clone(&fetch), &providers.openlibrary_url),
            GoogleBooksClient::new(Arc::clone(&fetch), &providers.google_books_url),
        );
        let covers = Arc::new(CoverPipeline::new(
            Arc::clone(&fetch),
            objects,
            &settings.quality,
        ));
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&covers), subjects);

        Self {
            nytimes: Arc::new(NyTimesClient::new(
                Arc::clone(&fetch),
                &providers.nytimes_url,
                &providers.nytimes_key,
            )),
            recommender: Arc::new(RecommenderClient::new(
                fetch,
                &providers.openai_url,
                &providers.openai_key,
                &providers.openai_model,
            )),
            store,
            isbndb,
            covers,
            resolver: Arc::new(resolver),
            reconciler: Arc::new(reconciler),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
pub mod testing {
    //! Canned provider responses shared by the pipeline tests
    use super::Services;
    use crate::config::{PipelineSettings, ProviderSettings, QualitySettings};
    use crate::covers::storage::ObjectStore;
    use crate::covers::storage::memory::MemoryObjectStore;
    use crate::covers::test_images::noisy_png;
    use crate::database::Store;
    use crate::database::memory::MemoryStore;
    use crate::pipeline::resolver::Resolver;
    use crate::providers::http::HttpFetch;
    use crate::providers::http::fake::FakeFetch;
    use crate::sanitize::url_encode;
    use crate::subjects::SubjectTable;
    use serde_json::json;
    use std::sync::Arc;

    pub const ISBN: &str = "9780000000001";
    pub const ISBNDB: &str = "https://isbndb.test";
    pub const OPENLIBRARY: &str = "https://openlibrary.test";
    pub const GOOGLE: &str = "https://google.test";
    pub const NYTIMES: &str = "https://nytimes.test";
    pub const LLM: &str = "https://llm.test/v1";
    pub const BIG_COVER: &str = "https://images.test/big.jpg";
    pub const SMALL_COVER: &str = "https://images.test/small.jpg";

    pub struct Fixtures {
        pub fetch: Arc<FakeFetch>,
        pub store: Arc<MemoryStore>,
        pub objects: Arc<MemoryObjectStore>,
        pub services: Services,
    }

    impl Fixtures {
        pub fn new() -> Self {
            Self::with_objects(MemoryObjectStore::new())
        }

        /// Same providers and store, but covers go to `objects`
        pub fn with_objects(objects: MemoryObjectStore) -> Self {
            let fetch = Arc::new(FakeFetch::new());
            fetch.respond(BIG_COVER, 200, noisy_png(300, 450));
            fetch.respond(SMALL_COVER, 200, vec![0xFF; 100]);
            let store = Arc::new(MemoryStore::new());
            let objects = Arc::new(objects);

            let mut providers = ProviderSettings::default();
            providers.isbndb_url = ISBNDB.to_owned();
            providers.isbndb_key = "key".to_owned();
            providers.openlibrary_url = OPENLIBRARY.to_owned();
            providers.google_books_url = GOOGLE.to_owned();
            providers.nytimes_url = NYTIMES.to_owned();
            providers.nytimes_key = "key".to_owned();
            providers.openai_url = LLM.to_owned();
            providers.openai_key = "key".to_owned();
            let settings = PipelineSettings::new(providers, QualitySettings::default());

            let services = Services::new(
                Arc::clone(&fetch) as Arc<dyn HttpFetch>,
                Arc::clone(&store) as Arc<dyn Store>,
                Arc::clone(&objects) as Arc<dyn ObjectStore>,
                Arc::new(SubjectTable::builtin().unwrap()),
                &settings,
            );
            Self {
                fetch,
                store,
                objects,
                services,
            }
        }

        pub fn resolver(&self) -> &Resolver {
            &self.services.resolver
        }

        fn isbndb_json(isbn: &str, title: &str, author: &str, image: &str) -> serde_json::Value {
            json!({
                "isbn13": isbn,
                "title": title,
                "synopsis": "<p>A desert planet.</p>",
                "subjects": ["Fiction -> Science Fiction"],
                "image": image,
                "authors": [author]
            })
        }

        pub fn isbndb_book(&self, isbn: &str, title: &str, author: &str, image: &str) {
            self.fetch.json(
                &format!("{ISBNDB}/book/{isbn}"),
                &json!({ "book": Self::isbndb_json(isbn, title, author, image) }),
            );
        }

        pub fn isbndb_search(&self, isbn: &str, title: &str, author: &str, image: &str) {
            self.fetch.json(
                &format!(
                    "{ISBNDB}/books/{}?page=1&pageSize=20&column=title",
                    url_encode(title)
                ),
                &json!({ "books": [Self::isbndb_json(isbn, title, author, image)] }),
            );
        }

        pub fn openlibrary_isbn(&self, isbn: &str, work: &str) {
            self.fetch.json(
                &format!("{OPENLIBRARY}/isbn/{isbn}.json"),
                &json!({ "works": [{ "key": format!("/works/{work}") }] }),
            );
        }

        pub fn openlibrary_work(&self, olid: &str, title: &str, author_olid: &str) {
            self.fetch.json(
                &format!("{OPENLIBRARY}/works/{olid}.json"),
                &json!({
                    "title": title,
                    "description": { "type": "/type/text", "value": "A desert planet." },
                    "subjects": ["Science fiction"],
                    "authors": [{ "author": { "key": format!("/authors/{author_olid}") } }]
                }),
            );
        }

        pub fn openlibrary_author(&self, olid: &str, name: &str) {
            self.fetch.json(
                &format!("{OPENLIBRARY}/authors/{olid}.json"),
                &json!({ "name": name, "bio": "Wrote books." }),
            );
        }

        pub fn openlibrary_search(&self, title: &str, author: &str, work: &str, author_olid: &str) {
            self.fetch.json(
                &format!(
                    "{OPENLIBRARY}/search.json?title={}&author={}&sort=rating&limit=1&fields=title,key,author_key,subject_key",
                    url_encode(title),
                    url_encode(author)
                ),
                &json!({ "docs": [{
                    "key": format!("/works/{work}"),
                    "title": title,
                    "author_key": [author_olid]
                }] }),
            );
        }

        pub fn google_volume(
            &self,
            title: &str,
            author: &str,
            id: &str,
            found_title: &str,
            categories: &[&str],
        ) {
            self.fetch.json(
                &format!(
                    "{GOOGLE}/volumes?q=intitle:{}+inauthor:{}&projection=full&langRestrict=en",
                    url_encode(title),
                    url_encode(author)
                ),
                &json!({ "items": [{
                    "id": id,
                    "volumeInfo": { "title": found_title, "categories": categories }
                }] }),
            );
            self.fetch.json(
                &format!("{GOOGLE}/volumes/{id}"),
                &json!({ "volumeInfo": { "title": found_title, "categories": categories } }),
            );
        }

        /// ISBNdb, OpenLibrary and author documents for one fully resolvable book
        pub fn known_book(&self, isbn: &str, title: &str, work: &str, cover: &str) {
            self.isbndb_book(isbn, title, "Frank Herbert", cover);
            self.isbndb_search(isbn, title, "Frank Herbert", cover);
            self.openlibrary_isbn(isbn, work);
            self.openlibrary_work(work, title, "OL123A");
            self.openlibrary_author("OL123A", "Frank Herbert");
        }
    }
}
