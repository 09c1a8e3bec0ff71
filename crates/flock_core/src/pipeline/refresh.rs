//! Cover refresh
//!
//! Retries the cover of every book still flagged with a bad cover, using the ISBNdb image for
//! its ISBN.
use crate::covers::{CoverPipeline, CoverStatus};
use crate::database::Store;
use crate::database::types::{BookRecord, StoreError};
use crate::pipeline::Services;
use crate::pipeline::report::{BatchReport, ItemOutcome};
use crate::providers::isbndb::IsbnDbClient;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct RefreshPipeline {
    store: Arc<dyn Store>,
    isbndb: Arc<IsbnDbClient>,
    covers: Arc<CoverPipeline>,
}

impl RefreshPipeline {
    #[must_use]
    #[inline]
    pub fn new(services: &Services) -> Self {
        Self {
            store: Arc::clone(&services.store),
            isbndb: Arc::clone(&services.isbndb),
            covers: Arc::clone(&services.covers),
        }
    }

    #[instrument(skip_all)]
    #[allow(clippy::missing_inline_in_public_items, reason = "Called once per run")]
    pub async fn run(&self) -> BatchReport {
        let mut report = BatchReport::new();
        let books = match self.store.books_with_bad_covers().await {
            Ok(books) => books,
            Err(error) => {
                report.abort(error.to_string());
                return report;
            }
        };
        info!(count = books.len(), "books with bad covers");

        for book in &books {
            match self.refresh(book).await {
                Ok(outcome) => report.record(book.id.to_string(), outcome),
                Err(error) => {
                    report.abort(error.to_string());
                    break;
                }
            }
        }
        info!(refreshed = report.summary().covers_uploaded, "refresh finished");
        report
    }

    async fn refresh(&self, book: &BookRecord) -> Result<ItemOutcome, StoreError> {
        let Some(isbn) = book.isbn.as_deref() else {
            return Ok(ItemOutcome::Cover(CoverStatus::NotFound));
        };
        let image = self.isbndb.fetch_cover_url(isbn).await.found();

        match self.covers.acquire(image.as_deref(), book.id).await {
            Ok(CoverStatus::Uploaded { key }) => {
                self.store
                    .mark_cover_quality(book.id, true, Some(&key))
                    .await?;
                Ok(ItemOutcome::Cover(CoverStatus::Uploaded { key }))
            }
            Ok(status) => Ok(ItemOutcome::Cover(status)),
            Err(error) => {
                warn!(book_id = %book.id, %error, "cover could not be stored");
                Ok(ItemOutcome::Skipped(format!("cover could not be stored: {error}")))
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::covers::storage::memory::MemoryObjectStore;
    use crate::pipeline::testing::{BIG_COVER, Fixtures, SMALL_COVER};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn only_uploaded_covers_flip_the_flag() {
        let fixtures = Fixtures::new();
        let good = fixtures.store.seed_book("Dune", Some("1"), None).await;
        let tiny = fixtures.store.seed_book("Emma", Some("2"), None).await;
        let unknown = fixtures.store.seed_book("Ulysses", Some("3"), None).await;
        fixtures.store.seed_book("No ISBN", None, None).await;
        fixtures.isbndb_book("1", "Dune", "Frank Herbert", BIG_COVER);
        fixtures.isbndb_book("2", "Emma", "Jane Austen", SMALL_COVER);

        let report = RefreshPipeline::new(&fixtures.services).run().await;

        assert!(report.is_complete());
        assert_eq!(report.items.len(), 3);
        let outcome = |id: uuid::Uuid| {
            report
                .items
                .iter()
                .find(|item| item.key == id.to_string())
                .map(|item| item.outcome.label())
                .unwrap()
        };
        assert_eq!(outcome(good), "cover_uploaded");
        assert_eq!(outcome(tiny), "cover_bad_quality");
        assert_eq!(outcome(unknown), "cover_not_found");

        let flagged: Vec<_> = fixtures
            .store
            .books()
            .await
            .into_iter()
            .filter(|book| book.good_cover)
            .map(|book| book.id)
            .collect();
        assert_eq!(flagged, vec![good]);
        assert_eq!(fixtures.objects.keys(), vec![format!("covers/{good}.jpg")]);
    }

    #[tokio::test]
    async fn upload_failure_is_reported_as_skipped() {
        let fixtures = Fixtures::with_objects(MemoryObjectStore::refusing());
        let book = fixtures.store.seed_book("Dune", Some("1"), None).await;
        fixtures.isbndb_book("1", "Dune", "Frank Herbert", BIG_COVER);

        let report = RefreshPipeline::new(&fixtures.services).run().await;

        assert!(report.is_complete());
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].key, book.to_string());
        assert!(matches!(
            &report.items[0].outcome,
            ItemOutcome::Skipped(reason) if reason.starts_with("cover could not be stored")
        ));
        let summary = report.summary();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.covers_uploaded, 0);
        assert!(!fixtures.store.books().await[0].good_cover);
    }
}
