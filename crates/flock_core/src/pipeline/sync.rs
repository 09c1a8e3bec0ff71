//! Bestseller sync
//!
//! Pulls the current NY Times overview and stores every bestseller not yet known. Bestseller
//! metadata is only used as a hint; the stored record comes from the resolver.
use crate::database::Store;
use crate::database::types::{PRIORITY_NY_TIMES, Source, StoreError};
use crate::pipeline::Services;
use crate::pipeline::report::{BatchReport, ItemOutcome};
use crate::pipeline::resolver::{Hint, Resolver};
use crate::providers::Lookup;
use crate::providers::nytimes::{Bestseller, NyTimesClient};
use crate::reconcile::seen::SeenTitles;
use crate::reconcile::{Outcome, Reconciler};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct SyncPipeline {
    store: Arc<dyn Store>,
    nytimes: Arc<NyTimesClient>,
    resolver: Arc<Resolver>,
    reconciler: Arc<Reconciler>,
}

impl SyncPipeline {
    #[must_use]
    #[inline]
    pub fn new(services: &Services) -> Self {
        Self {
            store: Arc::clone(&services.store),
            nytimes: Arc::clone(&services.nytimes),
            resolver: Arc::clone(&services.resolver),
            reconciler: Arc::clone(&services.reconciler),
        }
    }

    #[instrument(skip_all)]
    #[allow(clippy::missing_inline_in_public_items, reason = "Called once per run")]
    pub async fn run(&self) -> BatchReport {
        let mut report = BatchReport::new();
        let bestsellers = match self.nytimes.list_bestsellers().await {
            Lookup::Found(bestsellers) => bestsellers,
            other => {
                warn!(lookup = other.label(), "bestseller overview unavailable");
                return report;
            }
        };
        info!(count = bestsellers.len(), "bestsellers listed");

        // The same book often sits on several lists
        let mut seen = SeenTitles::new();
        for bestseller in &bestsellers {
            if !seen.first_sighting(&listing_key(bestseller)) {
                report.record(
                    bestseller.title.as_str(),
                    ItemOutcome::Skipped("listed more than once".to_owned()),
                );
                continue;
            }
            match self.sync_one(bestseller).await {
                Ok(outcome) => report.record(bestseller.title.as_str(), outcome),
                Err(error) => {
                    report.abort(error.to_string());
                    break;
                }
            }
        }
        info!(summary = ?report.summary(), "sync finished");
        report
    }

    async fn sync_one(&self, bestseller: &Bestseller) -> Result<ItemOutcome, StoreError> {
        let known = match bestseller.isbn.as_deref() {
            Some(isbn) => {
                self.store
                    .find_book_by_olid_or_isbn(None, Some(isbn), None)
                    .await?
            }
            None => None,
        };
        if let Some(existing) = known {
            info!(isbn = ?bestseller.isbn, book_id = %existing.id, "bestseller already stored");
            return Ok(ItemOutcome::Reconciled(Outcome::DuplicateMerged {
                surviving: existing.id,
                merged: None,
            }));
        }

        let hint = Hint {
            title: Some(bestseller.title.clone()),
            author: Some(bestseller.author.clone()),
            isbn: bestseller.isbn.clone(),
            cover_url: bestseller.cover_url.clone(),
            description: Some(bestseller.description.clone()),
            ..Hint::default()
        };
        let record = match self.resolver.resolve(&hint).await {
            Lookup::Found(record) => record,
            Lookup::Rejected(reason) => {
                return Ok(ItemOutcome::Reconciled(Outcome::Rejected(reason)));
            }
            _ => {
                return Ok(ItemOutcome::Reconciled(Outcome::Rejected(
                    "no provider data".to_owned(),
                )));
            }
        };

        let classified = self.reconciler.classify(record);
        let outcome = self
            .reconciler
            .reconcile(&classified, None, Source::NyTimes, PRIORITY_NY_TIMES)
            .await?;
        Ok(ItemOutcome::Reconciled(outcome))
    }
}

/// Identity of a listing across lists: its ISBN, or its title for entries without one
fn listing_key(bestseller: &Bestseller) -> String {
    bestseller.isbn.as_deref().map_or_else(
        || format!("title:{}", bestseller.title),
        |isbn| format!("isbn:{isbn}"),
    )
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{BIG_COVER, Fixtures, ISBN, NYTIMES, SMALL_COVER};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn overview(fixtures: &Fixtures, books: &serde_json::Value) {
        fixtures.fetch.json(
            &format!("{NYTIMES}/lists/full-overview.json?api-key=key"),
            &json!({ "results": { "lists": [{ "books": books }] } }),
        );
    }

    fn dune_entry(cover: &str) -> serde_json::Value {
        json!({
            "title": "DUNE",
            "author": "Frank Herbert",
            "description": "Spice.",
            "book_image": cover,
            "primary_isbn13": ISBN
        })
    }

    #[tokio::test]
    async fn new_bestseller_is_stored_with_author_and_cover() {
        let fixtures = Fixtures::new();
        fixtures.known_book(ISBN, "Dune", "OL1W", BIG_COVER);
        overview(&fixtures, &json!([dune_entry(BIG_COVER)]));

        let report = SyncPipeline::new(&fixtures.services).run().await;

        assert!(report.is_complete());
        let books = fixtures.store.books().await;
        let authors = fixtures.store.authors().await;
        assert_eq!(books.len(), 1);
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].olid.as_deref(), Some("OL123A"));
        assert_eq!(books[0].isbn.as_deref(), Some(ISBN));
        assert_eq!(books[0].author_id, Some(authors[0].id));
        assert_eq!(books[0].source.as_deref(), Some("NY_TIMES"));
        assert_eq!(books[0].priority, 4);
        assert!(books[0].good_cover);
    }

    #[tokio::test]
    async fn small_cover_keeps_good_cover_false() {
        let fixtures = Fixtures::new();
        fixtures.known_book(ISBN, "Dune", "OL1W", SMALL_COVER);
        overview(&fixtures, &json!([dune_entry(SMALL_COVER)]));

        SyncPipeline::new(&fixtures.services).run().await;

        let books = fixtures.store.books().await;
        assert_eq!(books.len(), 1);
        assert!(!books[0].good_cover);
        assert!(fixtures.objects.keys().is_empty());
    }

    #[tokio::test]
    async fn second_run_inserts_nothing() {
        let fixtures = Fixtures::new();
        fixtures.known_book(ISBN, "Dune", "OL1W", BIG_COVER);
        overview(&fixtures, &json!([dune_entry(BIG_COVER)]));
        let pipeline = SyncPipeline::new(&fixtures.services);

        pipeline.run().await;
        let second = pipeline.run().await;

        assert_eq!(fixtures.store.book_inserts().await, 1);
        assert!(fixtures.store.cover_updates().await <= 1);
        assert_eq!(second.summary().merged, 1);
    }

    #[tokio::test]
    async fn entry_on_several_lists_is_processed_once() {
        let fixtures = Fixtures::new();
        fixtures.known_book(ISBN, "Dune", "OL1W", SMALL_COVER);
        overview(
            &fixtures,
            &json!([dune_entry(SMALL_COVER), dune_entry(SMALL_COVER)]),
        );

        let report = SyncPipeline::new(&fixtures.services).run().await;

        assert_eq!(report.items.len(), 2);
        assert_eq!(report.items[1].outcome.label(), "skipped");
        assert_eq!(fixtures.store.book_inserts().await, 1);
    }

    #[tokio::test]
    async fn same_title_with_different_isbns_is_not_collapsed() {
        let fixtures = Fixtures::new();
        fixtures.known_book("9780000000002", "Emma", "OL2W", SMALL_COVER);
        fixtures.known_book("9780000000003", "Emma", "OL3W", SMALL_COVER);
        let mut austen = dune_entry(SMALL_COVER);
        austen["title"] = json!("Emma");
        austen["primary_isbn13"] = json!("9780000000002");
        let mut namesake = austen.clone();
        namesake["primary_isbn13"] = json!("9780000000003");
        overview(&fixtures, &json!([austen, namesake]));

        let report = SyncPipeline::new(&fixtures.services).run().await;

        assert_eq!(report.summary().skipped, 0);
        assert_eq!(fixtures.store.book_inserts().await, 2);
    }

    #[tokio::test]
    async fn unavailable_overview_is_an_empty_run() {
        let fixtures = Fixtures::new();

        let report = SyncPipeline::new(&fixtures.services).run().await;

        assert!(report.is_complete());
        assert!(report.items.is_empty());
    }

    #[tokio::test]
    async fn fatal_store_error_aborts_remaining_items() {
        let fixtures = Fixtures::new();
        fixtures.known_book(ISBN, "Dune", "OL1W", SMALL_COVER);
        fixtures.known_book("9780000000002", "Emma", "OL2W", SMALL_COVER);
        let mut emma = dune_entry(SMALL_COVER);
        emma["title"] = json!("Emma");
        emma["primary_isbn13"] = json!("9780000000002");
        overview(&fixtures, &json!([dune_entry(SMALL_COVER), emma]));
        fixtures.store.fail_next_insert().await;

        let report = SyncPipeline::new(&fixtures.services).run().await;

        assert!(!report.is_complete());
        assert!(report.items.is_empty());
        assert!(fixtures.store.books().await.is_empty());
    }
}
