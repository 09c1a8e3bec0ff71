//! Population pipeline
//!
//! Books added by users start as placeholder rows holding little more than a name and a work
//! id. Each queued id is resolved against the providers and the placeholder is either filled
//! in, or merged into the row that already owns its identifiers.
use crate::database::Store;
use crate::database::types::{BookRecord, Source, StoreError};
use crate::pipeline::Services;
use crate::pipeline::report::{BatchReport, ItemOutcome};
use crate::pipeline::resolver::{Hint, Resolver};
use crate::providers::Lookup;
use crate::reconcile::{Outcome, Reconciler};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct PopulationPipeline {
    store: Arc<dyn Store>,
    resolver: Arc<Resolver>,
    reconciler: Arc<Reconciler>,
}

impl PopulationPipeline {
    #[must_use]
    #[inline]
    pub fn new(services: &Services) -> Self {
        Self {
            store: Arc::clone(&services.store),
            resolver: Arc::clone(&services.resolver),
            reconciler: Arc::clone(&services.reconciler),
        }
    }

    #[instrument(skip_all, fields(books = book_ids.len()))]
    #[allow(clippy::missing_inline_in_public_items, reason = "Called once per message")]
    pub async fn run(&self, book_ids: &[Uuid]) -> BatchReport {
        let mut report = BatchReport::new();
        for &id in book_ids {
            match self.populate(id).await {
                Ok(outcome) => report.record(id.to_string(), outcome),
                Err(error) => {
                    report.abort(error.to_string());
                    break;
                }
            }
        }
        info!(summary = ?report.summary(), "population batch finished");
        report
    }

    async fn populate(&self, id: Uuid) -> Result<ItemOutcome, StoreError> {
        let Some(row) = self.store.find_book_by_id(id).await? else {
            warn!(%id, "queued book does not exist");
            return Ok(ItemOutcome::Skipped("unknown book id".to_owned()));
        };

        let record = match self.resolver.resolve(&hint_for(&row)).await {
            Lookup::Found(record) => record,
            Lookup::Rejected(reason) => {
                return Ok(ItemOutcome::Reconciled(Outcome::Rejected(reason)));
            }
            other => {
                info!(%id, lookup = other.label(), "no provider data for queued book");
                return Ok(ItemOutcome::Reconciled(Outcome::Rejected(
                    "no provider data".to_owned(),
                )));
            }
        };

        let source = row
            .source
            .as_deref()
            .and_then(|source| source.parse().ok())
            .unwrap_or(Source::Flock);
        let classified = self.reconciler.classify(record);
        let outcome = self
            .reconciler
            .reconcile(&classified, Some(&row), source, row.priority)
            .await?;
        Ok(ItemOutcome::Reconciled(outcome))
    }
}

fn hint_for(row: &BookRecord) -> Hint {
    Hint {
        title: Some(row.name.clone()),
        isbn: row.isbn.clone(),
        olid: row.olid.clone(),
        description: row.description.clone(),
        ..Hint::default()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{BIG_COVER, Fixtures, ISBN, SMALL_COVER};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn placeholder_is_filled_in() {
        let fixtures = Fixtures::new();
        fixtures.known_book(ISBN, "Dune", "OL1W", BIG_COVER);
        let id = fixtures.store.seed_book("dune", Some(ISBN), None).await;

        let report = PopulationPipeline::new(&fixtures.services).run(&[id]).await;

        assert!(report.is_complete());
        assert_eq!(
            report.items[0].outcome,
            ItemOutcome::Reconciled(Outcome::Updated(id))
        );
        let book = fixtures.store.find_book_by_id(id).await.unwrap().unwrap();
        assert_eq!(book.name, "Dune");
        assert_eq!(book.olid.as_deref(), Some("OL1W"));
        assert_eq!(book.description.as_deref(), Some("A desert planet."));
        assert!(book.good_cover);
        let authors = fixtures.store.authors().await;
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].olid.as_deref(), Some("OL123A"));
        assert_eq!(authors[0].bio, "Wrote books.");
        assert_eq!(book.author_id, Some(authors[0].id));
    }

    #[tokio::test]
    async fn placeholder_of_known_work_is_merged() {
        let fixtures = Fixtures::new();
        fixtures.known_book(ISBN, "Dune", "OL1W", SMALL_COVER);
        let existing = fixtures.store.seed_book("Dune", None, Some("OL1W")).await;
        let placeholder = fixtures.store.seed_book("dune", Some(ISBN), None).await;
        let user = Uuid::new_v4();
        fixtures.store.shelve(user, placeholder).await;

        let report = PopulationPipeline::new(&fixtures.services)
            .run(&[placeholder])
            .await;

        assert_eq!(
            report.items[0].outcome,
            ItemOutcome::Reconciled(Outcome::DuplicateMerged {
                surviving: existing,
                merged: Some(placeholder)
            })
        );
        assert_eq!(fixtures.store.books().await.len(), 1);
        assert_eq!(fixtures.store.shelves().await, vec![(user, existing)]);
    }

    #[tokio::test]
    async fn unknown_ids_are_skipped_and_batch_continues() {
        let fixtures = Fixtures::new();
        fixtures.known_book(ISBN, "Dune", "OL1W", SMALL_COVER);
        let id = fixtures.store.seed_book("dune", Some(ISBN), None).await;

        let report = PopulationPipeline::new(&fixtures.services)
            .run(&[Uuid::new_v4(), id])
            .await;

        assert!(report.is_complete());
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.items[0].outcome.label(), "skipped");
        assert_eq!(report.items[1].outcome.label(), "updated");
    }

    #[tokio::test]
    async fn unresolvable_placeholder_is_left_alone() {
        let fixtures = Fixtures::new();
        let id = fixtures.store.seed_book("Mystery Book", None, None).await;

        let report = PopulationPipeline::new(&fixtures.services).run(&[id]).await;

        assert_eq!(
            report.items[0].outcome,
            ItemOutcome::Reconciled(Outcome::Rejected("no provider data".to_owned()))
        );
        let book = fixtures.store.find_book_by_id(id).await.unwrap().unwrap();
        assert_eq!(book.name, "Mystery Book");
    }
}
