//! AI recommendations
//!
//! For a matched pair of users, every book both have shelved seeds a request for similar titles.
//! Suggestions are deduplicated across the whole batch before any provider is asked about them,
//! since the model readily proposes the same classics for different seeds.
use crate::database::Store;
use crate::database::types::{PRIORITY_RECOMMENDATION, Source, StoreError};
use crate::pipeline::Services;
use crate::pipeline::report::{BatchReport, ItemOutcome};
use crate::pipeline::resolver::{Hint, Resolver};
use crate::providers::Lookup;
use crate::providers::recommender::{RecommenderClient, Suggestion};
use crate::reconcile::seen::SeenTitles;
use crate::reconcile::{Outcome, Reconciler};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub struct RecommendationPipeline {
    store: Arc<dyn Store>,
    recommender: Arc<RecommenderClient>,
    resolver: Arc<Resolver>,
    reconciler: Arc<Reconciler>,
}

impl RecommendationPipeline {
    #[must_use]
    #[inline]
    pub fn new(services: &Services) -> Self {
        Self {
            store: Arc::clone(&services.store),
            recommender: Arc::clone(&services.recommender),
            resolver: Arc::clone(&services.resolver),
            reconciler: Arc::clone(&services.reconciler),
        }
    }

    /// Only the first two users are matched; fewer than two makes the batch a no-op.
    #[instrument(skip_all, fields(users = users.len()))]
    #[allow(clippy::missing_inline_in_public_items, reason = "Called once per message")]
    pub async fn run(&self, users: &[Uuid]) -> BatchReport {
        let mut report = BatchReport::new();
        let [first, second, ..] = users else {
            info!("fewer than two users, nothing to recommend");
            return report;
        };

        let seeds = match self.store.shared_books(*first, *second).await {
            Ok(seeds) => seeds,
            Err(error) => {
                report.abort(error.to_string());
                return report;
            }
        };
        info!(seeds = seeds.len(), "shared books found");

        let mut suggestions: Vec<Suggestion> = Vec::new();
        for seed in &seeds {
            match self
                .recommender
                .similar_books(&seed.name, &seed.author_name)
                .await
            {
                Lookup::Found(found) => {
                    debug!(seed = %seed.name, count = found.len(), "suggestions received");
                    suggestions.extend(found);
                }
                other => warn!(seed = %seed.name, lookup = other.label(), "no suggestions"),
            }
        }

        let mut seen = SeenTitles::new();
        for suggestion in &suggestions {
            if !seen.first_sighting(&suggestion.title) {
                report.record(
                    suggestion.title.as_str(),
                    ItemOutcome::Skipped("already suggested in this batch".to_owned()),
                );
                continue;
            }
            match self.recommend(suggestion).await {
                Ok(outcome) => report.record(suggestion.title.as_str(), outcome),
                Err(error) => {
                    report.abort(error.to_string());
                    break;
                }
            }
        }
        info!(summary = ?report.summary(), "recommendation batch finished");
        report
    }

    async fn recommend(&self, suggestion: &Suggestion) -> Result<ItemOutcome, StoreError> {
        let hint = Hint::titled(&suggestion.title, &suggestion.author);
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
            .reconcile(
                &classified,
                None,
                Source::ChatGptRecommendation,
                PRIORITY_RECOMMENDATION,
            )
            .await?;
        Ok(ItemOutcome::Reconciled(outcome))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{Fixtures, ISBN, ISBNDB, LLM, SMALL_COVER};
    use crate::providers::recommender::completion;
    use pretty_assertions::assert_eq;

    /// Two users sharing one seed book whose suggestions are `suggested`
    async fn matched_users(fixtures: &Fixtures, suggested: &[(&str, &str)]) -> [Uuid; 2] {
        let seed = fixtures.store.seed_book("Foundation", None, None).await;
        let author = fixtures
            .store
            .seed_author("Isaac Asimov", "OL34221A", "science-fiction")
            .await;
        fixtures.store.set_author(seed, author).await;
        let users = [Uuid::new_v4(), Uuid::new_v4()];
        for user in users {
            fixtures.store.shelve(user, seed).await;
        }
        fixtures
            .fetch
            .json(&format!("{LLM}/chat/completions"), &completion(suggested));
        users
    }

    #[tokio::test]
    async fn repeated_suggestion_reaches_isbndb_once() {
        let fixtures = Fixtures::new();
        fixtures.known_book(ISBN, "Dune", "OL1W", SMALL_COVER);
        let users = matched_users(
            &fixtures,
            &[("Dune", "Frank Herbert"), ("dune", "Frank Herbert")],
        )
        .await;

        let report = RecommendationPipeline::new(&fixtures.services)
            .run(&users)
            .await;

        assert_eq!(fixtures.fetch.calls_starting_with(ISBNDB).len(), 1);
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.items[0].outcome.label(), "inserted");
        assert_eq!(report.items[1].outcome.label(), "skipped");

        let books = fixtures.store.books().await;
        let dune = books.iter().find(|book| book.name == "Dune").unwrap();
        assert_eq!(dune.source.as_deref(), Some("CHAT_GPT_RECOMMENDATION"));
        assert_eq!(dune.priority, 0);
    }

    #[tokio::test]
    async fn single_user_is_a_no_op() {
        let fixtures = Fixtures::new();
        let users = matched_users(&fixtures, &[("Dune", "Frank Herbert")]).await;

        let report = RecommendationPipeline::new(&fixtures.services)
            .run(&users[..1])
            .await;

        assert!(report.is_complete());
        assert!(report.items.is_empty());
        assert!(fixtures.fetch.calls().is_empty());
    }

    #[tokio::test]
    async fn users_without_shared_books_get_nothing() {
        let fixtures = Fixtures::new();
        matched_users(&fixtures, &[("Dune", "Frank Herbert")]).await;

        let report = RecommendationPipeline::new(&fixtures.services)
            .run(&[Uuid::new_v4(), Uuid::new_v4()])
            .await;

        assert!(report.items.is_empty());
        assert!(fixtures.fetch.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_suggestion_is_rejected() {
        let fixtures = Fixtures::new();
        let users = matched_users(&fixtures, &[("Imaginary Book", "Nobody")]).await;

        let report = RecommendationPipeline::new(&fixtures.services)
            .run(&users)
            .await;

        assert_eq!(
            report.items[0].outcome,
            ItemOutcome::Reconciled(Outcome::Rejected("no provider data".to_owned()))
        );
    }
}
