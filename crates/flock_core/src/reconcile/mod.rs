//! Reconciliation engine
//!
//! Decides, for one resolved candidate, whether it is a new book, an update of the placeholder row
//! it was queued for, or a duplicate of a row that already owns its ISBN or OpenLibrary id.
//! Identity is matched on the work id first, then on the ISBN. Authors are only ever matched on
//! their OpenLibrary id, never on name.
//!
//! Lost insert races (unique violations) are not errors: the winning row is re-read and the
//! candidate is merged into it.
pub mod editions;
pub mod seen;

use crate::covers::{CoverPipeline, CoverStatus};
use crate::database::Store;
use crate::database::types::{BookRecord, BookUpdate, NewAuthor, NewBook, Source, StoreError};
use crate::providers::ProviderRecord;
use crate::sanitize::sanitize;
use crate::subjects::{SubjectTable, join_subjects, split_subjects};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A provider record after sanitizing and subject classification
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRecord {
    pub title: String,
    pub author_name: Option<String>,
    pub author_olid: Option<String>,
    pub author_bio: String,
    pub isbn: Option<String>,
    pub olid: Option<String>,
    pub cover_url: Option<String>,
    pub description: String,
    pub subjects: BTreeSet<String>,
}

impl ClassifiedRecord {
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items, reason = "Called once per item")]
    pub fn new(record: ProviderRecord, table: &SubjectTable) -> Self {
        let subjects = table.classify_all(&record.raw_subjects);
        Self {
            title: record.title.trim().to_owned(),
            author_name: record.author_name,
            author_olid: record.author_olid,
            author_bio: sanitize(Some(&record.author_bio)),
            isbn: record.isbn,
            olid: record.olid,
            cover_url: record.cover_url,
            description: sanitize(Some(&record.description)),
            subjects,
        }
    }

    /// Reason the record cannot be stored, if any
    fn missing_field(&self) -> Option<&'static str> {
        if self.title.is_empty() {
            Some("missing title")
        } else if self.author_name.as_deref().is_none_or(str::is_empty) {
            Some("missing author")
        } else if self.subjects.is_empty() {
            Some("no recognised subjects")
        } else {
            None
        }
    }
}

/// Terminal state of one candidate
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Inserted(Uuid),
    /// The placeholder row the candidate was queued for now carries its data
    Updated(Uuid),
    /// The candidate already existed. `merged` is the placeholder that was folded into it.
    DuplicateMerged {
        surviving: Uuid,
        merged: Option<Uuid>,
    },
    Rejected(String),
}

impl Outcome {
    #[must_use]
    #[inline]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Inserted(_) => "inserted",
            Self::Updated(_) => "updated",
            Self::DuplicateMerged { .. } => "duplicate_merged",
            Self::Rejected(_) => "rejected",
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    covers: Arc<CoverPipeline>,
    subjects: Arc<SubjectTable>,
}

impl Reconciler {
    #[must_use]
    #[inline]
    pub const fn new(
        store: Arc<dyn Store>,
        covers: Arc<CoverPipeline>,
        subjects: Arc<SubjectTable>,
    ) -> Self {
        Self {
            store,
            covers,
            subjects,
        }
    }

    #[must_use]
    #[inline]
    pub fn classify(&self, record: ProviderRecord) -> ClassifiedRecord {
        ClassifiedRecord::new(record, &self.subjects)
    }

    /// Commits one candidate. `placeholder` is the row the candidate was queued for, if any.
    ///
    /// # Errors
    /// Only fatal store errors are returned; conflicts are resolved by merging.
    #[instrument(skip_all, fields(title = %record.title, isbn = ?record.isbn, olid = ?record.olid))]
    #[allow(clippy::missing_inline_in_public_items, reason = "Called once per item")]
    pub async fn reconcile(
        &self,
        record: &ClassifiedRecord,
        placeholder: Option<&BookRecord>,
        source: Source,
        priority: i32,
    ) -> Result<Outcome, StoreError> {
        if let Some(reason) = record.missing_field() {
            info!(%reason, "candidate rejected");
            return Ok(Outcome::Rejected(reason.to_owned()));
        }

        let placeholder_id = placeholder.map(|row| row.id);
        if let Some(existing) = self.find_existing(record, placeholder_id).await? {
            return self.merge(record, existing, placeholder_id).await;
        }

        let author_id = self.resolve_author(record, source).await?;
        let subjects = join_subjects(&record.subjects);

        let written = match placeholder_id {
            Some(id) => {
                let update = BookUpdate {
                    name: record.title.clone(),
                    isbn: record.isbn.clone(),
                    olid: record.olid.clone(),
                    description: record.description.clone(),
                    subjects,
                    author_id,
                };
                self.store
                    .update_book(id, &update)
                    .await
                    .map(|row| (row, Outcome::Updated(id)))
            }
            None => {
                let book = NewBook {
                    name: record.title.clone(),
                    isbn: record.isbn.clone(),
                    olid: record.olid.clone(),
                    description: record.description.clone(),
                    subjects,
                    source,
                    priority,
                    author_id,
                };
                self.store
                    .insert_book(&book)
                    .await
                    .map(|row| {
                        let id = row.id;
                        (row, Outcome::Inserted(id))
                    })
            }
        };

        let (row, outcome) = match written {
            Ok(written) => written,
            Err(StoreError::Conflict(constraint)) => {
                info!(%constraint, "lost insert race, merging into winning row");
                let Some(winner) = self.find_existing(record, placeholder_id).await? else {
                    return Err(StoreError::Conflict(constraint));
                };
                return self.merge(record, winner, placeholder_id).await;
            }
            Err(error) => return Err(error),
        };

        info!(book_id = %row.id, author_id = ?author_id, outcome = outcome.label(), "book stored");
        self.store_cover(record, &row).await?;
        Ok(outcome)
    }

    async fn find_existing(
        &self,
        record: &ClassifiedRecord,
        exclude: Option<Uuid>,
    ) -> Result<Option<BookRecord>, StoreError> {
        self.store
            .find_book_by_olid_or_isbn(record.olid.as_deref(), record.isbn.as_deref(), exclude)
            .await
    }

    /// Folds the candidate into `existing`: redirects the placeholder's shelf entries, deletes
    /// the placeholder, and retries the cover if the surviving row has none yet.
    async fn merge(
        &self,
        record: &ClassifiedRecord,
        existing: BookRecord,
        placeholder: Option<Uuid>,
    ) -> Result<Outcome, StoreError> {
        if let Some(old) = placeholder {
            let moved = self.store.redirect_book(old, existing.id).await?;
            info!(%old, surviving = %existing.id, moved, "placeholder merged into existing book");
        } else {
            info!(surviving = %existing.id, "book already stored");
        }

        self.store_cover(record, &existing).await?;
        Ok(Outcome::DuplicateMerged {
            surviving: existing.id,
            merged: placeholder,
        })
    }

    /// Runs the cover pipeline for rows without a good cover and records the verdict.
    async fn store_cover(
        &self,
        record: &ClassifiedRecord,
        row: &BookRecord,
    ) -> Result<(), StoreError> {
        if row.good_cover {
            return Ok(());
        }
        match self.covers.acquire(record.cover_url.as_deref(), row.id).await {
            Ok(CoverStatus::Uploaded { key }) => {
                self.store.mark_cover_quality(row.id, true, Some(&key)).await
            }
            Ok(status) => {
                debug!(book_id = %row.id, ?status, "cover not accepted");
                Ok(())
            }
            Err(error) => {
                warn!(book_id = %row.id, %error, "cover could not be stored");
                Ok(())
            }
        }
    }

    /// Lookup-or-create by OpenLibrary author id. A repeat encounter widens the author's subjects
    /// with the candidate's. No id means the book stays authorless.
    async fn resolve_author(
        &self,
        record: &ClassifiedRecord,
        source: Source,
    ) -> Result<Option<Uuid>, StoreError> {
        let Some(olid) = record.author_olid.as_deref() else {
            info!(author = ?record.author_name, "no OpenLibrary author id, storing book without author");
            return Ok(None);
        };

        if let Some(author) = self.store.find_author_by_olid(olid).await? {
            self.merge_author_subjects(author.id, author.subjects.as_deref(), &record.subjects)
                .await?;
            return Ok(Some(author.id));
        }

        let author = NewAuthor {
            olid: olid.to_owned(),
            name: record.author_name.clone().unwrap_or_default(),
            bio: record.author_bio.clone(),
            subjects: join_subjects(&record.subjects),
            source,
        };
        match self.store.insert_author(&author).await {
            Ok(created) => {
                info!(author_id = %created.id, %olid, "author created");
                Ok(Some(created.id))
            }
            Err(StoreError::Conflict(constraint)) => {
                let Some(winner) = self.store.find_author_by_olid(olid).await? else {
                    return Err(StoreError::Conflict(constraint));
                };
                self.merge_author_subjects(winner.id, winner.subjects.as_deref(), &record.subjects)
                    .await?;
                Ok(Some(winner.id))
            }
            Err(error) => Err(error),
        }
    }

    async fn merge_author_subjects(
        &self,
        id: Uuid,
        stored: Option<&str>,
        incoming: &BTreeSet<String>,
    ) -> Result<(), StoreError> {
        let mut subjects = split_subjects(stored.unwrap_or_default());
        let before = subjects.len();
        subjects.extend(incoming.iter().cloned());
        if subjects.len() > before {
            debug!(author_id = %id, "widening author subjects");
            self.store
                .update_author_subjects(id, &join_subjects(&subjects))
                .await?;
        }
        Ok(())
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
    use crate::covers::storage::ObjectStore;
    use crate::covers::storage::memory::MemoryObjectStore;
    use crate::covers::test_images::noisy_png;
    use crate::database::memory::MemoryStore;
    use crate::database::types::PRIORITY_NY_TIMES;
    use crate::providers::http::HttpFetch;
    use crate::providers::http::fake::FakeFetch;
    use crate::subjects::{Delimiter, RawSubject};
    use pretty_assertions::assert_eq;

    const ISBN: &str = "9780000000001";
    const BIG_COVER: &str = "https://images.test/big.jpg";
    const SMALL_COVER: &str = "https://images.test/small.jpg";

    struct Harness {
        store: Arc<MemoryStore>,
        objects: Arc<MemoryObjectStore>,
        reconciler: Reconciler,
    }

    fn harness() -> Harness {
        let fetch = Arc::new(FakeFetch::new());
        fetch.respond(BIG_COVER, 200, noisy_png(300, 450));
        fetch.respond(SMALL_COVER, 200, vec![0xFF; 100]);
        let store = Arc::new(MemoryStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let covers = CoverPipeline::new(
            fetch as Arc<dyn HttpFetch>,
            Arc::clone(&objects) as Arc<dyn ObjectStore>,
            &QualitySettings::default(),
        );
        let reconciler = Reconciler::new(
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(covers),
            Arc::new(SubjectTable::builtin().unwrap()),
        );
        Harness {
            store,
            objects,
            reconciler,
        }
    }

    fn dune(cover: &str) -> ProviderRecord {
        ProviderRecord {
            title: "Dune".to_owned(),
            author_name: Some("Frank Herbert".to_owned()),
            author_olid: Some("OL123A".to_owned()),
            isbn: Some(ISBN.to_owned()),
            cover_url: Some(cover.to_owned()),
            description: "<p>A desert planet.</p>".to_owned(),
            raw_subjects: vec![RawSubject::new(
                "Fiction -> Science Fiction",
                Delimiter::Arrow,
            )],
            ..ProviderRecord::default()
        }
    }

    async fn run(harness: &Harness, record: ProviderRecord) -> Outcome {
        let classified = harness.reconciler.classify(record);
        harness
            .reconciler
            .reconcile(&classified, None, Source::NyTimes, PRIORITY_NY_TIMES)
            .await
            .unwrap()
    }

    #[test]
    fn classification_sanitizes_and_tags() {
        let table = SubjectTable::builtin().unwrap();
        let record = ClassifiedRecord::new(dune(BIG_COVER), &table);
        assert_eq!(record.description, "A desert planet.");
        assert!(record.subjects.contains("science-fiction"));
    }

    #[tokio::test]
    async fn new_book_creates_author_and_uploads_cover() {
        let harness = harness();

        let outcome = run(&harness, dune(BIG_COVER)).await;

        let books = harness.store.books().await;
        let authors = harness.store.authors().await;
        assert_eq!(books.len(), 1);
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].olid.as_deref(), Some("OL123A"));
        assert_eq!(outcome, Outcome::Inserted(books[0].id));
        assert_eq!(books[0].isbn.as_deref(), Some(ISBN));
        assert_eq!(books[0].author_id, Some(authors[0].id));
        assert_eq!(books[0].source.as_deref(), Some("NY_TIMES"));
        assert_eq!(books[0].priority, 4);
        assert!(books[0].good_cover);
        assert_eq!(harness.objects.keys(), vec![format!("covers/{}.jpg", books[0].id)]);
    }

    #[tokio::test]
    async fn small_cover_leaves_good_cover_false() {
        let harness = harness();

        run(&harness, dune(SMALL_COVER)).await;

        let books = harness.store.books().await;
        assert!(!books[0].good_cover);
        assert!(harness.objects.keys().is_empty());
        assert_eq!(harness.store.cover_updates().await, 0);
    }

    #[tokio::test]
    async fn same_isbn_twice_inserts_once() {
        let harness = harness();
        run(&harness, dune(BIG_COVER)).await;

        let second = run(&harness, dune(BIG_COVER)).await;

        let books = harness.store.books().await;
        assert_eq!(books.len(), 1);
        assert_eq!(harness.store.book_inserts().await, 1);
        assert_eq!(harness.store.cover_updates().await, 1);
        assert_eq!(
            second,
            Outcome::DuplicateMerged {
                surviving: books[0].id,
                merged: None
            }
        );
    }

    #[tokio::test]
    async fn duplicate_retries_missing_cover_once() {
        let harness = harness();
        run(&harness, dune(SMALL_COVER)).await;

        run(&harness, dune(BIG_COVER)).await;

        assert_eq!(harness.store.book_inserts().await, 1);
        assert_eq!(harness.store.cover_updates().await, 1);
        assert!(harness.store.books().await[0].good_cover);
    }

    #[tokio::test]
    async fn olid_match_wins_over_isbn_match() {
        let harness = harness();
        let by_isbn = harness.store.seed_book("Dune (paperback)", Some(ISBN), None).await;
        let by_olid = harness.store.seed_book("Dune", None, Some("OL1W")).await;
        let mut record = dune(SMALL_COVER);
        record.olid = Some("OL1W".to_owned());

        let outcome = run(&harness, record).await;

        assert_eq!(
            outcome,
            Outcome::DuplicateMerged {
                surviving: by_olid,
                merged: None
            }
        );
        assert_ne!(by_isbn, by_olid);
    }

    #[tokio::test]
    async fn placeholder_is_updated_in_place() {
        let harness = harness();
        let placeholder = harness.store.seed_book("dune", None, Some("OL1W")).await;
        let row = harness.store.find_book_by_id(placeholder).await.unwrap().unwrap();
        let mut record = dune(BIG_COVER);
        record.olid = Some("OL1W".to_owned());
        let classified = harness.reconciler.classify(record);

        let outcome = harness
            .reconciler
            .reconcile(&classified, Some(&row), Source::OpenLibrary, 0)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Updated(placeholder));
        let books = harness.store.books().await;
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].name, "Dune");
        assert_eq!(books[0].isbn.as_deref(), Some(ISBN));
        assert_eq!(books[0].subjects.as_deref(), Some("science-fiction"));
        assert!(books[0].author_id.is_some());
        assert!(books[0].good_cover);
        assert_eq!(harness.store.book_inserts().await, 0);
    }

    #[tokio::test]
    async fn placeholder_duplicate_is_redirected_and_deleted() {
        let harness = harness();
        let user = Uuid::new_v4();
        let existing = harness.store.seed_book("Dune", Some(ISBN), None).await;
        let placeholder = harness.store.seed_book("dune", None, None).await;
        harness.store.shelve(user, placeholder).await;
        let row = harness.store.find_book_by_id(placeholder).await.unwrap().unwrap();
        let classified = harness.reconciler.classify(dune(SMALL_COVER));

        let outcome = harness
            .reconciler
            .reconcile(&classified, Some(&row), Source::OpenLibrary, 0)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::DuplicateMerged {
                surviving: existing,
                merged: Some(placeholder)
            }
        );
        let books = harness.store.books().await;
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].id, existing);
        assert_eq!(harness.store.shelves().await, vec![(user, existing)]);
    }

    #[tokio::test]
    async fn lost_insert_race_merges_into_winner() {
        let harness = harness();
        harness.store.race_next_insert("Dune", Some(ISBN), None).await;

        let outcome = run(&harness, dune(SMALL_COVER)).await;

        let books = harness.store.books().await;
        assert_eq!(books.len(), 1);
        assert_eq!(
            outcome,
            Outcome::DuplicateMerged {
                surviving: books[0].id,
                merged: None
            }
        );
        assert_eq!(harness.store.book_inserts().await, 0);
    }

    #[tokio::test]
    async fn fatal_store_error_propagates() {
        let harness = harness();
        harness.store.fail_next_insert().await;
        let classified = harness.reconciler.classify(dune(SMALL_COVER));

        let result = harness
            .reconciler
            .reconcile(&classified, None, Source::NyTimes, PRIORITY_NY_TIMES)
            .await;

        assert!(matches!(result, Err(StoreError::Db(_))));
    }

    #[tokio::test]
    async fn missing_required_fields_are_rejected() {
        let harness = harness();
        let mut untagged = dune(BIG_COVER);
        untagged.raw_subjects = vec![RawSubject::new("Unclassifiable", Delimiter::Slash)];
        let mut anonymous = dune(BIG_COVER);
        anonymous.author_name = None;

        assert_eq!(
            run(&harness, untagged).await,
            Outcome::Rejected("no recognised subjects".to_owned())
        );
        assert_eq!(
            run(&harness, anonymous).await,
            Outcome::Rejected("missing author".to_owned())
        );
        assert!(harness.store.books().await.is_empty());
        assert!(harness.store.authors().await.is_empty());
    }

    #[tokio::test]
    async fn author_without_olid_gives_authorless_book() {
        let harness = harness();
        let mut record = dune(SMALL_COVER);
        record.author_olid = None;

        run(&harness, record).await;

        assert!(harness.store.authors().await.is_empty());
        assert_eq!(harness.store.books().await[0].author_id, None);
    }

    #[tokio::test]
    async fn same_name_different_olid_stays_distinct() {
        let harness = harness();
        let mut other = dune(SMALL_COVER);
        other.title = "Another Dune".to_owned();
        other.isbn = Some("9780000000002".to_owned());
        other.author_olid = Some("OL999A".to_owned());

        run(&harness, dune(SMALL_COVER)).await;
        run(&harness, other).await;

        assert_eq!(harness.store.authors().await.len(), 2);
    }

    #[tokio::test]
    async fn repeat_author_subjects_are_widened() {
        let harness = harness();
        let author = harness
            .store
            .seed_author("Frank Herbert", "OL123A", "fantasy")
            .await;

        run(&harness, dune(SMALL_COVER)).await;

        let authors = harness.store.authors().await;
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].id, author);
        assert_eq!(
            authors[0].subjects.as_deref(),
            Some("fantasy,science-fiction")
        );
    }

    #[tokio::test]
    async fn lost_author_race_reuses_winner() {
        let harness = harness();
        let winner = harness
            .store
            .race_next_author_insert("Frank Herbert", "OL123A", "fantasy")
            .await;

        let outcome = run(&harness, dune(SMALL_COVER)).await;

        let authors = harness.store.authors().await;
        let books = harness.store.books().await;
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].id, winner);
        assert_eq!(
            authors[0].subjects.as_deref(),
            Some("fantasy,science-fiction")
        );
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].author_id, Some(winner));
        assert_eq!(outcome, Outcome::Inserted(books[0].id));
    }
}
