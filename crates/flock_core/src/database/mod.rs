//! Persistence layer
//!
//! Exposes the `Store` trait the reconciliation engine and pipelines write through, and `Db`, its
//! Postgres implementation. Every query is a plain runtime query so the crate builds without a live
//! database.
#[cfg(test)]
pub mod memory;
pub mod queries;
pub mod types;

use crate::database::types::{
    AuthorRecord, BookRecord, BookUpdate, NewAuthor, NewBook, SeedBook, StoreError,
};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_book_by_id(&self, id: Uuid) -> Result<Option<BookRecord>, StoreError>;

    /// Looks a book up by either identifier, preferring an OLID match. `exclude` skips the row
    /// currently being reconciled so a placeholder never matches itself.
    async fn find_book_by_olid_or_isbn(
        &self,
        olid: Option<&str>,
        isbn: Option<&str>,
        exclude: Option<Uuid>,
    ) -> Result<Option<BookRecord>, StoreError>;

    async fn insert_book(&self, book: &NewBook) -> Result<BookRecord, StoreError>;

    async fn update_book(&self, id: Uuid, update: &BookUpdate) -> Result<BookRecord, StoreError>;

    /// Points every user shelf entry of `old` at `surviving`, then deletes `old`.
    /// Returns the number of shelf entries moved.
    async fn redirect_book(&self, old: Uuid, surviving: Uuid) -> Result<u64, StoreError>;

    async fn mark_cover_quality(
        &self,
        id: Uuid,
        good_cover: bool,
        cover_key: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Books with `goodCover = false` that carry an ISBN
    async fn books_with_bad_covers(&self) -> Result<Vec<BookRecord>, StoreError>;

    async fn find_author_by_olid(&self, olid: &str) -> Result<Option<AuthorRecord>, StoreError>;

    async fn insert_author(&self, author: &NewAuthor) -> Result<AuthorRecord, StoreError>;

    async fn update_author_subjects(&self, id: Uuid, subjects: &str) -> Result<(), StoreError>;

    /// Books on the shelves of both users
    async fn shared_books(&self, first: Uuid, second: Uuid) -> Result<Vec<SeedBook>, StoreError>;
}
