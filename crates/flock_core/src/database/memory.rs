//! In-memory `Store` mirroring the Postgres schema's uniqueness rules, used by the
//! reconciliation and pipeline tests.
#![allow(clippy::unwrap_used, reason = "Test-only store")]

use crate::database::Store;
use crate::database::types::{
    AuthorRecord, BookRecord, BookUpdate, NewAuthor, NewBook, SeedBook, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    books: Vec<BookRecord>,
    authors: Vec<AuthorRecord>,
    /// (user, book)
    shelves: Vec<(Uuid, Uuid)>,
    book_inserts: usize,
    cover_updates: usize,
    /// Inserted right before the next book insert, as if another invocation won the race
    racing_book: Option<BookRecord>,
    /// Same for the next author insert
    racing_author: Option<AuthorRecord>,
    fail_next_insert: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn books(&self) -> Vec<BookRecord> {
        self.state.lock().await.books.clone()
    }

    pub async fn authors(&self) -> Vec<AuthorRecord> {
        self.state.lock().await.authors.clone()
    }

    pub async fn shelves(&self) -> Vec<(Uuid, Uuid)> {
        self.state.lock().await.shelves.clone()
    }

    pub async fn book_inserts(&self) -> usize {
        self.state.lock().await.book_inserts
    }

    pub async fn cover_updates(&self) -> usize {
        self.state.lock().await.cover_updates
    }

    /// Seeds a row directly, bypassing the counters
    pub async fn seed_book(&self, name: &str, isbn: Option<&str>, olid: Option<&str>) -> Uuid {
        let record = book_record(name, isbn, olid);
        let id = record.id;
        self.state.lock().await.books.push(record);
        id
    }

    pub async fn seed_author(&self, name: &str, olid: &str, subjects: &str) -> Uuid {
        let record = author_record(name, olid, subjects);
        let id = record.id;
        self.state.lock().await.authors.push(record);
        id
    }

    pub async fn set_author(&self, book: Uuid, author: Uuid) {
        let mut state = self.state.lock().await;
        let row = state.books.iter_mut().find(|b| b.id == book).unwrap();
        row.author_id = Some(author);
    }

    pub async fn shelve(&self, user: Uuid, book: Uuid) {
        self.state.lock().await.shelves.push((user, book));
    }

    /// The next `insert_book` first sees a concurrent row with these identifiers
    pub async fn race_next_insert(&self, name: &str, isbn: Option<&str>, olid: Option<&str>) {
        self.state.lock().await.racing_book = Some(book_record(name, isbn, olid));
    }

    /// The next `insert_author` first sees a concurrent row for `olid`. Returns the racing id.
    pub async fn race_next_author_insert(&self, name: &str, olid: &str, subjects: &str) -> Uuid {
        let record = author_record(name, olid, subjects);
        let id = record.id;
        self.state.lock().await.racing_author = Some(record);
        id
    }

    /// The next `insert_book` fails with a non-conflict database error
    pub async fn fail_next_insert(&self) {
        self.state.lock().await.fail_next_insert = true;
    }
}

fn book_record(name: &str, isbn: Option<&str>, olid: Option<&str>) -> BookRecord {
    let now = Utc::now();
    BookRecord {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        isbn: isbn.map(str::to_owned),
        olid: olid.map(str::to_owned),
        description: None,
        subjects: None,
        cover: None,
        good_cover: false,
        source: None,
        priority: 0,
        author_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn author_record(name: &str, olid: &str, subjects: &str) -> AuthorRecord {
    let now = Utc::now();
    AuthorRecord {
        id: Uuid::new_v4(),
        olid: Some(olid.to_owned()),
        name: name.to_owned(),
        bio: String::new(),
        subjects: Some(subjects.to_owned()),
        source: None,
        created_at: now,
        updated_at: now,
    }
}

fn collides(existing: &BookRecord, isbn: Option<&String>, olid: Option<&String>) -> bool {
    (isbn.is_some() && existing.isbn.as_ref() == isbn)
        || (olid.is_some() && existing.olid.as_ref() == olid)
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_book_by_id(&self, id: Uuid) -> Result<Option<BookRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.books.iter().find(|b| b.id == id).cloned())
    }

    async fn find_book_by_olid_or_isbn(
        &self,
        olid: Option<&str>,
        isbn: Option<&str>,
        exclude: Option<Uuid>,
    ) -> Result<Option<BookRecord>, StoreError> {
        let state = self.state.lock().await;
        let candidates = || state.books.iter().filter(|b| Some(b.id) != exclude);
        let by_olid = olid.and_then(|o| candidates().find(|b| b.olid.as_deref() == Some(o)));
        let by_isbn = isbn.and_then(|i| candidates().find(|b| b.isbn.as_deref() == Some(i)));
        Ok(by_olid.or(by_isbn).cloned())
    }

    async fn insert_book(&self, book: &NewBook) -> Result<BookRecord, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(racing) = state.racing_book.take() {
            state.books.push(racing);
        }
        if state.fail_next_insert {
            state.fail_next_insert = false;
            return Err(StoreError::Db(sqlx::Error::PoolTimedOut));
        }
        if state
            .books
            .iter()
            .any(|b| collides(b, book.isbn.as_ref(), book.olid.as_ref()))
        {
            return Err(StoreError::Conflict(String::from("Books_isbn_key")));
        }
        let mut record = book_record(&book.name, book.isbn.as_deref(), book.olid.as_deref());
        record.description = Some(book.description.clone());
        record.subjects = Some(book.subjects.clone());
        record.source = Some(book.source.as_str().to_owned());
        record.priority = book.priority;
        record.author_id = book.author_id;
        state.books.push(record.clone());
        state.book_inserts += 1;
        Ok(record)
    }

    async fn update_book(&self, id: Uuid, update: &BookUpdate) -> Result<BookRecord, StoreError> {
        let mut state = self.state.lock().await;
        let taken = state.books.iter().any(|b| {
            b.id != id
                && ((update.isbn.is_some() && b.isbn == update.isbn)
                    || (update.olid.is_some() && b.olid == update.olid))
        });
        let row = state
            .books
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(StoreError::MissingRow(id))?;
        let fills_isbn = row.isbn.is_none() && update.isbn.is_some();
        let fills_olid = row.olid.is_none() && update.olid.is_some();
        if taken && (fills_isbn || fills_olid) {
            return Err(StoreError::Conflict(String::from("Books_olid_key")));
        }
        row.name.clone_from(&update.name);
        if fills_isbn {
            row.isbn.clone_from(&update.isbn);
        }
        if fills_olid {
            row.olid.clone_from(&update.olid);
        }
        row.description = Some(update.description.clone());
        row.subjects = Some(update.subjects.clone());
        if update.author_id.is_some() {
            row.author_id = update.author_id;
        }
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn redirect_book(&self, old: Uuid, surviving: Uuid) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let holders: Vec<Uuid> = state
            .shelves
            .iter()
            .filter(|&&(_, book)| book == surviving)
            .map(|&(user, _)| user)
            .collect();
        let mut moved = 0;
        for shelf in &mut state.shelves {
            if shelf.1 == old && !holders.contains(&shelf.0) {
                shelf.1 = surviving;
                moved += 1;
            }
        }
        state.shelves.retain(|&(_, book)| book != old);
        state.books.retain(|b| b.id != old);
        Ok(moved)
    }

    async fn mark_cover_quality(
        &self,
        id: Uuid,
        good_cover: bool,
        cover_key: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let row = state
            .books
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(StoreError::MissingRow(id))?;
        row.good_cover = good_cover;
        if let Some(key) = cover_key {
            row.cover = Some(key.to_owned());
        }
        state.cover_updates += 1;
        Ok(())
    }

    async fn books_with_bad_covers(&self) -> Result<Vec<BookRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .books
            .iter()
            .filter(|b| !b.good_cover && b.isbn.as_deref().is_some_and(|i| !i.is_empty()))
            .cloned()
            .collect())
    }

    async fn find_author_by_olid(&self, olid: &str) -> Result<Option<AuthorRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .authors
            .iter()
            .find(|a| a.olid.as_deref() == Some(olid))
            .cloned())
    }

    async fn insert_author(&self, author: &NewAuthor) -> Result<AuthorRecord, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(racing) = state.racing_author.take() {
            state.authors.push(racing);
        }
        if state
            .authors
            .iter()
            .any(|a| a.olid.as_deref() == Some(author.olid.as_str()))
        {
            return Err(StoreError::Conflict(String::from("Authors_olid_key")));
        }
        let now = Utc::now();
        let record = AuthorRecord {
            id: Uuid::new_v4(),
            olid: Some(author.olid.clone()),
            name: author.name.clone(),
            bio: author.bio.clone(),
            subjects: Some(author.subjects.clone()),
            source: Some(author.source.as_str().to_owned()),
            created_at: now,
            updated_at: now,
        };
        state.authors.push(record.clone());
        Ok(record)
    }

    async fn update_author_subjects(&self, id: Uuid, subjects: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let row = state
            .authors
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::MissingRow(id))?;
        row.subjects = Some(subjects.to_owned());
        Ok(())
    }

    async fn shared_books(&self, first: Uuid, second: Uuid) -> Result<Vec<SeedBook>, StoreError> {
        let state = self.state.lock().await;
        let on_shelf =
            |user: Uuid, book: Uuid| state.shelves.iter().any(|&(u, b)| u == user && b == book);
        let mut seeds: Vec<SeedBook> = state
            .books
            .iter()
            .filter(|b| on_shelf(first, b.id) && on_shelf(second, b.id))
            .filter_map(|b| {
                let author = state.authors.iter().find(|a| Some(a.id) == b.author_id)?;
                Some(SeedBook {
                    id: b.id,
                    name: b.name.clone(),
                    author_name: author.name.clone(),
                })
            })
            .collect();
        seeds.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(seeds)
    }
}
