use crate::database::Store;
use crate::database::types::{
    AuthorRecord, BookRecord, BookUpdate, NewAuthor, NewBook, SeedBook, StoreError,
};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

const BOOK_COLUMNS: &str = r#"id, name, isbn, olid, description, subjects, cover, "goodCover",
    source, priority, "authorId", "createdAt", "updatedAt""#;

const AUTHOR_COLUMNS: &str = r#"id, olid, name, bio, subjects, source, "createdAt", "updatedAt""#;

pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connects and brings the schema up to date.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub async fn init(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at end of program"
    )]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for Db {
    #[allow(clippy::missing_inline_in_public_items, reason = "Async trait method")]
    async fn find_book_by_id(&self, id: Uuid) -> Result<Option<BookRecord>, StoreError> {
        let book = sqlx::query_as(&format!(r#"SELECT {BOOK_COLUMNS} FROM "Books" WHERE id = $1"#))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(book)
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Async trait method")]
    async fn find_book_by_olid_or_isbn(
        &self,
        olid: Option<&str>,
        isbn: Option<&str>,
        exclude: Option<Uuid>,
    ) -> Result<Option<BookRecord>, StoreError> {
        if olid.is_none() && isbn.is_none() {
            return Ok(None);
        }
        let book = sqlx::query_as(&format!(
            r#"
            SELECT {BOOK_COLUMNS} FROM "Books"
            WHERE (olid = $1 OR isbn = $2)
                AND ($3::uuid IS NULL OR id <> $3)
            ORDER BY CASE WHEN olid = $1 THEN 0 ELSE 1 END, "createdAt" ASC
            LIMIT 1
            "#
        ))
        .bind(olid)
        .bind(isbn)
        .bind(exclude)
        .fetch_optional(&self.pool)
        .await?;
        Ok(book)
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Async trait method")]
    async fn insert_book(&self, book: &NewBook) -> Result<BookRecord, StoreError> {
        let record = sqlx::query_as(&format!(
            r#"
            INSERT INTO "Books" (
                id, name, isbn, olid, description, subjects, "goodCover", source, priority, "authorId"
            )
            VALUES ($1, $2, $3, $4, $5, $6, false, $7, $8, $9)
            RETURNING {BOOK_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&book.name)
        .bind(&book.isbn)
        .bind(&book.olid)
        .bind(&book.description)
        .bind(&book.subjects)
        .bind(book.source.as_str())
        .bind(book.priority)
        .bind(book.author_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Async trait method")]
    async fn update_book(&self, id: Uuid, update: &BookUpdate) -> Result<BookRecord, StoreError> {
        let record = sqlx::query_as(&format!(
            r#"
            UPDATE "Books" SET
                name = $2,
                isbn = COALESCE(isbn, $3),
                olid = COALESCE(olid, $4),
                description = $5,
                subjects = $6,
                "authorId" = COALESCE($7, "authorId"),
                "updatedAt" = now()
            WHERE id = $1
            RETURNING {BOOK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.name)
        .bind(&update.isbn)
        .bind(&update.olid)
        .bind(&update.description)
        .bind(&update.subjects)
        .bind(update.author_id)
        .fetch_optional(&self.pool)
        .await?;
        record.ok_or(StoreError::MissingRow(id))
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Async trait method")]
    async fn redirect_book(&self, old: Uuid, surviving: Uuid) -> Result<u64, StoreError> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        // Users already holding the surviving book keep their existing entry
        let moved = sqlx::query(
            r#"
            UPDATE "UserBooks" SET "bookId" = $2
            WHERE "bookId" = $1
                AND NOT EXISTS (
                    SELECT 1 FROM "UserBooks" other
                    WHERE other."userId" = "UserBooks"."userId" AND other."bookId" = $2
                )
            "#,
        )
        .bind(old)
        .bind(surviving)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(r#"DELETE FROM "UserBooks" WHERE "bookId" = $1"#)
            .bind(old)
            .execute(&mut *tx)
            .await?;

        sqlx::query(r#"DELETE FROM "Books" WHERE id = $1"#)
            .bind(old)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(moved)
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Async trait method")]
    async fn mark_cover_quality(
        &self,
        id: Uuid,
        good_cover: bool,
        cover_key: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE "Books" SET
                "goodCover" = $2,
                cover = COALESCE($3, cover),
                "updatedAt" = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(good_cover)
        .bind(cover_key)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRow(id));
        }
        Ok(())
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Async trait method")]
    async fn books_with_bad_covers(&self) -> Result<Vec<BookRecord>, StoreError> {
        let books = sqlx::query_as(&format!(
            r#"
            SELECT {BOOK_COLUMNS} FROM "Books"
            WHERE "goodCover" = false AND isbn IS NOT NULL AND isbn <> ''
            ORDER BY priority DESC, "createdAt" ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(books)
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Async trait method")]
    async fn find_author_by_olid(&self, olid: &str) -> Result<Option<AuthorRecord>, StoreError> {
        let author =
            sqlx::query_as(&format!(r#"SELECT {AUTHOR_COLUMNS} FROM "Authors" WHERE olid = $1"#))
                .bind(olid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(author)
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Async trait method")]
    async fn insert_author(&self, author: &NewAuthor) -> Result<AuthorRecord, StoreError> {
        let record = sqlx::query_as(&format!(
            r#"
            INSERT INTO "Authors" (id, olid, name, bio, subjects, source)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {AUTHOR_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&author.olid)
        .bind(&author.name)
        .bind(&author.bio)
        .bind(&author.subjects)
        .bind(author.source.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Async trait method")]
    async fn update_author_subjects(&self, id: Uuid, subjects: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE "Authors" SET subjects = $2, "updatedAt" = now() WHERE id = $1"#,
        )
        .bind(id)
        .bind(subjects)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRow(id));
        }
        Ok(())
    }

    #[allow(clippy::missing_inline_in_public_items, reason = "Async trait method")]
    async fn shared_books(&self, first: Uuid, second: Uuid) -> Result<Vec<SeedBook>, StoreError> {
        let books = sqlx::query_as(
            r#"
            SELECT b.id, b.name, a.name AS author_name
            FROM "Books" b
                JOIN "Authors" a ON a.id = b."authorId"
            WHERE b.id IN (
                SELECT "bookId" FROM "UserBooks" WHERE "userId" = $1
                INTERSECT
                SELECT "bookId" FROM "UserBooks" WHERE "userId" = $2
            )
            ORDER BY b.name
            "#,
        )
        .bind(first)
        .bind(second)
        .fetch_all(&self.pool)
        .await?;
        Ok(books)
    }
}
