use chrono::{DateTime, Utc};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ingestion ranking of NY Times bestsellers
pub const PRIORITY_NY_TIMES: i32 = 4;
/// Ingestion ranking of AI suggested books
pub const PRIORITY_RECOMMENDATION: i32 = 0;

/// Where a row originally came from
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    ChatGptRecommendation,
    NyTimes,
    OpenLibrary,
    Flock,
}

impl Source {
    #[must_use]
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChatGptRecommendation => "CHAT_GPT_RECOMMENDATION",
            Self::NyTimes => "NY_TIMES",
            Self::OpenLibrary => "OPEN_LIBRARY",
            Self::Flock => "FLOCK",
        }
    }
}

impl fmt::Display for Source {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    #[inline]
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CHAT_GPT_RECOMMENDATION" => Ok(Self::ChatGptRecommendation),
            "NY_TIMES" => Ok(Self::NyTimes),
            "OPEN_LIBRARY" => Ok(Self::OpenLibrary),
            "FLOCK" => Ok(Self::Flock),
            other => Err(format!("unknown source {other:?}")),
        }
    }
}

/// Shelf a user put a book on. Owned by the API, only read here.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserBookCategory {
    CurrentlyReading,
    WantToRead,
    Favorite,
}

/// A row of `"Books"`
#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BookRecord {
    pub id: Uuid,
    pub name: String,
    pub isbn: Option<String>,
    pub olid: Option<String>,
    pub description: Option<String>,
    /// Comma-joined subject tags
    pub subjects: Option<String>,
    /// Object key of the stored cover
    pub cover: Option<String>,
    #[sqlx(rename = "goodCover")]
    pub good_cover: bool,
    pub source: Option<String>,
    pub priority: i32,
    #[sqlx(rename = "authorId")]
    pub author_id: Option<Uuid>,
    #[sqlx(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// A row of `"Authors"`
#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AuthorRecord {
    pub id: Uuid,
    pub olid: Option<String>,
    pub name: String,
    pub bio: String,
    pub subjects: Option<String>,
    pub source: Option<String>,
    #[sqlx(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBook {
    pub name: String,
    pub isbn: Option<String>,
    pub olid: Option<String>,
    pub description: String,
    pub subjects: String,
    pub source: Source,
    pub priority: i32,
    pub author_id: Option<Uuid>,
}

/// Enrichment of an existing row. Identifiers only fill gaps, they never overwrite.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookUpdate {
    pub name: String,
    pub isbn: Option<String>,
    pub olid: Option<String>,
    pub description: String,
    pub subjects: String,
    pub author_id: Option<Uuid>,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuthor {
    pub olid: String,
    pub name: String,
    pub bio: String,
    pub subjects: String,
    pub source: Source,
}

/// A book two users share, with its author's display name, used to seed recommendations
#[non_exhaustive]
#[derive(Serialize, Debug, Deserialize, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SeedBook {
    pub id: Uuid,
    pub name: String,
    pub author_name: String,
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique key is already taken, most likely by a concurrent invocation
    #[error("unique constraint violated ({0})")]
    Conflict(String),

    #[error("row {0} does not exist")]
    MissingRow(Uuid),

    #[error("database error: {0}")]
    Db(sqlx::Error),
}

impl StoreError {
    #[must_use]
    #[inline]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<sqlx::Error> for StoreError {
    #[inline]
    fn from(error: sqlx::Error) -> Self {
        if is_unique_violation(&error) {
            let constraint = match &error {
                sqlx::Error::Database(db_err) => db_err.constraint().unwrap_or("unknown").to_owned(),
                _ => String::from("unknown"),
            };
            Self::Conflict(constraint)
        } else {
            Self::Db(error)
        }
    }
}

#[allow(
    clippy::pattern_type_mismatch,
    reason = "False positive, this is the idiomatic pattern"
)]
fn is_unique_violation(error: &sqlx::Error) -> bool {
    // Postgres reports unique violations with SQLSTATE 23505
    if let sqlx::Error::Database(db_err) = error {
        db_err.is_unique_violation() || db_err.code().as_deref() == Some("23505")
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn source_round_trips_through_its_column_value() {
        for source in [
            Source::ChatGptRecommendation,
            Source::NyTimes,
            Source::OpenLibrary,
            Source::Flock,
        ] {
            assert_eq!(source.as_str().parse::<Source>(), Ok(source));
        }
        assert!("AMAZON".parse::<Source>().is_err());
    }

    #[test]
    fn non_database_errors_are_not_conflicts() {
        let error = StoreError::from(sqlx::Error::RowNotFound);
        assert!(!error.is_conflict());
    }
}
