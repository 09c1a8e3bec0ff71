//! Subject classifier
//!
//! Providers report categories as free-text paths (`"Fiction / Fantasy / Epic"` for Google Books
//! and OpenLibrary, `"Fiction -> Fantasy -> Epic"` for ISBNdb). The classifier maps every path
//! onto the fixed internal taxonomy described by a [`SubjectTable`].
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Taxonomy compiled into the binary, used unless a table is given explicitly
const BUILTIN_TABLE: &str = include_str!("default_subjects.json");

/// Separator between the segments of a provider category path
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delimiter {
    /// `" / "`, used by Google Books and OpenLibrary
    Slash,
    /// `" -> "`, used by ISBNdb
    Arrow,
}

impl Delimiter {
    #[must_use]
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Slash => " / ",
            Self::Arrow => " -> ",
        }
    }
}

/// A category string exactly as a provider returned it, together with the delimiter of that
/// provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSubject {
    pub path: String,
    pub delimiter: Delimiter,
}

impl RawSubject {
    #[must_use]
    #[inline]
    pub fn new(path: impl Into<String>, delimiter: Delimiter) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SubjectTableError {
    #[error("failed to read subject table: {0}")]
    Io(#[from] std::io::Error),

    #[error("subject table is not a JSON object of keyword lists: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("subject table does not define any tag")]
    Empty,

    #[error("keyword {keyword:?} of tag {tag:?} contains a category delimiter")]
    KeywordWithDelimiter { tag: String, keyword: String },
}

/// Immutable tag → keyword table. Loaded once at start-up and handed to whoever classifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectTable {
    /// Keywords are stored lowercased, matching is case-insensitive
    tags: BTreeMap<String, Vec<String>>,
}

impl SubjectTable {
    /// Table shipped with the crate.
    /// # Errors
    /// Only fails if the bundled JSON is broken.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub fn builtin() -> Result<Self, SubjectTableError> {
        Self::from_json(BUILTIN_TABLE)
    }

    /// Reads a table from a JSON file of the form `{ "tag": ["keyword", ...] }`.
    /// # Errors
    /// Fails if the file cannot be read or does not hold a valid table.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub fn load(path: &Path) -> Result<Self, SubjectTableError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// # Errors
    /// Fails on invalid JSON, an empty table, or a keyword that contains a path delimiter and
    /// could therefore never match a single segment.
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once at start of program"
    )]
    pub fn from_json(json: &str) -> Result<Self, SubjectTableError> {
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(json)?;
        if raw.is_empty() {
            return Err(SubjectTableError::Empty);
        }

        let mut tags = BTreeMap::new();
        for (tag, keywords) in raw {
            let mut normalized = Vec::with_capacity(keywords.len());
            for keyword in keywords {
                let keyword = keyword.trim().to_lowercase();
                if keyword.is_empty() {
                    continue;
                }
                if keyword.contains('/') || keyword.contains("->") {
                    return Err(SubjectTableError::KeywordWithDelimiter { tag, keyword });
                }
                normalized.push(keyword);
            }
            tags.insert(tag, normalized);
        }

        Ok(Self { tags })
    }

    /// All tags the table can emit
    #[inline]
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    /// Classifies a single category path. A tag is emitted when one of its keywords equals or is
    /// contained in any segment of the path. Never fails; unmatched paths yield an empty set.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items, reason = "Hot loop body, kept out of line")]
    pub fn classify(&self, category: &str, delimiter: Delimiter) -> BTreeSet<String> {
        let segments: Vec<String> = category
            .split(delimiter.as_str())
            .map(|segment| segment.trim().to_lowercase())
            .filter(|segment| !segment.is_empty())
            .collect();

        self.tags
            .iter()
            .filter(|(_, keywords)| {
                keywords.iter().any(|keyword| {
                    segments
                        .iter()
                        .any(|segment| segment.contains(keyword.as_str()))
                })
            })
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    /// Union of the tags of every raw subject
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items, reason = "Called once per item")]
    pub fn classify_all<'subject, I>(&self, subjects: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'subject RawSubject>,
    {
        subjects
            .into_iter()
            .flat_map(|subject| self.classify(&subject.path, subject.delimiter))
            .collect()
    }
}

/// Serializes a tag set the way it is persisted: comma-joined, no spaces
#[must_use]
#[inline]
pub fn join_subjects(tags: &BTreeSet<String>) -> String {
    tags.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Inverse of [`join_subjects`], tolerant of stray whitespace and empty entries
#[must_use]
#[inline]
pub fn split_subjects(stored: &str) -> BTreeSet<String> {
    stored
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> SubjectTable {
        SubjectTable::from_json(
            r#"{
                "fantasy": ["Fantasy", "Dragons"],
                "science-fiction": ["Science Fiction", "Space Opera"],
                "romance": ["Romance"]
            }"#,
        )
        .unwrap()
    }

    fn set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|tag| (*tag).to_owned()).collect()
    }

    #[test]
    fn classifies_google_path() {
        let tags = table().classify("Fiction / Fantasy / Epic", Delimiter::Slash);
        assert_eq!(tags, set(&["fantasy"]));
    }

    #[test]
    fn classifies_isbndb_path() {
        let tags = table().classify(
            "Subjects -> Fiction -> Science Fiction -> Space Opera",
            Delimiter::Arrow,
        );
        assert_eq!(tags, set(&["science-fiction"]));
    }

    #[test]
    fn keyword_contained_in_segment_matches() {
        let tags = table().classify("Fiction / Romance / Paranormal Romance", Delimiter::Slash);
        assert_eq!(tags, set(&["romance"]));
        let tags = table().classify("Fiction / Contemporary Fantasy", Delimiter::Slash);
        assert_eq!(tags, set(&["fantasy"]));
    }

    #[test]
    fn matching_ignores_case() {
        let tags = table().classify("fiction / science fiction / general", Delimiter::Slash);
        assert_eq!(tags, set(&["science-fiction"]));
    }

    #[test]
    fn one_path_can_emit_several_tags() {
        let tags = table().classify("Fiction / Fantasy / Romance", Delimiter::Slash);
        assert_eq!(tags, set(&["fantasy", "romance"]));
    }

    #[test]
    fn unmatched_and_empty_paths_yield_nothing() {
        assert!(table().classify("Cooking / Regional", Delimiter::Slash).is_empty());
        assert!(table().classify("", Delimiter::Slash).is_empty());
        assert!(table().classify(" / ", Delimiter::Arrow).is_empty());
    }

    #[test]
    fn wrong_delimiter_still_never_panics() {
        let tags = table().classify("Fiction -> Fantasy", Delimiter::Slash);
        assert_eq!(tags, set(&["fantasy"]));
    }

    #[test]
    fn output_is_always_subset_of_table() {
        let table = table();
        let known: BTreeSet<String> = table.tags().map(ToOwned::to_owned).collect();
        for category in [
            "Fiction / Fantasy / Dragons",
            "Juvenile Fiction -> Space Opera",
            "????",
            "Romance / Science Fiction / Fantasy",
        ] {
            for delimiter in [Delimiter::Slash, Delimiter::Arrow] {
                assert!(table.classify(category, delimiter).is_subset(&known));
            }
        }
    }

    #[test]
    fn classify_all_takes_the_union() {
        let subjects = vec![
            RawSubject::new("Fiction / Fantasy", Delimiter::Slash),
            RawSubject::new("Fiction -> Space Opera", Delimiter::Arrow),
            RawSubject::new("Fiction / Fantasy / Dragons", Delimiter::Slash),
        ];
        let tags = table().classify_all(&subjects);
        assert_eq!(tags, set(&["fantasy", "science-fiction"]));
        assert_eq!(join_subjects(&tags), "fantasy,science-fiction");
    }

    #[test]
    fn split_subjects_is_lenient() {
        assert_eq!(split_subjects("fantasy, romance,,"), set(&["fantasy", "romance"]));
        assert!(split_subjects("").is_empty());
    }

    #[test]
    fn rejects_keywords_with_delimiters() {
        let error = SubjectTable::from_json(r#"{"fantasy": ["Fiction / Fantasy"]}"#).unwrap_err();
        assert!(matches!(
            error,
            SubjectTableError::KeywordWithDelimiter { .. }
        ));
        assert!(matches!(
            SubjectTable::from_json("{}").unwrap_err(),
            SubjectTableError::Empty
        ));
    }

    #[test]
    fn builtin_table_loads() {
        let table = SubjectTable::builtin().unwrap();
        assert!(table.tags().any(|tag| tag == "fantasy"));
        assert_eq!(
            table.classify("Fiction / Science Fiction / Space Opera", Delimiter::Slash),
            set(&["science-fiction"])
        );
    }

    #[test]
    fn builtin_keywords_do_not_fire_inside_unrelated_words() {
        let table = SubjectTable::builtin().unwrap();
        assert_eq!(
            table.classify("History / Europe / Eighteenth century", Delimiter::Slash),
            set(&["history"])
        );
        assert!(
            table
                .classify("Fiction / Nineteenth century", Delimiter::Slash)
                .is_empty()
        );
        assert_eq!(
            table.classify("Philosophy / Metaphysics", Delimiter::Slash),
            set(&["philosophy"])
        );
        assert!(
            !table
                .classify("Home economics", Delimiter::Slash)
                .contains("business")
        );
        assert_eq!(
            table.classify("Teen & Young Adult -> Science Fiction", Delimiter::Arrow),
            set(&["science-fiction", "young-adult"])
        );
    }
}
