//! Edition tie-break for OpenLibrary works
use crate::providers::openlibrary::OpenLibraryEdition;

const ENGLISH: &str = "eng";

/// An edition qualifies when it is English and carries a description, authors and subjects.
fn qualifies(edition: &OpenLibraryEdition) -> bool {
    !edition.description.trim().is_empty()
        && edition.languages.iter().any(|language| language == ENGLISH)
        && !edition.author_olids.is_empty()
        && !edition.subjects.is_empty()
}

/// Highest-revision qualifying edition. The first listed wins a revision tie. `None` means the
/// caller should stay with the work-level record.
#[must_use]
#[inline]
pub fn select_edition(editions: &[OpenLibraryEdition]) -> Option<&OpenLibraryEdition> {
    editions
        .iter()
        .filter(|edition| qualifies(edition))
        .reduce(|best, edition| {
            if edition.revision > best.revision {
                edition
            } else {
                best
            }
        })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "Tests are predefined and guaranteed to be Some/Ok"
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn edition(olid: &str, revision: i64) -> OpenLibraryEdition {
        OpenLibraryEdition {
            olid: olid.to_owned(),
            title: "Dune".to_owned(),
            description: "A desert planet.".to_owned(),
            languages: vec!["eng".to_owned()],
            author_olids: vec!["OL79034A".to_owned()],
            subjects: vec!["Science fiction".to_owned()],
            revision,
            isbn_13: None,
        }
    }

    #[test]
    fn highest_revision_among_qualifying() {
        let editions = vec![edition("OL1M", 3), edition("OL2M", 9), edition("OL3M", 5)];
        assert_eq!(select_edition(&editions).unwrap().olid, "OL2M");
    }

    #[test]
    fn non_qualifying_editions_are_ignored_even_with_higher_revision() {
        let mut french = edition("OL1M", 40);
        french.languages = vec!["fre".to_owned()];
        let mut bare = edition("OL2M", 30);
        bare.description = "  ".to_owned();
        let mut authorless = edition("OL3M", 20);
        authorless.author_olids.clear();
        let mut untagged = edition("OL4M", 10);
        untagged.subjects.clear();
        let editions = vec![french, bare, authorless, untagged, edition("OL5M", 1)];

        assert_eq!(select_edition(&editions).unwrap().olid, "OL5M");
    }

    #[test]
    fn revision_tie_keeps_first_listed() {
        let editions = vec![edition("OL1M", 7), edition("OL2M", 7)];
        assert_eq!(select_edition(&editions).unwrap().olid, "OL1M");
    }

    #[test]
    fn nothing_qualifies_falls_back() {
        let mut edition = edition("OL1M", 2);
        edition.languages.clear();
        assert_eq!(select_edition(&[edition]), None);
        assert_eq!(select_edition(&[]), None);
    }
}
