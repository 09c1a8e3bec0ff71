//! In-batch title deduplication
use std::collections::HashSet;

/// Titles already handled in the current batch, compared case-insensitively and ignoring
/// surrounding whitespace.
#[derive(Debug, Default, Clone)]
pub struct SeenTitles {
    titles: HashSet<String>,
}

impl SeenTitles {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the title and reports whether this is its first appearance
    #[inline]
    pub fn first_sighting(&mut self, title: &str) -> bool {
        self.titles.insert(title.trim().to_lowercase())
    }

    #[must_use]
    #[inline]
    pub fn contains(&self, title: &str) -> bool {
        self.titles.contains(&title.trim().to_lowercase())
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.titles.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_differing_in_case_and_padding_are_not_new() {
        let mut seen = SeenTitles::new();
        assert!(seen.first_sighting("Dune"));
        assert!(!seen.first_sighting("dune"));
        assert!(!seen.first_sighting("  DUNE "));
        assert!(seen.first_sighting("Dune Messiah"));
        assert!(seen.contains("dune messiah"));
        assert_eq!(seen.len(), 2);
    }
}
