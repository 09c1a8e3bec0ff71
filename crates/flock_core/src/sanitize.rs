//! Text sanitizer
//!
//! Cleans provider descriptions before they are stored and builds the query fragments used in
//! provider search URLs.
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used, reason = "Pattern is a literal and known to compile")]
static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("Regex must be valid"));

/// Removes every `<...>` tag from a synopsis or description. Text between tags, including
/// whitespace, is kept as is. Missing input becomes an empty string.
#[must_use]
#[inline]
pub fn sanitize(text: Option<&str>) -> String {
    match text {
        None | Some("") => String::new(),
        Some(text) => MARKUP.replace_all(text, "").into_owned(),
    }
}

/// Query encoding expected by the provider search endpoints: lowercase, spaces become `+`, and
/// parentheses, `#`, hyphens and apostrophes are dropped. Nothing else is escaped.
#[must_use]
#[inline]
pub fn url_encode(text: &str) -> String {
    text.to_lowercase()
        .replace(' ', "+")
        .replace(['(', ')', '#', '-', '\''], "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_missing_or_empty() {
        assert_eq!(sanitize(None), "");
        assert_eq!(sanitize(Some("")), "");
    }

    #[test]
    fn sanitize_strips_tags() {
        assert_eq!(sanitize(Some("<b>Hi</b> there")), "Hi there");
        assert_eq!(
            sanitize(Some("<p>First line.<br /><br />Second  line.</p>")),
            "First line.Second  line."
        );
        assert_eq!(
            sanitize(Some("In the <i>New York Times</i> best-selling series")),
            "In the New York Times best-selling series"
        );
    }

    #[test]
    fn sanitize_leaves_unclosed_brackets() {
        assert_eq!(sanitize(Some("3 < 4 and done")), "3 < 4 and done");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for text in [
            "<b>Hi</b> there",
            "<<b>b>",
            "a < b > c < d",
            "plain text",
            "<div><p>nested</p></div> <",
        ] {
            let once = sanitize(Some(text));
            assert_eq!(sanitize(Some(&once)), once);
        }
    }

    #[test]
    fn url_encode_matches_provider_format() {
        assert_eq!(url_encode("The Hunger Games"), "the+hunger+games");
        assert_eq!(
            url_encode("Harry Potter (Book #1)"),
            "harry+potter+book+1"
        );
        assert_eq!(url_encode("Ender's Game"), "enders+game");
        assert_eq!(url_encode("Jean-Paul Sartre"), "jeanpaul+sartre");
        assert_eq!(url_encode("Dune: Messiah"), "dune:+messiah");
    }
}
