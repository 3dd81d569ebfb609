//! Text normalization shared by the parser, resolver and reconciliation

use regex_lite::Regex;
use std::sync::OnceLock;

fn name_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"(?i)\s+and\s+").expect("Invalid name separator pattern"))
}

/// Collapse every run of whitespace (including newlines) to one space
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Matching key for person names: lowercase, no periods or commas,
/// single-spaced.
///
/// ```
/// use pubtrack_ingestion::text::normalize_name;
/// assert_eq!(normalize_name("  Srirama,  S.N. "), "srirama sn");
/// ```
pub fn normalize_name(name: &str) -> String {
    let stripped: String = name
        .to_lowercase()
        .chars()
        .filter(|c| *c != '.' && *c != ',')
        .collect();
    collapse_whitespace(&stripped)
}

/// Comparison form of a title: lowercase ASCII letters, digits and spaces
pub fn normalize_title(title: &str) -> String {
    let kept: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();
    collapse_whitespace(&kept)
}

/// Split a BibTeX name list on `and` surrounded by whitespace
pub fn split_names(list: &str) -> Vec<String> {
    name_separator()
        .split(list)
        .map(collapse_whitespace)
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("S. Srirama"), "s srirama");
        assert_eq!(normalize_name("Doe, John"), "doe john");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            normalize_title("Deep   Learning: A {Survey}!"),
            "deep learning a survey"
        );
    }

    #[test]
    fn test_split_names() {
        assert_eq!(
            split_names("Alice Faculty and\n   Bob CoAuthor AND Carol  Third"),
            vec!["Alice Faculty", "Bob CoAuthor", "Carol Third"]
        );
        // "and" inside a name is not a separator
        assert_eq!(split_names("Alexander Sandberg"), vec!["Alexander Sandberg"]);
        assert_eq!(split_names(" and "), Vec::<String>::new());
        assert!(split_names("").is_empty());
    }
}
