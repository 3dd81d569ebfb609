//! Provenance tags derived from source file names
//!
//! Fetched files are named after the person id they were downloaded for,
//! with `/` replaced by `_`, optionally followed by a single-digit
//! disambiguator (`_1`) or a trailing name token (`_alok`). The tag is
//! recovered from the name alone.

use std::path::Path;

/// Derive the provenance tag of a `.bib` file name.
///
/// ```
/// use pubtrack_ingestion::source_tag::derive_source_tag;
/// assert_eq!(derive_source_tag("94_4013.bib"), "94/4013");
/// assert_eq!(derive_source_tag("01_1744-1_alok.bib"), "01/1744-1");
/// assert_eq!(derive_source_tag("94_4013_1.bib"), "94/4013");
/// ```
pub fn derive_source_tag(file_name: &str) -> String {
    let stem = file_name.strip_suffix(".bib").unwrap_or(file_name);
    let mut parts: Vec<&str> = stem.split('_').collect();

    if parts.len() >= 3 && is_name_token(parts[parts.len() - 1]) {
        parts.pop();
    }
    if parts.len() >= 2 && is_disambiguator(parts[parts.len() - 1]) {
        parts.pop();
    }

    parts.join("_").replacen('_', "/", 1)
}

/// Tag for a path, using only its final component
pub fn source_tag_for_path(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    derive_source_tag(&name)
}

fn is_name_token(token: &str) -> bool {
    let letters: Vec<char> = token.chars().filter(|c| *c != '-').collect();
    !letters.is_empty() && letters.iter().all(|c| c.is_alphabetic())
}

fn is_disambiguator(token: &str) -> bool {
    token.len() == 1 && token.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_pid() {
        assert_eq!(derive_source_tag("94_4013.bib"), "94/4013");
        assert_eq!(derive_source_tag("s_JohnDoe"), "s/JohnDoe");
    }

    #[test]
    fn test_name_suffix_and_disambiguator() {
        assert_eq!(derive_source_tag("01_1744-1_alok.bib"), "01/1744-1");
        assert_eq!(derive_source_tag("01_1744-1_van-der-berg.bib"), "01/1744-1");
        assert_eq!(derive_source_tag("94_4013_1.bib"), "94/4013");
        assert_eq!(derive_source_tag("94_4013_1_alok.bib"), "94/4013");
    }

    #[test]
    fn test_two_part_names_keep_alphabetic_tail() {
        // Only three or more parts can carry a name token
        assert_eq!(derive_source_tag("s_smith.bib"), "s/smith");
        // A multi-digit tail is part of the pid
        assert_eq!(derive_source_tag("12_34.bib"), "12/34");
    }

    #[test]
    fn test_no_separator() {
        assert_eq!(derive_source_tag("homepage.bib"), "homepage");
        assert_eq!(derive_source_tag("7"), "7");
    }

    #[test]
    fn test_path_uses_file_name_only() {
        assert_eq!(
            source_tag_for_path(Path::new("/data/dblp_dump/94_4013.bib")),
            "94/4013"
        );
    }
}
