//! Tolerant BibTeX reader
//!
//! Turns the text of one bibliography file into normalized
//! [`ParsedEntry`] records. A light scanner splits the file into `@`
//! blocks and each entry block is handed to [`biblatex`] on its own, so a
//! malformed entry only costs itself: it is recorded as a
//! [`ParseDiagnostic`] and reading resumes at the next `@` that opens a
//! line.
//!
//! `@string` definitions are carried forward into every later entry, and
//! `@comment` and `@preamble` blocks are skipped.

use crate::text::{collapse_whitespace, normalize_title, split_names};
use biblatex::{Bibliography, Chunk, Entry, Spanned};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Fixed publication type vocabulary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationType {
    Article,
    Conference,
    Proceedings,
    Book,
    BookChapter,
    Thesis,
    TechnicalReport,
    Misc,
    Unknown,
}

impl PublicationType {
    /// Map a BibTeX entry type (case-insensitive)
    pub fn from_entry_type(entry_type: &str) -> Self {
        match entry_type.to_ascii_lowercase().as_str() {
            "article" => PublicationType::Article,
            "inproceedings" => PublicationType::Conference,
            "proceedings" => PublicationType::Proceedings,
            "book" => PublicationType::Book,
            "incollection" => PublicationType::BookChapter,
            "phdthesis" | "mastersthesis" => PublicationType::Thesis,
            "techreport" => PublicationType::TechnicalReport,
            "misc" => PublicationType::Misc,
            _ => PublicationType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationType::Article => "article",
            PublicationType::Conference => "conference",
            PublicationType::Proceedings => "proceedings",
            PublicationType::Book => "book",
            PublicationType::BookChapter => "book_chapter",
            PublicationType::Thesis => "thesis",
            PublicationType::TechnicalReport => "technical_report",
            PublicationType::Misc => "misc",
            PublicationType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PublicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized bibliography entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEntry {
    pub entry_key: String,
    /// Lowercased BibTeX entry type as written
    pub entry_type: String,
    pub publication_type: PublicationType,
    pub title: String,
    pub normalized_title: String,
    pub authors: Vec<String>,
    pub editors: Vec<String>,
    pub year: Option<i32>,
    /// Upper-cased
    pub doi: Option<String>,
    pub journal: Option<String>,
    pub booktitle: Option<String>,
    pub volume: Option<String>,
    pub number: Option<String>,
    pub pages: Option<String>,
    pub publisher: Option<String>,
    pub series: Option<String>,
    pub url: Option<String>,
    pub ee: Option<String>,
    /// 1-based line of the opening `@`
    pub line: usize,
}

/// A malformed entry that was skipped
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Result of parsing one file
#[derive(Clone, Debug, Default)]
pub struct ParsedFile {
    /// Entries in file order, unique by key and DOI within the file
    pub entries: Vec<ParsedEntry>,
    /// Every entry block seen, including malformed ones
    pub total_entries: usize,
    /// Entries dropped because an earlier entry in the file had the same key or DOI
    pub duplicates: usize,
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl ParsedFile {
    /// Entries seen but not returned
    pub fn suppressed(&self) -> usize {
        self.duplicates + self.diagnostics.len()
    }
}

/// Read and parse a file. Invalid UTF-8 is replaced rather than rejected.
pub fn parse_file(path: &Path) -> std::io::Result<ParsedFile> {
    let bytes = std::fs::read(path)?;
    Ok(parse_bibtex(&String::from_utf8_lossy(&bytes)))
}

/// Parse the text of one bibliography file
pub fn parse_bibtex(input: &str) -> ParsedFile {
    let chars: Vec<char> = input.chars().collect();
    let mut cur = Cursor::new(&chars);
    let mut strings = month_strings();
    let mut parsed = ParsedFile::default();
    let mut seen_keys: HashSet<String> = HashSet::new();
    let mut seen_dois: HashSet<String> = HashSet::new();

    while cur.next_at() {
        let start = cur.mark();

        let block = match scan_block(&mut cur, start) {
            Ok(block) => block,
            Err(message) => {
                parsed.total_entries += 1;
                parsed.diagnostics.push(ParseDiagnostic {
                    line: start.line,
                    message,
                });
                cur.reset(start);
                cur.recover();
                continue;
            }
        };

        match block {
            Block::Skipped => {}
            Block::Strings(text) => match Bibliography::parse(&format!("{}\n{}", strings, text)) {
                Ok(_) => {
                    strings.push('\n');
                    strings.push_str(&text);
                }
                Err(e) => parsed.diagnostics.push(ParseDiagnostic {
                    line: start.line,
                    message: format!("@string definition rejected: {}", e),
                }),
            },
            Block::Entry(raw) => {
                parsed.total_entries += 1;

                if raw.key.is_empty() {
                    parsed.diagnostics.push(ParseDiagnostic {
                        line: raw.line,
                        message: format!("@{} entry without a key", raw.entry_type),
                    });
                    continue;
                }
                if seen_keys.contains(&raw.key) {
                    parsed.duplicates += 1;
                    continue;
                }

                let entry = match raw.read(&strings) {
                    Ok(entry) => entry,
                    Err(message) => {
                        parsed.diagnostics.push(ParseDiagnostic {
                            line: raw.line,
                            message,
                        });
                        continue;
                    }
                };
                if let Some(doi) = &entry.doi {
                    if seen_dois.contains(doi) {
                        parsed.duplicates += 1;
                        continue;
                    }
                    seen_dois.insert(doi.clone());
                }
                seen_keys.insert(entry.entry_key.clone());
                parsed.entries.push(entry);
            }
        }
    }

    parsed
}

// ============================================================================
// Block scanning
// ============================================================================

/// One entry block as written, `@` included
struct RawEntry {
    entry_type: String,
    key: String,
    text: String,
    line: usize,
}

enum Block {
    Entry(RawEntry),
    /// Raw `@string` block
    Strings(String),
    Skipped,
}

/// Find the extent of the block whose `@` was just consumed
fn scan_block(cur: &mut Cursor<'_>, at: Mark) -> Result<Block, String> {
    let entry_type = cur.take_while(|c| c.is_ascii_alphabetic()).to_ascii_lowercase();
    cur.skip_whitespace();

    let close = match cur.peek() {
        Some('{') => '}',
        Some('(') => ')',
        _ if is_known_type(&entry_type) => {
            return Err(format!("expected '{{' after @{}", entry_type));
        }
        // Stray '@' in free text
        _ => return Ok(Block::Skipped),
    };
    cur.bump();
    let body = cur.mark();

    match entry_type.as_str() {
        "comment" | "preamble" => {
            cur.skip_balanced(close)?;
            Ok(Block::Skipped)
        }
        "string" => {
            cur.skip_balanced(close)?;
            Ok(Block::Strings(cur.text_since(at)))
        }
        _ => {
            cur.skip_whitespace();
            let key = cur.take_while(|c| c != ',' && c != close);
            let key = if key.contains(['=', '{', '"']) {
                String::new()
            } else {
                key.trim().to_string()
            };

            cur.reset(body);
            cur.skip_balanced(close).map_err(|e| {
                if key.is_empty() {
                    e
                } else {
                    format!("{} in entry '{}'", e, key)
                }
            })?;

            Ok(Block::Entry(RawEntry {
                entry_type,
                key,
                text: cur.text_since(at),
                line: at.line,
            }))
        }
    }
}

fn is_known_type(entry_type: &str) -> bool {
    matches!(entry_type, "comment" | "preamble" | "string")
        || PublicationType::from_entry_type(entry_type) != PublicationType::Unknown
}

/// `@string` definitions for the standard month abbreviations
fn month_strings() -> String {
    [
        ("jan", "January"),
        ("feb", "February"),
        ("mar", "March"),
        ("apr", "April"),
        ("may", "May"),
        ("jun", "June"),
        ("jul", "July"),
        ("aug", "August"),
        ("sep", "September"),
        ("oct", "October"),
        ("nov", "November"),
        ("dec", "December"),
    ]
    .into_iter()
    .map(|(name, month)| format!("@string{{{} = {{{}}}}}\n", name, month))
    .collect()
}

impl RawEntry {
    /// Parse the block with the `@string` definitions seen so far
    fn read(&self, strings: &str) -> Result<ParsedEntry, String> {
        let bibliography = Bibliography::parse(&format!("{}\n{}", strings, self.text))
            .map_err(|e| format!("entry '{}' rejected: {}", self.key, e))?;
        let entry = bibliography
            .into_iter()
            .next()
            .ok_or_else(|| format!("entry '{}' produced no record", self.key))?;
        Ok(self.normalize(&entry))
    }

    fn normalize(&self, entry: &Entry) -> ParsedEntry {
        let field = |names: &[&str]| names.iter().find_map(|name| field_text(entry, name));
        let names = |name: &str| field(&[name]).map(|list| split_names(&list)).unwrap_or_default();

        let title = field(&["title"]).unwrap_or_default();
        let year = field(&["year"])
            .or_else(|| field(&["date"]).map(|date| date.chars().take(4).collect()))
            .and_then(|y| y.parse().ok());

        ParsedEntry {
            entry_key: self.key.clone(),
            entry_type: self.entry_type.clone(),
            publication_type: PublicationType::from_entry_type(&self.entry_type),
            normalized_title: normalize_title(&title),
            title,
            authors: names("author"),
            editors: names("editor"),
            year,
            doi: field(&["doi"]).map(|d| d.to_uppercase()),
            journal: field(&["journal", "journaltitle"]),
            booktitle: field(&["booktitle"]),
            volume: field(&["volume"]),
            number: field(&["number"]),
            pages: field(&["pages"]),
            publisher: field(&["publisher"]),
            series: field(&["series"]),
            url: field(&["url"]),
            ee: field(&["ee"]),
            line: self.line,
        }
    }
}

/// Plain text of a field, whitespace collapsed; `None` when missing or blank
fn field_text(entry: &Entry, name: &str) -> Option<String> {
    let chunks = entry
        .fields
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, chunks)| chunks)?;
    let text = collapse_whitespace(&chunk_text(chunks));
    (!text.is_empty()).then_some(text)
}

fn chunk_text(chunks: &[Spanned<Chunk>]) -> String {
    chunks
        .iter()
        .map(|chunk| match &chunk.v {
            Chunk::Normal(s) | Chunk::Verbatim(s) | Chunk::Math(s) => s.as_str(),
        })
        .collect()
}

// ============================================================================
// Cursor
// ============================================================================

#[derive(Clone, Copy)]
struct Mark {
    pos: usize,
    line: usize,
}

struct Cursor<'a> {
    chars: &'a [char],
    pos: usize,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn new(chars: &'a [char]) -> Self {
        Self { chars, pos: 0, line: 1 }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn mark(&self) -> Mark {
        Mark { pos: self.pos, line: self.line }
    }

    fn reset(&mut self, mark: Mark) {
        self.pos = mark.pos;
        self.line = mark.line;
    }

    /// Text from the `@` just before `at` up to the current position
    fn text_since(&self, at: Mark) -> String {
        self.chars[at.pos.saturating_sub(1)..self.pos].iter().collect()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    /// Consume through the next `@`; false at end of input
    fn next_at(&mut self) -> bool {
        while let Some(c) = self.bump() {
            if c == '@' {
                return true;
            }
        }
        false
    }

    /// Stop before the next `@` that is the first non-blank character of a line
    fn recover(&mut self) {
        let mut blank_line = false;
        while let Some(c) = self.peek() {
            if c == '@' && blank_line {
                return;
            }
            if c == '\n' {
                blank_line = true;
            } else if !c.is_whitespace() {
                blank_line = false;
            }
            self.bump();
        }
    }

    /// Skip a balanced `{...}` or `(...)` body whose opener is consumed.
    /// Escaped delimiters do not count.
    fn skip_balanced(&mut self, close: char) -> Result<(), String> {
        let open = if close == '}' { '{' } else { '(' };
        let mut depth = 1usize;
        while let Some(c) = self.bump() {
            if c == '\\' {
                self.bump();
            } else if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
        }
        Err("unterminated block".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DBLP_SAMPLE: &str = r#"
@article{DBLP:journals/tcs/DoeS23,
  author       = {Alice Faculty and
                  Bob CoAuthor},
  title        = {On the Hardness of
                  {GPU} Scheduling},
  journal      = {Theor. Comput. Sci.},
  volume       = {950},
  pages        = {113--127},
  year         = {2023},
  url          = {https://doi.org/10.1016/j.tcs.2023.01.001},
  doi          = {10.1016/j.tcs.2023.01.001},
  timestamp    = {Mon, 01 May 2023 01:00:00 +0200},
  biburl       = {https://dblp.org/rec/journals/tcs/DoeS23.bib}
}

@inproceedings{DBLP:conf/icdcs/FacultyC22,
  author       = {Alice Faculty and Carol Third},
  title        = {Edge Offloading},
  booktitle    = {{ICDCS}},
  publisher    = {{IEEE}},
  year         = {2022}
}
"#;

    #[test]
    fn test_parses_dblp_entries() {
        let parsed = parse_bibtex(DBLP_SAMPLE);
        assert_eq!(parsed.total_entries, 2);
        assert_eq!(parsed.suppressed(), 0);

        let article = &parsed.entries[0];
        assert_eq!(article.entry_key, "DBLP:journals/tcs/DoeS23");
        assert_eq!(article.publication_type, PublicationType::Article);
        assert_eq!(article.authors, vec!["Alice Faculty", "Bob CoAuthor"]);
        assert_eq!(article.title, "On the Hardness of GPU Scheduling");
        assert_eq!(article.normalized_title, "on the hardness of gpu scheduling");
        assert_eq!(article.doi.as_deref(), Some("10.1016/J.TCS.2023.01.001"));
        assert_eq!(article.year, Some(2023));
        let pages = article.pages.as_deref().unwrap_or_default();
        assert!(pages.starts_with("113") && pages.ends_with("127"), "{pages}");
        assert_eq!(article.line, 2);

        let paper = &parsed.entries[1];
        assert_eq!(paper.publication_type, PublicationType::Conference);
        assert_eq!(paper.booktitle.as_deref(), Some("ICDCS"));
        assert_eq!(paper.publisher.as_deref(), Some("IEEE"));
        assert!(paper.doi.is_none());
    }

    #[test]
    fn test_macros_quotes_and_concatenation() {
        let input = r#"
@string{tcs = "Theoretical Computer Science"}
@comment{ exported by hand }
@preamble{ "\newcommand{\noop}[1]{}" }
@article{k1,
  author = "Jane Roe",
  journal = tcs # { (Special Issue)},
  month = may,
  year = 2021,
  title = "A {"}quoted{"} title"
}
"#;
        let parsed = parse_bibtex(input);
        assert_eq!(parsed.total_entries, 1);
        let entry = &parsed.entries[0];
        assert_eq!(
            entry.journal.as_deref(),
            Some("Theoretical Computer Science (Special Issue)")
        );
        assert_eq!(entry.year, Some(2021));
        assert_eq!(entry.authors, vec!["Jane Roe"]);
    }

    #[test]
    fn test_within_file_duplicates() {
        let input = r#"
@article{a, title = {One}, doi = {10.1/x}}
@article{a, title = {One again}}
@article{b, title = {Same DOI}, doi = {10.1/X}}
@article{c, title = {Fresh}}
"#;
        let parsed = parse_bibtex(input);
        assert_eq!(parsed.total_entries, 4);
        assert_eq!(parsed.duplicates, 2);
        let keys: Vec<_> = parsed.entries.iter().map(|e| e.entry_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_keyless_entry_is_diagnosed() {
        let input = "@article{k1, title={A}}\n@article{, title={B}}\n@article{k3, title={C}}\n";
        let parsed = parse_bibtex(input);
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.total_entries, 3);
        assert_eq!(parsed.diagnostics.len(), 1);
        assert_eq!(parsed.diagnostics[0].line, 2);
        assert_eq!(parsed.suppressed(), 1);
    }

    #[test]
    fn test_recovers_after_unbalanced_entry() {
        let input = "@article{ok1, title={Fine}}\n\
                     @article{broken, title={Never closed}\n\
                     @article{ok2, title={Also fine}}\n";
        let parsed = parse_bibtex(input);
        let keys: Vec<_> = parsed.entries.iter().map(|e| e.entry_key.as_str()).collect();
        assert_eq!(keys, vec!["ok1", "ok2"]);
        assert_eq!(parsed.diagnostics.len(), 1);
        assert_eq!(parsed.diagnostics[0].line, 2);
    }

    #[test]
    fn test_latex_accents() {
        let input = r#"@misc{m1, author = {J\"urgen M\"uller and Fran\c{c}ois Li and Jos\'e Ruiz}}"#;
        let parsed = parse_bibtex(input);
        let authors = &parsed.entries[0].authors;
        assert_eq!(authors.len(), 3);
        assert_eq!(authors[0], "Jürgen Müller");
        for name in authors {
            assert!(!name.contains(['\\', '{', '}']), "{name}");
        }
    }

    #[test]
    fn test_rejected_entry_is_skipped() {
        let input = "@article{ok1, title={Fine}}\n\
                     @article{bad, title {No equals sign}}\n\
                     @article{ok2, title={Also fine}}\n";
        let parsed = parse_bibtex(input);
        let keys: Vec<_> = parsed.entries.iter().map(|e| e.entry_key.as_str()).collect();
        assert_eq!(keys, vec!["ok1", "ok2"]);
        assert_eq!(parsed.total_entries, 3);
        assert_eq!(parsed.diagnostics.len(), 1);
        assert_eq!(parsed.diagnostics[0].line, 2);
        assert!(parsed.diagnostics[0].message.contains("bad"));
    }

    #[test]
    fn test_biblatex_field_names() {
        let input = "@article{b1, journaltitle = {Data Eng. Bull.}, date = {2019-06}, title = {T}}";
        let entry = &parse_bibtex(input).entries[0];
        assert_eq!(entry.journal.as_deref(), Some("Data Eng. Bull."));
        assert_eq!(entry.year, Some(2019));
    }

    #[test]
    fn test_escaped_brace_does_not_end_block() {
        let input = "@misc{e1, title = {Sets \\{x\\} and more}}\n@misc{e2, title={Next}}\n";
        let parsed = parse_bibtex(input);
        assert_eq!(parsed.total_entries, 2);
        assert_eq!(parsed.entries.len() + parsed.diagnostics.len(), 2);
        assert!(parsed.entries.iter().any(|e| e.entry_key == "e2"));
    }

    #[test]
    fn test_lenient_year_and_types() {
        let parsed = parse_bibtex("@phdthesis{t1, year = {circa 1999}}\n@unpublished{u1, year={2001}}");
        assert_eq!(parsed.entries[0].year, None);
        assert_eq!(parsed.entries[0].publication_type, PublicationType::Thesis);
        assert_eq!(parsed.entries[1].publication_type, PublicationType::Unknown);
        assert_eq!(parsed.entries[1].year, Some(2001));
    }

    #[test]
    fn test_stray_at_sign_is_ignored() {
        let parsed = parse_bibtex("contact: someone@example.org\n@misc{x, title={T}}");
        assert_eq!(parsed.total_entries, 1);
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn test_publication_type_mapping() {
        assert_eq!(PublicationType::from_entry_type("InProceedings").as_str(), "conference");
        assert_eq!(PublicationType::from_entry_type("incollection").as_str(), "book_chapter");
        assert_eq!(PublicationType::from_entry_type("mastersthesis").as_str(), "thesis");
        assert_eq!(PublicationType::from_entry_type("techreport").as_str(), "technical_report");
    }
}
