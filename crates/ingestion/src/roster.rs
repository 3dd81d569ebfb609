//! Faculty roster
//!
//! JSON array of faculty records keyed by bibliography person id. The
//! roster answers two questions during ingestion: which record owns a
//! person id, and which record (if any) an author name on a given source
//! file denotes.

use crate::errors::IngestionError;
use crate::text::normalize_name;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacultyRecord {
    #[serde(alias = "name")]
    pub faculty_name: String,

    #[serde(default, alias = "external_id")]
    pub dblp_pid: Option<String>,

    /// Records explicitly marked unmatched are ignored
    #[serde(default)]
    pub dblp_matched: Option<bool>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub designation: Option<String>,

    #[serde(default)]
    pub department: Option<String>,

    /// Name as spelled by the bibliography service
    #[serde(default)]
    pub dblp_name: Option<String>,

    #[serde(default)]
    pub aliases: Vec<String>,

    /// Secondary person ids that belong to the same person
    #[serde(default)]
    pub other_pids: Vec<String>,
}

/// Profile fields copied onto a faculty author
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacultyProfile {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub designation: Option<String>,
    pub department: Option<String>,
}

impl FacultyRecord {
    pub fn profile(&self) -> FacultyProfile {
        FacultyProfile {
            email: self.email.clone(),
            phone: self.phone.clone(),
            designation: self.designation.clone(),
            department: self.department.clone(),
        }
    }

    /// Every spelling this person is known under
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.faculty_name.as_str())
            .chain(self.dblp_name.as_deref())
            .chain(self.aliases.iter().map(String::as_str))
    }

    /// Primary and secondary person ids
    pub fn pids(&self) -> impl Iterator<Item = &str> {
        self.dblp_pid
            .as_deref()
            .into_iter()
            .chain(self.other_pids.iter().map(String::as_str))
    }

    fn owns_pid(&self, pid: &str) -> bool {
        self.pids().any(|p| p == pid)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FacultyRoster {
    records: Vec<FacultyRecord>,
    by_pid: HashMap<String, usize>,
    by_name: HashMap<String, Vec<usize>>,
}

impl FacultyRoster {
    /// Load a roster file. A missing or unparseable file is fatal.
    pub fn load(path: &Path) -> Result<Self, IngestionError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IngestionError::RosterNotFound(path.display().to_string()),
            _ => IngestionError::RosterInvalid(format!("{}: {}", path.display(), e)),
        })?;

        let roster = Self::from_json(&text)
            .map_err(|e| IngestionError::RosterInvalid(format!("{}: {}", path.display(), e)))?;

        info!(path = %path.display(), faculty = roster.len(), "Loaded faculty roster");
        Ok(roster)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let records: Vec<FacultyRecord> = serde_json::from_str(json)?;
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<FacultyRecord>) -> Self {
        let mut roster = Self::default();

        for record in records {
            if record.dblp_matched == Some(false) {
                debug!(name = %record.faculty_name, "Skipping unmatched roster record");
                continue;
            }

            let idx = roster.records.len();
            for pid in record.pids() {
                roster.by_pid.entry(pid.to_string()).or_insert(idx);
            }
            for name in record.names() {
                let key = normalize_name(name);
                if key.is_empty() {
                    continue;
                }
                let owners = roster.by_name.entry(key).or_default();
                if !owners.contains(&idx) {
                    owners.push(idx);
                }
            }
            roster.records.push(record);
        }

        roster
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[FacultyRecord] {
        &self.records
    }

    /// Record owning a primary or secondary person id
    pub fn by_external_id(&self, pid: &str) -> Option<&FacultyRecord> {
        self.by_pid.get(pid).map(|&idx| &self.records[idx])
    }

    /// Faculty record an author name on a file tagged `source_tag` denotes.
    ///
    /// A name shared by several records is attributed to the one owning
    /// the file's tag; otherwise it is not attributed at all.
    pub fn match_author(&self, name: &str, source_tag: &str) -> Option<&FacultyRecord> {
        let owners = self.by_name.get(&normalize_name(name))?;
        match owners.as_slice() {
            [only] => Some(&self.records[*only]),
            many => many
                .iter()
                .map(|&idx| &self.records[idx])
                .find(|record| record.owns_pid(source_tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = r#"[
        {
            "faculty_name": "Satish Srirama",
            "dblp_pid": "s/SatishNarayanaSrirama",
            "dblp_matched": true,
            "email": "srirama@example.edu",
            "designation": "Professor",
            "aliases": ["S. Srirama", "Srirama S N"],
            "other_pids": ["99/1234"]
        },
        {
            "name": "Anil Kumar",
            "external_id": "k/AnilKumar1",
            "department": "SCIS"
        },
        {
            "faculty_name": "Anil Kumar",
            "dblp_pid": "k/AnilKumar2"
        },
        {
            "faculty_name": "Nobody Matched",
            "dblp_pid": "n/Nobody",
            "dblp_matched": false
        }
    ]"#;

    #[test]
    fn test_load_and_aliases() {
        let roster = FacultyRoster::from_json(ROSTER).unwrap();
        assert_eq!(roster.len(), 3);

        let by_alias = roster.match_author("Srirama S. N.", "anything").unwrap();
        assert_eq!(by_alias.dblp_pid.as_deref(), Some("s/SatishNarayanaSrirama"));
        assert_eq!(by_alias.profile().designation.as_deref(), Some("Professor"));

        assert!(roster.match_author("Nobody Matched", "n/Nobody").is_none());
        assert!(roster.match_author("Someone Else", "x/y").is_none());
    }

    #[test]
    fn test_secondary_pid_maps_to_primary_record() {
        let roster = FacultyRoster::from_json(ROSTER).unwrap();
        let record = roster.by_external_id("99/1234").unwrap();
        assert_eq!(record.faculty_name, "Satish Srirama");
        assert!(roster.by_external_id("n/Nobody").is_none());
    }

    #[test]
    fn test_ambiguous_name_needs_owning_tag() {
        let roster = FacultyRoster::from_json(ROSTER).unwrap();
        let second = roster.match_author("Anil Kumar", "k/AnilKumar2").unwrap();
        assert_eq!(second.dblp_pid.as_deref(), Some("k/AnilKumar2"));
        assert!(roster.match_author("Anil Kumar", "s/SatishNarayanaSrirama").is_none());
    }

    #[test]
    fn test_missing_file_is_roster_not_found() {
        let err = FacultyRoster::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, IngestionError::RosterNotFound(_)));
    }

    #[test]
    fn test_invalid_json_is_roster_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(&path, "{ not a list").unwrap();
        let err = FacultyRoster::load(&path).unwrap_err();
        assert!(matches!(err, IngestionError::RosterInvalid(_)));
    }
}
