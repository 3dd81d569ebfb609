//! PubTrack Ingestion
//!
//! BibTeX ingestion pipeline:
//! 1. Parse each `.bib` file (tolerant, with within-file dedup)
//! 2. Resolve every listed author to a stable identity
//! 3. Deduplicate publications by entry key, then DOI
//! 4. Update the collaboration graph for new publications
//!
//! Also hosts the DBLP fetcher and the offline author reconciliation.

pub mod bibtex;
pub mod dedup;
pub mod errors;
pub mod fetch;
pub mod graph;
pub mod identity;
pub mod orchestrator;
pub mod reconcile;
pub mod roster;
pub mod source_tag;
pub mod text;
pub mod venue;

pub use errors::{FetchError, IngestionError};
pub use fetch::{DblpFetcher, FetchReport};
pub use orchestrator::{IngestionPipeline, IngestionReport, RunOutcome};
pub use roster::FacultyRoster;
