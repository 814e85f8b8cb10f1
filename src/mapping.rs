//! Mapping-table loading.
//!
//! The mapping table is a CSV file whose header row names an `old` and a `new`
//! column. Other columns are ignored. It is the only durable input to a run.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::types::MappingEntry;

const OLD_COLUMN: &str = "old";
const NEW_COLUMN: &str = "new";

#[derive(Debug, Deserialize)]
struct MappingRow {
    old: String,
    new: String,
}

/// Loads the mapping table at `path`.
pub fn load_mapping(path: &Path) -> Result<Vec<MappingEntry>, ConfigError> {
    let file = File::open(path).map_err(|e| ConfigError::InvalidMapping {
        reason: format!("cannot open {}: {}", path.display(), e),
    })?;
    let entries = read_mapping(file)?;
    debug!(path = %path.display(), rows = entries.len(), "Loaded mapping table");
    Ok(entries)
}

/// Reads mapping entries from CSV.
///
/// Values are trimmed. Rows with an empty side are rejected rather than
/// skipped, so a typo cannot silently drop a reassignment. Duplicate `old`
/// values are kept and only logged.
pub fn read_mapping(reader: impl io::Read) -> Result<Vec<MappingEntry>, ConfigError> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv.headers().map_err(|e| ConfigError::InvalidMapping {
        reason: format!("cannot read header row: {}", e),
    })?;
    for required in [OLD_COLUMN, NEW_COLUMN] {
        if !headers.iter().any(|h| h == required) {
            return Err(ConfigError::InvalidMapping {
                reason: format!("header row must contain '{}' and '{}'", OLD_COLUMN, NEW_COLUMN),
            });
        }
    }

    let mut entries = Vec::new();
    for (idx, row) in csv.deserialize::<MappingRow>().enumerate() {
        // Line 1 is the header.
        let line = idx + 2;
        let row = row.map_err(|e| ConfigError::InvalidMapping {
            reason: format!("line {}: {}", line, e),
        })?;
        if row.old.is_empty() || row.new.is_empty() {
            return Err(ConfigError::InvalidMapping {
                reason: format!("line {}: both '{}' and '{}' must be set", line, OLD_COLUMN, NEW_COLUMN),
            });
        }
        entries.push(MappingEntry::new(row.old, row.new));
    }

    warn_duplicate_sources(&entries);
    Ok(entries)
}

/// The de-duplicated set of every token referenced by the table.
pub fn distinct_tokens(entries: &[MappingEntry]) -> BTreeSet<String> {
    entries
        .iter()
        .flat_map(|e| [e.old.clone(), e.new.clone()])
        .collect()
}

fn warn_duplicate_sources(entries: &[MappingEntry]) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for entry in entries {
        *counts.entry(entry.old.as_str()).or_default() += 1;
    }
    for (old, count) in counts.into_iter().filter(|(_, c)| *c > 1) {
        warn!(
            old,
            count, "Identity appears as 'old' in several rows; rows run independently and the last write wins"
        );
    }
}
