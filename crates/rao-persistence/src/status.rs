//! ---
//! rao_section: "03-persistence-logging"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Persistence abstractions and storage bindings."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::journal::{replay, JournalEntry, JournalWriter};
use crate::Result;

const STATUS_STREAM: &str = "case-status";
const TRANSITION_KIND: &str = "transition";

/// One case state transition as exported for log aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Case key.
    pub case: String,
    /// State before the transition, absent for the first record of a case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// State after the transition.
    pub to: String,
    /// Time the coordinator applied the transition.
    pub at: DateTime<Utc>,
    /// Dispatch attempt the transition belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Error detail for failures and retries, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Shared, append-only status journal.
pub struct StatusJournal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
}

impl StatusJournal {
    /// Open the journal at `path`, creating it when absent.
    pub fn open(path: &Path) -> Result<Self> {
        let writer = JournalWriter::open(path, STATUS_STREAM)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
        })
    }

    /// Append a transition record and return its sequence number.
    pub fn record(&self, record: &StatusRecord) -> Result<u64> {
        let payload = serde_json::to_value(record)?;
        let sequence = self
            .writer
            .lock()
            .append(JournalEntry::new(TRANSITION_KIND, payload))?;
        debug!(case = %record.case, to = %record.to, sequence, "status recorded");
        Ok(sequence)
    }

    /// Location of the journal on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All transitions of one case in recorded order.
    pub fn history(&self, case: &str) -> Result<Vec<StatusRecord>> {
        let mut records = Vec::new();
        for_each_record(&self.path, |record| {
            if record.case == case {
                records.push(record);
            }
        })?;
        Ok(records)
    }

    /// Latest record of every case in the journal, keyed by case.
    pub fn latest(&self) -> Result<BTreeMap<String, StatusRecord>> {
        latest_in(&self.path)
    }
}

/// Latest record per case for a journal that may not be open for writing.
pub fn latest_in(path: &Path) -> Result<BTreeMap<String, StatusRecord>> {
    let mut latest = BTreeMap::new();
    for_each_record(path, |record| {
        latest.insert(record.case.clone(), record);
    })?;
    Ok(latest)
}

fn for_each_record<F>(path: &Path, mut handler: F) -> Result<()>
where
    F: FnMut(StatusRecord),
{
    replay(path, |entry| {
        if entry.kind == TRANSITION_KIND {
            handler(serde_json::from_value(entry.payload)?);
        }
        Ok(())
    })?;
    Ok(())
}
