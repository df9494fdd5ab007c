//! ---
//! rao_section: "06-pipeline-orchestration"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Result publication interface and its directory and in-memory bindings."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rao_common::CaseId;
use rao_persistence::{JournalEntry, JournalWriter};
use rao_profiles::ProfileDocument;
use tracing::info;

use crate::errors::{PipelineError, Result};
use crate::translate::ResultRecord;

pub const RESULT_FILE: &str = "security-assessment-result.xml";
pub const RECORDS_FILE: &str = "results.jsonl";
pub const RECORDS_STREAM: &str = "case-results";

/// Everything published for one completed case.
#[derive(Debug, Clone)]
pub struct Publication {
    pub case: CaseId,
    pub document: ProfileDocument,
    pub records: Vec<ResultRecord>,
}

#[async_trait]
pub trait ResultPublisher: Send + Sync {
    fn name(&self) -> &str;

    /// Publish and return the location of the result document.
    async fn publish(&self, publication: &Publication) -> Result<String>;
}

/// Writes `<root>/<case-key>/security-assessment-result.xml` plus a
/// JSON-lines record file next to it. A resubmitted case replaces both.
#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    root: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write(dir: &Path, publication: &Publication) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let document = dir.join(RESULT_FILE);
        let staging = dir.join(format!("{RESULT_FILE}.partial"));
        fs::write(&staging, &publication.document.payload[..])?;
        fs::rename(&staging, &document)?;

        let records = dir.join(RECORDS_FILE);
        if records.exists() {
            fs::remove_file(&records)?;
        }
        let mut journal = JournalWriter::open(&records, RECORDS_STREAM)?;
        for record in &publication.records {
            let kind = match record {
                ResultRecord::Cnec { .. } => "cnec_result",
                ResultRecord::Summary { .. } => "case_summary",
            };
            journal.append(JournalEntry::new(kind, serde_json::to_value(record)?))?;
        }
        Ok(document)
    }
}

#[async_trait]
impl ResultPublisher for DirectoryPublisher {
    fn name(&self) -> &str {
        "directory"
    }

    async fn publish(&self, publication: &Publication) -> Result<String> {
        let key = publication.case.key();
        let dir = self.root.join(&key);
        let owned = publication.clone();
        let written = tokio::task::spawn_blocking(move || Self::write(&dir, &owned))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| result)
            .map_err(|err| PipelineError::Publish {
                case: key.clone(),
                reason: format!("{err:#}"),
            })?;
        info!(case = %key, path = %written.display(), "result published");
        Ok(written.display().to_string())
    }
}

/// Keeps publications in memory; can be switched to fail every publish.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    published: Arc<Mutex<Vec<Publication>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publications(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn publications(&self) -> Vec<Publication> {
        self.published.lock().clone()
    }

    /// Latest publication of `case`.
    pub fn find(&self, case: &CaseId) -> Option<Publication> {
        self.published
            .lock()
            .iter()
            .rev()
            .find(|publication| &publication.case == case)
            .cloned()
    }
}

#[async_trait]
impl ResultPublisher for MemoryPublisher {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, publication: &Publication) -> Result<String> {
        let key = publication.case.key();
        if self.failing.load(Ordering::SeqCst) {
            return Err(PipelineError::Publish {
                case: key,
                reason: "publisher unavailable".to_owned(),
            });
        }
        self.published.lock().push(publication.clone());
        Ok(format!("memory://{key}/{RESULT_FILE}"))
    }
}
