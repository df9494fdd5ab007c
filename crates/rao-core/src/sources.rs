//! ---
//! rao_section: "06-pipeline-orchestration"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Profile fetch interface and its directory and in-memory bindings."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rao_common::case::parse_compact_timestamp;
use rao_common::CaseId;
use rao_profiles::{ProfileDocument, ProfileMeta, ProfileType, ValidityWindow};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::{PipelineError, Result};

/// Where the input profile documents of a case come from.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    fn name(&self) -> &str;

    /// Every document delivered for `case`. An empty delivery is not an
    /// error here; the coordinator decides which profiles are required.
    async fn fetch(&self, case: &CaseId) -> Result<Vec<ProfileDocument>>;
}

/// Delivery metadata encoded in `<KEYWORD>_<PUBLISHER>_<START>_<END>.xml`.
pub fn meta_from_file_name(name: &str) -> Option<ProfileMeta> {
    let stem = name.strip_suffix(".xml")?;
    let mut parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 {
        return None;
    }
    let end = parse_compact_timestamp(parts.pop()?).ok()?;
    let start = parse_compact_timestamp(parts.pop()?).ok()?;
    let profile_type = ProfileType::from_keyword(parts.first()?)?;
    let source = parts[1..].join("_");
    if source.is_empty() {
        return None;
    }
    Some(ProfileMeta {
        id: name.to_owned(),
        source,
        profile_type,
        validity: ValidityWindow::new(start, end)?,
        version: None,
    })
}

/// Reads `<root>/<case-key>/*.xml`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(dir: &Path, case: &str) -> std::io::Result<Vec<ProfileDocument>> {
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(meta) = meta_from_file_name(name) else {
                warn!(case, file = %path.display(), "skipping file without a profile delivery name");
                continue;
            };
            let payload = fs::read(&path)?;
            debug!(case, profile = %meta.id, bytes = payload.len(), "profile fetched");
            documents.push(ProfileDocument::new(meta, payload));
        }
        Ok(documents)
    }
}

#[async_trait]
impl ProfileSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn fetch(&self, case: &CaseId) -> Result<Vec<ProfileDocument>> {
        let key = case.key();
        let dir = self.root.join(&key);
        if !dir.is_dir() {
            return Err(PipelineError::Source {
                origin: self.root.display().to_string(),
                case: key,
                reason: "no delivery directory for the case".to_owned(),
            });
        }
        let origin = self.root.display().to_string();
        let task_key = key.clone();
        tokio::task::spawn_blocking(move || Self::read(&dir, &task_key))
            .await
            .map_err(|err| PipelineError::Source {
                origin: origin.clone(),
                case: key.clone(),
                reason: err.to_string(),
            })?
            .map_err(|err| PipelineError::Source {
                origin,
                case: key,
                reason: err.to_string(),
            })
    }
}

/// Documents held in memory, keyed by case.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    deliveries: Arc<Mutex<BTreeMap<CaseId, Vec<ProfileDocument>>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the delivery of `case`.
    pub fn deliver(&self, case: &CaseId, documents: Vec<ProfileDocument>) {
        self.deliveries.lock().insert(case.clone(), documents);
    }
}

#[async_trait]
impl ProfileSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, case: &CaseId) -> Result<Vec<ProfileDocument>> {
        self.deliveries
            .lock()
            .get(case)
            .cloned()
            .ok_or_else(|| PipelineError::Source {
                origin: "memory".to_owned(),
                case: case.key(),
                reason: "nothing delivered for the case".to_owned(),
            })
    }
}
