//! ---
//! rao_section: "04-model-building"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Internal case construction from parsed exchange profiles."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Case-scoped reference index.
//!
//! Every element-defining record contributes one definition. Internal ids are
//! handed out per kind in sorted standardized-id order once all definitions
//! are known, so the numbering never depends on document order.

use std::collections::BTreeMap;

use rao_profiles::Instant;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::errors::{BuildError, Result, Unresolved};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ElementKind {
    NetworkElement,
    Contingency,
    AssessedElement,
    RemedialAction,
    /// Grid-state alteration of a remedial action; resolvable, never numbered.
    Alteration,
}

impl ElementKind {
    fn prefix(&self) -> Option<&'static str> {
        match self {
            ElementKind::NetworkElement | ElementKind::Alteration => None,
            ElementKind::Contingency => Some("co"),
            ElementKind::AssessedElement => Some("ae"),
            ElementKind::RemedialAction => Some("ra"),
        }
    }
}

/// One resolved definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub kind: ElementKind,
    pub standardized_id: String,
    /// `None` for definitions excluded from the case (disabled, not studied, no alterations).
    pub internal_id: Option<String>,
    pub profile: String,
}

/// Maps a CNEC back to the assessed element and contingency it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CnecTrace {
    pub internal_id: String,
    pub assessed_element: String,
    pub contingency: Option<String>,
    pub instant: Instant,
}

#[derive(Debug, Clone)]
struct Definition {
    profile: String,
    active: bool,
}

/// Collects definitions before internal ids are assigned.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    case: String,
    definitions: BTreeMap<(ElementKind, String), Vec<Definition>>,
}

impl IndexBuilder {
    pub fn new(case: impl Into<String>) -> Self {
        Self {
            case: case.into(),
            definitions: BTreeMap::new(),
        }
    }

    /// Record a definition. Inactive definitions resolve but receive no internal id.
    pub fn define(
        &mut self,
        kind: ElementKind,
        standardized_id: impl Into<String>,
        profile: impl Into<String>,
        active: bool,
    ) {
        self.definitions
            .entry((kind, standardized_id.into()))
            .or_default()
            .push(Definition {
                profile: profile.into(),
                active,
            });
    }

    pub fn finish(self) -> ReferenceIndex {
        let mut entries = BTreeMap::new();
        let mut internal = BTreeMap::new();
        let mut counters: BTreeMap<ElementKind, usize> = BTreeMap::new();

        for ((kind, id), mut definitions) in self.definitions {
            if definitions.len() > 1 {
                let mut profiles: Vec<String> =
                    definitions.into_iter().map(|d| d.profile).collect();
                profiles.sort();
                entries.insert((kind, id), Slot::Ambiguous(profiles));
                continue;
            }
            let Some(definition) = definitions.pop() else {
                continue;
            };
            let internal_id = definition.active.then(|| match kind.prefix() {
                Some(prefix) => {
                    let counter = counters.entry(kind).or_insert(0);
                    *counter += 1;
                    format!("{prefix}_{:04}", *counter)
                }
                None => format!("_{id}"),
            });
            if let Some(internal_id) = &internal_id {
                internal.insert(internal_id.clone(), (kind, id.clone()));
            }
            entries.insert(
                (kind, id.clone()),
                Slot::Unique(IndexEntry {
                    kind,
                    standardized_id: id,
                    internal_id,
                    profile: definition.profile,
                }),
            );
        }

        ReferenceIndex {
            case: self.case,
            entries,
            internal,
            cnecs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Unique(IndexEntry),
    Ambiguous(Vec<String>),
}

/// Immutable once the case is built; shared with the result translator.
#[derive(Debug, Clone)]
pub struct ReferenceIndex {
    case: String,
    entries: BTreeMap<(ElementKind, String), Slot>,
    internal: BTreeMap<String, (ElementKind, String)>,
    cnecs: BTreeMap<String, CnecTrace>,
}

impl ReferenceIndex {
    pub fn case(&self) -> &str {
        &self.case
    }

    /// Resolve a reference to exactly one definition.
    pub fn resolve(
        &self,
        kind: ElementKind,
        standardized_id: &str,
        referenced_by: &str,
    ) -> Result<&IndexEntry> {
        let failure = |reason| BuildError::UnresolvedReference {
            case: self.case.clone(),
            reference: standardized_id.to_owned(),
            kind,
            reason,
            referenced_by: referenced_by.to_owned(),
        };
        match self.entries.get(&(kind, standardized_id.to_owned())) {
            Some(Slot::Unique(entry)) => Ok(entry),
            Some(Slot::Ambiguous(profiles)) => Err(failure(Unresolved::Ambiguous {
                profiles: profiles.clone(),
            })),
            None => Err(failure(Unresolved::Missing)),
        }
    }

    /// Internal id of an active definition, failing like [`ReferenceIndex::resolve`].
    pub fn resolve_active(
        &self,
        kind: ElementKind,
        standardized_id: &str,
        referenced_by: &str,
    ) -> Result<Option<&str>> {
        Ok(self
            .resolve(kind, standardized_id, referenced_by)?
            .internal_id
            .as_deref())
    }

    /// Definition behind an internal id.
    pub fn standardized(&self, internal_id: &str) -> Option<&IndexEntry> {
        let key = self.internal.get(internal_id)?;
        match self.entries.get(key)? {
            Slot::Unique(entry) => Some(entry),
            Slot::Ambiguous(_) => None,
        }
    }

    pub fn cnec(&self, internal_id: &str) -> Option<&CnecTrace> {
        self.cnecs.get(internal_id)
    }

    pub fn cnecs(&self) -> impl Iterator<Item = &CnecTrace> {
        self.cnecs.values()
    }

    /// Active definitions of one kind in internal-id order.
    pub fn active(&self, kind: ElementKind) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter().filter_map(move |((k, _), slot)| match slot {
            Slot::Unique(entry) if *k == kind && entry.internal_id.is_some() => Some(entry),
            _ => None,
        })
    }

    pub(crate) fn register_cnecs(&mut self, traces: impl IntoIterator<Item = CnecTrace>) {
        for trace in traces {
            self.cnecs.insert(trace.internal_id.clone(), trace);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
