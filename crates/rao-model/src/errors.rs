//! ---
//! rao_section: "04-model-building"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Internal case construction from parsed exchange profiles."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::index::ElementKind;

pub type Result<T> = std::result::Result<T, BuildError>;

/// Why a reference could not be resolved to a single definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    Missing,
    Ambiguous { profiles: Vec<String> },
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unresolved::Missing => f.write_str("not defined by any ingested profile"),
            Unresolved::Ambiguous { profiles } => {
                write!(f, "defined more than once (in {})", profiles.join(", "))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unresolved reference {reference} ({kind}) in case {case}: {reason}; referenced by {referenced_by}")]
    UnresolvedReference {
        case: String,
        reference: String,
        kind: ElementKind,
        reason: Unresolved,
        referenced_by: String,
    },
    #[error("missing conversion data in case {case}: no voltage for element {element}, cannot convert amp limit")]
    MissingConversionData { case: String, element: String },
    #[error("missing limit in case {case}: element {element} has no {duration} flow limit for CNEC on {assessed_element}")]
    MissingLimit {
        case: String,
        element: String,
        assessed_element: String,
        duration: String,
    },
    #[error("invalid remedial action {remedial_action} in case {case}: {reason}")]
    InvalidRemedialAction {
        case: String,
        remedial_action: String,
        reason: String,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BuildError {
    /// Offending identifier named by the error, when there is one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            BuildError::UnresolvedReference { reference, .. } => Some(reference),
            BuildError::MissingConversionData { element, .. }
            | BuildError::MissingLimit { element, .. } => Some(element),
            BuildError::InvalidRemedialAction {
                remedial_action, ..
            } => Some(remedial_action),
            BuildError::Serialization(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("failed to read parameter document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parameter document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("parameter document is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("parameter path '{0}' is invalid")]
    InvalidPath(String),
    #[error("parameter document root must be an object")]
    NotAnObject,
    #[error("invalid parameters: {0}")]
    Invalid(String),
    #[error("parameter version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },
}
