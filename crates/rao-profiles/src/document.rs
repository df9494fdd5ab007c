//! ---
//! rao_section: "02-profile-conversion"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Exchange profile reading and validation."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// Exchange profile kinds understood by the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProfileType {
    Contingency,
    AssessedElement,
    RemedialAction,
    Glsk,
    FlowLimit,
    SecurityAssessmentResult,
}

/// Coarse grouping used in operator-facing reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileFamily {
    Crac,
    Cnec,
    Glsk,
    FlowLimit,
    SecurityAssessmentResult,
}

impl ProfileType {
    /// Map a header or file-name keyword onto a profile type.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.trim().to_ascii_uppercase().as_str() {
            "CO" => Some(ProfileType::Contingency),
            "AE" => Some(ProfileType::AssessedElement),
            "RA" => Some(ProfileType::RemedialAction),
            "GL" | "GLSK" => Some(ProfileType::Glsk),
            "EQ" | "TP" | "SV" | "FL" => Some(ProfileType::FlowLimit),
            "SAR" => Some(ProfileType::SecurityAssessmentResult),
            _ => None,
        }
    }

    /// Canonical keyword written into headers.
    pub fn keyword(&self) -> &'static str {
        match self {
            ProfileType::Contingency => "CO",
            ProfileType::AssessedElement => "AE",
            ProfileType::RemedialAction => "RA",
            ProfileType::Glsk => "GL",
            ProfileType::FlowLimit => "FL",
            ProfileType::SecurityAssessmentResult => "SAR",
        }
    }

    pub fn family(&self) -> ProfileFamily {
        match self {
            ProfileType::Contingency | ProfileType::RemedialAction => ProfileFamily::Crac,
            ProfileType::AssessedElement => ProfileFamily::Cnec,
            ProfileType::Glsk => ProfileFamily::Glsk,
            ProfileType::FlowLimit => ProfileFamily::FlowLimit,
            ProfileType::SecurityAssessmentResult => ProfileFamily::SecurityAssessmentResult,
        }
    }
}

/// Half-open validity interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ValidityWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn covers(&self, target: DateTime<Utc>) -> bool {
        self.start <= target && target < self.end
    }
}

impl fmt::Display for ValidityWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// Transport-level description of a document, as handed over by the fetch interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileMeta {
    /// Unique name of the document within its source (object key or file name).
    pub id: String,
    /// Publishing system or operator.
    pub source: String,
    pub profile_type: ProfileType,
    pub validity: ValidityWindow,
    #[serde(default)]
    pub version: Option<String>,
}

/// An exchange document: metadata plus the raw payload.
#[derive(Debug, Clone)]
pub struct ProfileDocument {
    pub meta: ProfileMeta,
    pub payload: Arc<[u8]>,
}

impl ProfileDocument {
    pub fn new(meta: ProfileMeta, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            meta,
            payload: Arc::from(payload.into()),
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn profile_type(&self) -> ProfileType {
        self.meta.profile_type
    }
}

/// Fields read from the document's `FullModel` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileHeader {
    pub model_id: String,
    pub keyword: String,
    pub validity: ValidityWindow,
    pub scenario_time: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub publisher: Option<String>,
}
