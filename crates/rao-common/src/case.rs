//! ---
//! rao_section: "01-core-functionality"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Shared primitives and utilities for the pipeline runtime."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Compact timestamp layout used in case keys and profile file names.
pub const COMPACT_TIMESTAMP: &str = "%Y%m%dT%H%MZ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaseIdError {
    #[error("case key '{0}' is not of the form <YYYYMMDDTHHMMZ>_<scenario>")]
    Layout(String),
    #[error("case key '{key}' has an invalid timestamp: {reason}")]
    Timestamp { key: String, reason: String },
    #[error("scenario tag must be non-empty alphanumeric, got '{0}'")]
    Scenario(String),
}

/// Identifier of a study case: target timestamp plus scenario (time horizon) tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaseId {
    timestamp: DateTime<Utc>,
    scenario: String,
}

impl CaseId {
    pub fn new(timestamp: DateTime<Utc>, scenario: impl Into<String>) -> Result<Self, CaseIdError> {
        let scenario = scenario.into();
        if scenario.is_empty() || !scenario.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CaseIdError::Scenario(scenario));
        }
        Ok(Self {
            timestamp,
            scenario,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Time horizon tag, e.g. `1D` or `ID`.
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// Directory-safe key, `20250602T1030Z_1D`.
    pub fn key(&self) -> String {
        format!(
            "{}_{}",
            self.timestamp.format(COMPACT_TIMESTAMP),
            self.scenario
        )
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for CaseId {
    type Err = CaseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (stamp, scenario) = s
            .split_once('_')
            .ok_or_else(|| CaseIdError::Layout(s.to_owned()))?;
        let timestamp = parse_compact_timestamp(stamp).map_err(|reason| CaseIdError::Timestamp {
            key: s.to_owned(),
            reason,
        })?;
        CaseId::new(timestamp, scenario)
    }
}

impl Serialize for CaseId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for CaseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse the compact `%Y%m%dT%H%MZ` layout into a UTC timestamp.
pub fn parse_compact_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(raw, COMPACT_TIMESTAMP)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 2, 10, 30, 0).unwrap();
        let id = CaseId::new(ts, "1D").unwrap();
        assert_eq!(id.key(), "20250602T1030Z_1D");
        let parsed: CaseId = id.key().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(matches!(
            "20250602T1030Z".parse::<CaseId>(),
            Err(CaseIdError::Layout(_))
        ));
        assert!(matches!(
            "2025-06-02_1D".parse::<CaseId>(),
            Err(CaseIdError::Timestamp { .. })
        ));
        assert!(matches!(
            "20250602T1030Z_i-d".parse::<CaseId>(),
            Err(CaseIdError::Scenario(_))
        ));
    }
}
