//! ---
//! rao_section: "02-profile-conversion"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Exchange profile reading and validation."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::document::ValidityWindow;

pub type Result<T> = std::result::Result<T, ProfileError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProfileError {
    #[error("malformed profile {profile}: element {element}: {reason}")]
    Malformed {
        profile: String,
        element: String,
        reason: String,
    },
    #[error("stale profile {profile}: validity {window} does not cover {target}")]
    Stale {
        profile: String,
        window: ValidityWindow,
        target: DateTime<Utc>,
    },
    #[error("failed to write profile {profile}: {reason}")]
    Write { profile: String, reason: String },
}

impl ProfileError {
    pub fn malformed(
        profile: impl Into<String>,
        element: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ProfileError::Malformed {
            profile: profile.into(),
            element: element.into(),
            reason: reason.into(),
        }
    }

    /// Identifier of the document the error refers to.
    pub fn profile(&self) -> &str {
        match self {
            ProfileError::Malformed { profile, .. }
            | ProfileError::Stale { profile, .. }
            | ProfileError::Write { profile, .. } => profile,
        }
    }
}
