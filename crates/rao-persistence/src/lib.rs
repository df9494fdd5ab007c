//! ---
//! rao_section: "03-persistence-logging"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Persistence abstractions and storage bindings."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! JSON-lines journals used for run-status records and flattened result
//! records. Both are append-only and replayable in sequence order.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing journal files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The file already holds a journal of a different stream.
    #[error("journal {path} holds stream '{found}', expected '{expected}'")]
    StreamMismatch {
        /// Journal path on disk.
        path: String,
        /// Stream requested by the caller.
        expected: String,
        /// Stream recorded in the header.
        found: String,
    },
    /// The first line of the file is not a journal header.
    #[error("journal {0} is missing its header line")]
    MissingHeader(String),
}

pub mod journal;
pub mod status;

pub use journal::{read_entries, replay, JournalEntry, JournalReader, JournalWriter};
pub use status::{latest_in, StatusJournal, StatusRecord};
