//! ---
//! rao_section: "02-profile-conversion"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Exchange profile reading and validation."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Readers and writers for the RDF/XML exchange profiles consumed and
//! produced by the RAO pipeline.
//!
//! Parsing is a pure transform: a [`ProfileDocument`] goes in, typed
//! [`RecordSet`] entries come out, or a [`ProfileError`] naming the document,
//! the offending element and the reason.

pub mod document;
pub mod errors;
pub mod parser;
pub mod rdf;
pub mod records;

pub use document::{
    ProfileDocument, ProfileFamily, ProfileHeader, ProfileMeta, ProfileType, ValidityWindow,
};
pub use errors::{ProfileError, Result};
pub use parser::{parse_profile, ParsedProfile, EQUIPMENT_CLASSES};
pub use rdf::{normalize_id, read_graph, RdfGraph, RdfObject, RdfValue, RdfWriter};
pub use records::*;
