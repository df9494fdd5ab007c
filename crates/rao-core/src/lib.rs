//! ---
//! rao_section: "06-pipeline-orchestration"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Pipeline coordination, case state and result translation."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Study-case orchestration for the RAO pipeline.
//!
//! The [`Coordinator`] owns the case registry and drives every case through
//! fetch, parse, build, dispatch, translate and publish. Profile delivery
//! and result publication sit behind the [`ProfileSource`] and
//! [`ResultPublisher`] traits.

pub mod coordinator;
pub mod errors;
pub mod publisher;
pub mod registry;
pub mod sources;
pub mod state;
pub mod translate;

pub use coordinator::{summarize, Coordinator, ParameterSource};
pub use errors::{CaseFailure, FailureKind, PipelineError, Result, Stage, TranslateError};
pub use publisher::{
    DirectoryPublisher, MemoryPublisher, Publication, ResultPublisher, RECORDS_FILE,
    RECORDS_STREAM, RESULT_FILE,
};
pub use registry::{CaseLease, CaseRegistry};
pub use sources::{meta_from_file_name, DirectorySource, MemorySource, ProfileSource};
pub use state::{next_status, CaseEvent, CaseStatus, IllegalTransition, StudyCase, Transition};
pub use translate::{
    derived_id, target_hour, translate, CnecOutcome, ResultRecord, ScheduleOutcome,
    TranslatedResult,
};
