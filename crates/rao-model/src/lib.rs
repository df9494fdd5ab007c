//! ---
//! rao_section: "04-model-building"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Internal case construction from parsed exchange profiles."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
pub mod builder;
pub mod case;
pub mod errors;
pub mod index;
pub mod limits;
pub mod parameters;
pub mod result;

pub use builder::{build_case, BuildOptions, BuiltCase};
pub use case::{AppliedParameters, FlowCnec, InternalCase, NetworkAction, SwitchAction};
pub use errors::{BuildError, ParameterError, Result, Unresolved};
pub use index::{CnecTrace, ElementKind, IndexEntry, ReferenceIndex};
pub use limits::{amps_to_mw, ConversionTable, FlowLimit};
pub use parameters::{
    deep_merge, load_parameters, ParameterConfig, ParameterDocument, ParameterSummary,
    ENV_PARAMETERS_OVERRIDE,
};
pub use result::{ActivatedAction, CnecMargin, OptimizationResult, SolverStatus};
