//! ---
//! rao_section: "05-case-dispatch"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Optimisation engine dispatch and process adapter."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Case dispatch to the remedial action optimisation engine.

pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod policy;
pub mod process;

pub use dispatcher::{Dispatcher, LateOutcome};
pub use engine::{OptimizationEngine, RunHandle, RunStatus, SubmittedCase};
pub use errors::{DispatchError, EngineFault, Result};
pub use policy::DispatchPolicy;
pub use process::{EngineExit, ProcessEngine, CASE_FILE, LOG_FILE, PARAMETERS_FILE, RESULT_FILE};
