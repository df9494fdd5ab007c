//! ---
//! rao_section: "08-test-harness"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Test harness scaffolding and shared exports."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Shared fixtures for pipeline tests: exchange profile documents rendered
//! through the production writer, a valid parameter document, short-timeout
//! configuration and a scripted optimisation engine.

pub mod engine;
pub mod fixtures;
pub mod parameters;

pub use engine::{synthetic_result, ScriptedEngine, Step};
pub use fixtures::{
    case_id, expired_window, hour_window, target, window_around, CaseFixture, FixtureDocument,
    FixtureObject,
};
pub use parameters::{app_config, dispatch_config, parameter_config, PARAMETERS_JSON};
