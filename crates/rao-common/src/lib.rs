//! ---
//! rao_section: "01-core-functionality"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Shared primitives and utilities for the pipeline runtime."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Core shared primitives for the RAO pipeline workspace.
//! This crate exposes configuration loading, tracing initialisation and the
//! study-case identifier consumed across the workspace.

pub mod case;
pub mod config;
pub mod logging;

pub use case::{CaseId, CaseIdError, COMPACT_TIMESTAMP};
pub use config::{
    AppConfig, DispatchConfig, EngineConfig, HorizonOverride, LoadedAppConfig, LoggingConfig,
    MetricsConfig, ParametersConfig, PipelineConfig, StorageConfig,
};
pub use logging::{case_span, filter_directive, init_tracing, log_file_name, LogFormat};
