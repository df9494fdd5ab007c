//! ---
//! rao_section: "03-persistence-logging"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Structured logging adapters and sinks."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Case-aware logging helpers. Every event carries the `case`, `stage`,
//! `profile` and `attempt` fields so log aggregation can follow one study
//! case through the pipeline.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialise a baseline tracing subscriber suitable for tests and tooling.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogContext<'a> {
    /// Study case key.
    pub case: Option<&'a str>,
    /// Pipeline stage (`fetch`, `parse`, `build`, `dispatch`, `translate`, `publish`).
    pub stage: Option<&'a str>,
    /// Profile document identifier.
    pub profile: Option<&'a str>,
    /// Dispatch attempt number, 1-based.
    pub attempt: Option<u32>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context scoped to one study case.
    pub fn for_case(case: &'a str) -> Self {
        Self::default().with_case(case)
    }

    /// Attach a case key.
    pub fn with_case(mut self, case: &'a str) -> Self {
        self.case = Some(case);
        self
    }

    /// Attach a pipeline stage.
    pub fn with_stage(mut self, stage: &'a str) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Attach a profile document identifier.
    pub fn with_profile(mut self, profile: &'a str) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Attach a dispatch attempt number.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardised lifecycle event with a success/fault outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    match outcome {
        SystemEventOutcome::Success => tracing::info!(
            event,
            outcome = outcome.as_str(),
            case = ctx.case.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::error!(
            event,
            outcome = outcome.as_str(),
            case = ctx.case.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %message
        ),
    }
}
