//! ---
//! rao_section: "01-core-functionality"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Shared primitives and utilities for the pipeline runtime."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Span};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::case::CaseId;
use crate::config::LoggingConfig;

const LOG_ENV: &str = "RAO_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Pick the filter directive: `RAO_LOG`, then `logging.level`, then
/// `RUST_LOG`, then `info`. Blank values are skipped.
pub fn filter_directive(
    rao_log: Option<&str>,
    configured: Option<&str>,
    rust_log: Option<&str>,
) -> String {
    [rao_log, configured, rust_log]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|directive| !directive.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVE)
        .to_owned()
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let rao_log = std::env::var(LOG_ENV).ok();
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(
        rao_log.as_deref(),
        config.level.as_deref(),
        rust_log.as_deref(),
    );
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid log directive '{directive}' ({err}); defaulting to {DEFAULT_DIRECTIVE}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    })
}

/// File name stem of the rolling pipeline log.
pub fn log_file_name(service_name: &str, config: &LoggingConfig) -> String {
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    format!("{prefix}.log")
}

/// Span carried by everything logged while a case moves through the
/// pipeline. The case fields land on every JSON line emitted inside it.
pub fn case_span(case: &CaseId) -> Span {
    info_span!(
        "case",
        case = %case,
        scenario = case.scenario(),
        target = %case.timestamp().to_rfc3339(),
    )
}

/// Initialise the tracing subscriber from configuration and environment.
///
/// Stdout carries the configured format. A daily rolling JSON file in
/// `config.directory` keeps the case history, including the `case` span
/// fields, for log aggregation.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let file_appender = daily(&config.directory, log_file_name(service_name, config));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_current_span(true)
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, log_dir = %config.directory.display(), format = ?config.format, "tracing initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn environment_override_wins_over_configured_level() {
        assert_eq!(
            filter_directive(Some("debug"), Some("warn"), Some("trace")),
            "debug"
        );
        assert_eq!(filter_directive(None, Some("warn"), Some("trace")), "warn");
        assert_eq!(filter_directive(Some("  "), None, Some("trace")), "trace");
        assert_eq!(filter_directive(None, None, None), "info");
    }

    #[test]
    fn log_file_follows_prefix_or_service() {
        let mut config = LoggingConfig::default();
        assert_eq!(log_file_name("raod", &config), "raod.log");
        config.file_prefix = Some("rao-pipeline".into());
        assert_eq!(log_file_name("raod", &config), "rao-pipeline.log");
    }

    #[test]
    fn events_inside_a_case_span_carry_the_case() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_writer(move || writer.clone())
            .finish();
        let case: CaseId = "20250602T1030Z_1D".parse().unwrap();

        tracing::subscriber::with_default(subscriber, || {
            let _entered = case_span(&case).entered();
            info!("case admitted");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let line: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(line["span"]["name"], "case");
        assert_eq!(line["span"]["case"], "20250602T1030Z_1D");
        assert_eq!(line["span"]["scenario"], "1D");
    }
}
