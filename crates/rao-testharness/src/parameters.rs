//! ---
//! rao_section: "08-test-harness"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Parameter documents and configuration for pipeline tests."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::path::Path;
use std::time::Duration;

use rao_common::{
    AppConfig, DispatchConfig, EngineConfig, LoggingConfig, MetricsConfig, ParametersConfig,
    PipelineConfig, StorageConfig,
};
use rao_model::{ParameterConfig, ParameterDocument};

pub const PARAMETERS_JSON: &str = r#"{
  "version": "2.4",
  "objective-function": {"type": "MAX_MIN_MARGIN", "unit": "MW"},
  "second-preventive-rao": {"execution-condition": "POSSIBLE_CURATIVE_IMPROVEMENT"},
  "extensions": {
    "open-rao-search-tree-parameters": {
      "multi-threading": {"available-cpus": 2},
      "range-actions-optimization": {
        "linear-optimization-solver": {"solver": "SCIP", "relative-mip-gap": 0.0001}
      },
      "topological-actions-optimization": {"max-curative-search-tree-depth": 3}
    }
  }
}"#;

pub fn parameter_config() -> ParameterConfig {
    ParameterDocument::parse(PARAMETERS_JSON)
        .and_then(ParameterDocument::freeze)
        .expect("fixture parameters are valid")
}

/// Short timeouts suited to in-process tests.
pub fn dispatch_config(timeout: Duration, retry_budget: u32) -> DispatchConfig {
    DispatchConfig {
        timeout,
        retry_budget,
        backoff_base: Duration::from_millis(5),
        backoff_max: Some(Duration::from_millis(20)),
        jitter: None,
        poll_interval: Duration::from_millis(5),
        late_result_horizon: Duration::from_millis(200),
    }
}

/// Complete configuration rooted in `root`, with the parameter document written to disk.
pub fn app_config(root: &Path, dispatch: DispatchConfig) -> std::io::Result<AppConfig> {
    let parameters = root.join("parameters.json");
    std::fs::write(&parameters, PARAMETERS_JSON)?;
    Ok(AppConfig {
        logging: LoggingConfig {
            directory: root.join("logs"),
            ..LoggingConfig::default()
        },
        metrics: MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        },
        storage: StorageConfig {
            input_root: root.join("inbox"),
            output_root: root.join("outbox"),
            journal_path: root.join("status.jsonl"),
        },
        parameters: ParametersConfig {
            path: parameters,
            override_path: None,
            expected_version: None,
            horizon_overrides: Vec::new(),
        },
        dispatch,
        engine: EngineConfig {
            command: "scripted".to_owned(),
            args: Vec::new(),
            working_dir: root.join("runs"),
            env: Default::default(),
        },
        pipeline: PipelineConfig::default(),
    })
}
