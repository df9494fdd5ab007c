//! ---
//! rao_section: "04-model-building"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Optimisation parameter loading, overriding and validation."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
//! Optimisation parameters.
//!
//! A [`ParameterDocument`] is the mutable assembly stage: load, deep-merge an
//! override document, apply time-horizon overrides, tweak dotted paths. Once
//! frozen into a [`ParameterConfig`] the document is validated, canonicalised
//! and digested, and never changes again for the run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rao_common::{HorizonOverride, ParametersConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::case::AppliedParameters;
use crate::errors::ParameterError;

pub type Result<T> = std::result::Result<T, ParameterError>;

/// Environment variable naming an override document when the configuration does not.
pub const ENV_PARAMETERS_OVERRIDE: &str = "RAO_PARAMETERS_OVERRIDE";

pub const OBJECTIVE_FUNCTIONS: &[&str] = &[
    "MAX_MIN_MARGIN",
    "MAX_MIN_RELATIVE_MARGIN",
    "MIN_COST",
    "SECURE_FLOW",
    "MAX_MIN_MARGIN_IN_MEGAWATT",
    "MAX_MIN_MARGIN_IN_AMPERE",
    "MAX_MIN_RELATIVE_MARGIN_IN_MEGAWATT",
    "MAX_MIN_RELATIVE_MARGIN_IN_AMPERE",
];

const SEARCH_TREE: &str = "extensions.open-rao-search-tree-parameters";

/// Typed view over the fields the pipeline depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub version: String,
    pub objective_function: String,
    pub available_cpus: u32,
    pub solver: String,
    pub second_preventive_policy: Option<String>,
}

/// Recursively merge `overlay` into `base`. Objects merge key by key,
/// everything else is replaced.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                if let Some(existing) = base.get_mut(key) {
                    if existing.is_object() && value.is_object() {
                        deep_merge(existing, value);
                        continue;
                    }
                }
                base.insert(key.clone(), value.clone());
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonical(v))).collect();
            let mut out = Map::new();
            for (key, value) in sorted {
                out.insert(key.clone(), value);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ParameterError::InvalidPath(path.to_owned()));
    }
    Ok(segments)
}

/// Parameter document during assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDocument {
    root: Value,
}

impl ParameterDocument {
    pub fn from_value(root: Value) -> Result<Self> {
        if !root.is_object() {
            return Err(ParameterError::NotAnObject);
        }
        Ok(Self { root })
    }

    /// JSON when the text starts with `{`, YAML otherwise.
    pub fn parse(text: &str) -> Result<Self> {
        let root: Value = if text.trim_start().starts_with('{') {
            serde_json::from_str(text)?
        } else {
            serde_yaml::from_str(text)?
        };
        Self::from_value(root)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ParameterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading parameter document");
        Self::parse(&text)
    }

    pub fn merge(&mut self, overlay: &ParameterDocument) {
        deep_merge(&mut self.root, &overlay.root);
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Set a dotted path, creating intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let segments = split_path(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(ParameterError::InvalidPath(path.to_owned()));
        };
        let mut current = &mut self.root;
        for segment in parents {
            let map = current
                .as_object_mut()
                .ok_or_else(|| ParameterError::InvalidPath(path.to_owned()))?;
            current = map
                .entry((*segment).to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        current
            .as_object_mut()
            .ok_or_else(|| ParameterError::InvalidPath(path.to_owned()))?
            .insert((*last).to_owned(), value);
        Ok(())
    }

    /// Apply every override matching `time_horizon`; returns how many were applied.
    pub fn apply_horizon_overrides<'a>(
        &mut self,
        time_horizon: &str,
        overrides: impl IntoIterator<Item = &'a HorizonOverride>,
    ) -> Result<usize> {
        let mut applied = 0;
        for entry in overrides {
            if entry.time_horizon != time_horizon {
                continue;
            }
            self.set(&entry.path, entry.value.clone())?;
            info!(
                time_horizon,
                path = %entry.path,
                value = %entry.value,
                "applied time-horizon parameter override"
            );
            applied += 1;
        }
        Ok(applied)
    }

    fn string_at(&self, paths: &[String]) -> Option<String> {
        paths.iter().find_map(|path| match self.get(path)? {
            Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
    }

    pub fn summary(&self) -> Result<ParameterSummary> {
        let version = self
            .string_at(&["version".to_owned()])
            .ok_or_else(|| ParameterError::Invalid("version is missing".into()))?;
        let objective_function = self
            .string_at(&["objective-function.type".to_owned()])
            .ok_or_else(|| ParameterError::Invalid("objective-function.type is missing".into()))?;
        if !OBJECTIVE_FUNCTIONS.contains(&objective_function.as_str()) {
            return Err(ParameterError::Invalid(format!(
                "unknown objective function '{objective_function}'"
            )));
        }
        let cpu_paths = [
            format!("{SEARCH_TREE}.multi-threading.available-cpus"),
            "multi-threading.available-cpus".to_owned(),
        ];
        let available_cpus = cpu_paths
            .iter()
            .find_map(|path| self.get(path))
            .and_then(Value::as_u64)
            .ok_or_else(|| ParameterError::Invalid("multi-threading.available-cpus is missing".into()))?;
        if available_cpus < 1 {
            return Err(ParameterError::Invalid(
                "multi-threading.available-cpus must be at least 1".into(),
            ));
        }
        let available_cpus = u32::try_from(available_cpus).map_err(|_| {
            ParameterError::Invalid("multi-threading.available-cpus is out of range".into())
        })?;
        let solver = self
            .string_at(&[
                format!("{SEARCH_TREE}.range-actions-optimization.linear-optimization-solver.solver"),
                "range-actions-optimization.linear-optimization-solver.solver".to_owned(),
            ])
            .ok_or_else(|| ParameterError::Invalid("linear optimisation solver is not named".into()))?;
        let second_preventive_policy =
            self.string_at(&["second-preventive-rao.execution-condition".to_owned()]);
        Ok(ParameterSummary {
            version,
            objective_function,
            available_cpus,
            solver,
            second_preventive_policy,
        })
    }

    /// Validate and freeze the document.
    pub fn freeze(self) -> Result<ParameterConfig> {
        let summary = self.summary()?;
        let root = canonical(&self.root);
        let bytes = serde_json::to_vec(&root)?;
        let digest = hex::encode(Sha256::digest(&bytes));
        Ok(ParameterConfig {
            root: Arc::new(root),
            bytes: Arc::from(bytes),
            summary,
            digest,
        })
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }
}

/// Validated, immutable parameter configuration for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterConfig {
    root: Arc<Value>,
    bytes: Arc<[u8]>,
    summary: ParameterSummary,
    digest: String,
}

impl ParameterConfig {
    pub fn summary(&self) -> &ParameterSummary {
        &self.summary
    }

    pub fn version(&self) -> &str {
        &self.summary.version
    }

    /// Hex SHA-256 of the canonical JSON bytes.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = self.root.as_ref();
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn document(&self) -> &Value {
        &self.root
    }

    /// Canonical JSON handed to the engine.
    pub fn canonical_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn applied(&self) -> AppliedParameters {
        AppliedParameters {
            version: self.summary.version.clone(),
            digest: self.digest.clone(),
        }
    }
}

/// Override document path: configuration first, then [`ENV_PARAMETERS_OVERRIDE`].
pub fn override_path(config: &ParametersConfig) -> Option<PathBuf> {
    config.override_path.clone().or_else(|| {
        std::env::var(ENV_PARAMETERS_OVERRIDE)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    })
}

/// Load, merge, override and freeze the parameters for one time horizon.
pub fn load_parameters(config: &ParametersConfig, time_horizon: &str) -> Result<ParameterConfig> {
    let mut document = ParameterDocument::load(&config.path)?;
    if let Some(path) = override_path(config) {
        let overlay = ParameterDocument::load(&path)?;
        document.merge(&overlay);
        info!(path = %path.display(), "merged parameter override document");
    }
    document.apply_horizon_overrides(time_horizon, config.overrides_for(time_horizon))?;
    let frozen = document.freeze()?;
    if let Some(expected) = &config.expected_version {
        if expected != frozen.version() {
            return Err(ParameterError::VersionMismatch {
                expected: expected.clone(),
                found: frozen.version().to_owned(),
            });
        }
    }
    info!(
        version = frozen.version(),
        digest = frozen.digest(),
        time_horizon,
        "parameters loaded"
    );
    Ok(frozen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> ParameterDocument {
        ParameterDocument::from_value(json!({
            "version": "2.4",
            "objective-function": {"type": "MAX_MIN_MARGIN", "unit": "MW"},
            "second-preventive-rao": {"execution-condition": "DISABLED"},
            "extensions": {
                "open-rao-search-tree-parameters": {
                    "multi-threading": {"available-cpus": 4},
                    "range-actions-optimization": {
                        "linear-optimization-solver": {"solver": "CBC", "relative-mip-gap": 0.0001}
                    },
                    "topological-actions-optimization": {"max-curative-search-tree-depth": 2}
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn deep_merge_keeps_untouched_keys() {
        let mut document = base();
        let overlay = ParameterDocument::from_value(json!({
            "objective-function": {"type": "MIN_COST"},
            "extensions": {"open-rao-search-tree-parameters": {"multi-threading": {"available-cpus": 8}}}
        }))
        .unwrap();
        document.merge(&overlay);
        assert_eq!(document.get("objective-function.type"), Some(&json!("MIN_COST")));
        assert_eq!(document.get("objective-function.unit"), Some(&json!("MW")));
        assert_eq!(
            document.get(
                "extensions.open-rao-search-tree-parameters.range-actions-optimization.linear-optimization-solver.solver"
            ),
            Some(&json!("CBC"))
        );
        assert_eq!(document.summary().unwrap().available_cpus, 8);
    }

    #[test]
    fn horizon_override_only_applies_to_matching_horizon() {
        let overrides = vec![HorizonOverride {
            time_horizon: "ID".into(),
            path: "extensions.open-rao-search-tree-parameters.topological-actions-optimization.max-curative-search-tree-depth".into(),
            value: json!(1),
        }];
        let mut intraday = base();
        assert_eq!(intraday.apply_horizon_overrides("ID", &overrides).unwrap(), 1);
        let mut day_ahead = base();
        assert_eq!(day_ahead.apply_horizon_overrides("1D", &overrides).unwrap(), 0);
        let path = "extensions.open-rao-search-tree-parameters.topological-actions-optimization.max-curative-search-tree-depth";
        assert_eq!(intraday.freeze().unwrap().get(path), Some(&json!(1)));
        assert_eq!(day_ahead.freeze().unwrap().get(path), Some(&json!(2)));
    }

    #[test]
    fn set_creates_intermediate_objects_and_rejects_scalars() {
        let mut document = base();
        document.set("a.b.c", json!(true)).unwrap();
        assert_eq!(document.get("a.b.c"), Some(&json!(true)));
        assert!(matches!(
            document.set("version.inner", json!(1)),
            Err(ParameterError::InvalidPath(_))
        ));
        assert!(matches!(
            document.set("a..b", json!(1)),
            Err(ParameterError::InvalidPath(_))
        ));
    }

    #[test]
    fn summary_validation() {
        let mut document = base();
        document
            .set("objective-function.type", json!("MAXIMISE_EVERYTHING"))
            .unwrap();
        assert!(matches!(document.summary(), Err(ParameterError::Invalid(_))));

        let mut document = base();
        document
            .set(
                "extensions.open-rao-search-tree-parameters.multi-threading.available-cpus",
                json!(0),
            )
            .unwrap();
        assert!(document.summary().is_err());

        let summary = base().summary().unwrap();
        assert_eq!(summary.solver, "CBC");
        assert_eq!(summary.second_preventive_policy.as_deref(), Some("DISABLED"));
    }

    #[test]
    fn digest_is_stable_across_key_order_and_format() {
        let json_text = r#"{"version": "2.4", "objective-function": {"unit": "MW", "type": "MAX_MIN_MARGIN"},
            "multi-threading": {"available-cpus": 2},
            "range-actions-optimization": {"linear-optimization-solver": {"solver": "SCIP"}}}"#;
        let yaml_text = "objective-function:\n  type: MAX_MIN_MARGIN\n  unit: MW\nversion: \"2.4\"\nrange-actions-optimization:\n  linear-optimization-solver:\n    solver: SCIP\nmulti-threading:\n  available-cpus: 2\n";
        let a = ParameterDocument::parse(json_text).unwrap().freeze().unwrap();
        let b = ParameterDocument::parse(yaml_text).unwrap().freeze().unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
        assert_eq!(a.summary().solver, "SCIP");
    }

    #[test]
    fn load_parameters_checks_expected_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters.json");
        fs::write(&path, serde_json::to_vec(base().as_value()).unwrap()).unwrap();
        let config = ParametersConfig {
            path: path.clone(),
            override_path: None,
            expected_version: Some("2.5".into()),
            horizon_overrides: Vec::new(),
        };
        assert!(matches!(
            load_parameters(&config, "1D"),
            Err(ParameterError::VersionMismatch { .. })
        ));
        let config = ParametersConfig {
            expected_version: Some("2.4".into()),
            ..config
        };
        assert_eq!(load_parameters(&config, "1D").unwrap().version(), "2.4");
    }
}
