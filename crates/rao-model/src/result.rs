//! ---
//! rao_section: "04-model-building"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Optimisation engine result model."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use rao_profiles::Instant;
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SolverStatus {
    /// All CNECs secure after optimisation.
    Secure,
    /// Optimisation finished with negative margins left.
    Unsecure,
    /// The engine proved the problem infeasible. Still a successful run.
    Infeasible,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CnecMargin {
    pub flow_cnec_id: String,
    pub pre_optimisation_margin_mw: f64,
    pub post_optimisation_margin_mw: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivatedAction {
    pub network_action_id: String,
    pub instant: Instant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contingency_id: Option<String>,
}

/// Structured engine output for one case run, expressed in internal ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub case_id: String,
    pub solver_status: SolverStatus,
    #[serde(default)]
    pub functional_cost: Option<f64>,
    #[serde(default)]
    pub cnec_margins: Vec<CnecMargin>,
    #[serde(default)]
    pub activated_actions: Vec<ActivatedAction>,
}

impl OptimizationResult {
    pub fn is_infeasible(&self) -> bool {
        self.solver_status == SolverStatus::Infeasible
    }

    /// Smallest post-optimisation margin, if any CNEC was reported.
    pub fn min_margin_mw(&self) -> Option<f64> {
        self.cnec_margins
            .iter()
            .map(|m| m.post_optimisation_margin_mw)
            .min_by(f64::total_cmp)
    }

    pub fn from_json_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
