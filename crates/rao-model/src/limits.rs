//! ---
//! rao_section: "04-model-building"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Internal case construction from parsed exchange profiles."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use rao_profiles::{Instant, LimitDuration, LimitUnit, RecordSet};
use serde::{Deserialize, Serialize};

use crate::errors::{BuildError, Result};

const TRANSFORMER_CLASS: &str = "PowerTransformer";

/// `MW = V_kV × I_A × √3 / 1000`, rounded to one decimal.
pub fn amps_to_mw(voltage_kv: f64, amps: f64) -> f64 {
    round_tenth(voltage_kv * amps * 3f64.sqrt() / 1000.0)
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawLimit {
    pub duration: LimitDuration,
    pub unit: LimitUnit,
    pub value: f64,
}

/// Flow limit applied to one CNEC.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowLimit {
    pub megawatt: f64,
    pub duration: LimitDuration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementLimits {
    pub class: Option<String>,
    pub voltage_kv: Option<f64>,
    pub limits: Vec<RawLimit>,
}

/// Per-element voltages and raw limits derived from the flow-limit fragments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionTable {
    elements: BTreeMap<String, ElementLimits>,
}

impl ConversionTable {
    pub fn from_records(records: &RecordSet) -> Self {
        let mut elements: BTreeMap<String, ElementLimits> = BTreeMap::new();
        for equipment in &records.equipment {
            elements.entry(equipment.id.clone()).or_default().class = Some(equipment.class.clone());
        }

        let mut node_voltages: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for voltage in &records.voltages {
            node_voltages
                .entry(voltage.node.as_str())
                .or_default()
                .push(voltage.kv);
        }
        let node_voltage = |node: &str| -> Option<f64> {
            let mut values = node_voltages.get(node)?.clone();
            values.sort_by(f64::total_cmp);
            Some(values.iter().sum::<f64>() / values.len() as f64)
        };

        let mut terminals: Vec<_> = records.terminals.iter().collect();
        terminals.sort_by(|a, b| a.id.cmp(&b.id));
        let mut terminal_voltages: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        let mut terminal_equipment: BTreeMap<&str, &str> = BTreeMap::new();
        for terminal in &terminals {
            terminal_equipment.insert(terminal.id.as_str(), terminal.equipment.as_str());
            if let Some(kv) = terminal.node.as_deref().and_then(node_voltage) {
                terminal_voltages
                    .entry(terminal.equipment.as_str())
                    .or_default()
                    .push(kv);
            }
        }
        for (equipment, values) in terminal_voltages {
            let entry = elements.entry(equipment.to_owned()).or_default();
            let voltage = if entry.class.as_deref() == Some(TRANSFORMER_CLASS) {
                values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
            entry.voltage_kv = Some(round_tenth(voltage));
        }

        let durations: BTreeMap<&str, LimitDuration> = records
            .limit_types
            .iter()
            .map(|t| (t.id.as_str(), t.duration))
            .collect();
        let set_equipment: BTreeMap<&str, &str> = records
            .limit_sets
            .iter()
            .filter_map(|set| {
                let equipment = set.equipment.as_deref().or_else(|| {
                    set.terminal
                        .as_deref()
                        .and_then(|t| terminal_equipment.get(t).copied())
                })?;
                Some((set.id.as_str(), equipment))
            })
            .collect();
        for limit in &records.limits {
            // Limits of types other than PATL/TATL do not constrain flows.
            let Some(duration) = durations.get(limit.limit_type.as_str()) else {
                continue;
            };
            let Some(equipment) = set_equipment.get(limit.set.as_str()) else {
                continue;
            };
            elements
                .entry((*equipment).to_owned())
                .or_default()
                .limits
                .push(RawLimit {
                    duration: *duration,
                    unit: limit.unit,
                    value: limit.value,
                });
        }

        Self { elements }
    }

    pub fn element(&self, element: &str) -> Option<&ElementLimits> {
        self.elements.get(element)
    }

    pub fn voltage_kv(&self, element: &str) -> Option<f64> {
        self.elements.get(element)?.voltage_kv
    }

    /// Limit for a CNEC in `instant`: PATL when preventive, TATL with PATL fallback otherwise.
    /// The smallest value of the chosen duration wins.
    pub fn flow_limit(
        &self,
        case: &str,
        element: &str,
        assessed_element: &str,
        instant: Instant,
    ) -> Result<FlowLimit> {
        let limits = self
            .elements
            .get(element)
            .map(|e| e.limits.as_slice())
            .unwrap_or_default();
        let preference: &[LimitDuration] = match instant {
            Instant::Preventive => &[LimitDuration::Patl],
            Instant::Outage | Instant::Curative => &[LimitDuration::Tatl, LimitDuration::Patl],
        };
        for duration in preference {
            let mut best: Option<f64> = None;
            for limit in limits.iter().filter(|l| l.duration == *duration) {
                let megawatt = match limit.unit {
                    LimitUnit::Megawatt => limit.value,
                    LimitUnit::Ampere => {
                        let kv = self.voltage_kv(element).ok_or_else(|| {
                            BuildError::MissingConversionData {
                                case: case.to_owned(),
                                element: element.to_owned(),
                            }
                        })?;
                        amps_to_mw(kv, limit.value)
                    }
                };
                best = Some(best.map_or(megawatt, |current| current.min(megawatt)));
            }
            if let Some(megawatt) = best {
                return Ok(FlowLimit {
                    megawatt,
                    duration: *duration,
                });
            }
        }
        Err(BuildError::MissingLimit {
            case: case.to_owned(),
            element: element.to_owned(),
            assessed_element: assessed_element.to_owned(),
            duration: match instant {
                Instant::Preventive => "PATL".to_owned(),
                Instant::Outage | Instant::Curative => "TATL or PATL".to_owned(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rao_profiles::{
        EquipmentRecord, LimitRecord, LimitSetRecord, LimitTypeRecord, Sourced, TerminalRecord,
        VoltageRecord,
    };

    fn sourced<T>(record: T) -> Sourced<T> {
        Sourced::new("FL_TEST", record)
    }

    fn records() -> RecordSet {
        let mut records = RecordSet::default();
        for (id, class) in [("line-1", "ACLineSegment"), ("tr-1", "PowerTransformer")] {
            records.equipment.push(sourced(EquipmentRecord {
                id: id.into(),
                name: None,
                class: class.into(),
            }));
        }
        for (id, equipment, node) in [
            ("t1", "line-1", "n1"),
            ("t2", "line-1", "n2"),
            ("t3", "tr-1", "n2"),
            ("t4", "tr-1", "n3"),
        ] {
            records.terminals.push(sourced(TerminalRecord {
                id: id.into(),
                equipment: equipment.into(),
                node: Some(node.into()),
            }));
        }
        for (id, node, kv) in [("v1", "n1", 400.0), ("v2", "n2", 410.0), ("v3", "n3", 225.0)] {
            records.voltages.push(sourced(VoltageRecord {
                id: id.into(),
                node: node.into(),
                kv,
            }));
        }
        records.limit_types.push(sourced(LimitTypeRecord {
            id: "patl".into(),
            duration: LimitDuration::Patl,
        }));
        records.limit_types.push(sourced(LimitTypeRecord {
            id: "tatl".into(),
            duration: LimitDuration::Tatl,
        }));
        records.limit_sets.push(sourced(LimitSetRecord {
            id: "set-line".into(),
            terminal: Some("t1".into()),
            equipment: None,
        }));
        records.limit_sets.push(sourced(LimitSetRecord {
            id: "set-tr".into(),
            terminal: None,
            equipment: Some("tr-1".into()),
        }));
        for (id, set, limit_type, value, unit) in [
            ("l1", "set-line", "patl", 1000.0, LimitUnit::Ampere),
            ("l2", "set-line", "patl", 900.0, LimitUnit::Ampere),
            ("l3", "set-tr", "patl", 300.0, LimitUnit::Megawatt),
            ("l4", "set-tr", "unknown", 1.0, LimitUnit::Megawatt),
        ] {
            records.limits.push(sourced(LimitRecord {
                id: id.into(),
                set: set.into(),
                limit_type: limit_type.into(),
                value,
                unit,
            }));
        }
        records
    }

    #[test]
    fn converts_amps_with_mean_terminal_voltage() {
        let table = ConversionTable::from_records(&records());
        assert_eq!(table.voltage_kv("line-1"), Some(405.0));
        let limit = table
            .flow_limit("case", "line-1", "ae-1", Instant::Preventive)
            .unwrap();
        assert_eq!(limit.megawatt, amps_to_mw(405.0, 900.0));
        assert_eq!(limit.megawatt, 631.3);
    }

    #[test]
    fn transformer_uses_highest_voltage_and_curative_falls_back_to_patl() {
        let table = ConversionTable::from_records(&records());
        assert_eq!(table.voltage_kv("tr-1"), Some(410.0));
        let limit = table
            .flow_limit("case", "tr-1", "ae-2", Instant::Curative)
            .unwrap();
        assert_eq!(limit.duration, LimitDuration::Patl);
        assert_eq!(limit.megawatt, 300.0);
    }

    #[test]
    fn missing_voltage_and_missing_limit_are_hard_failures() {
        let mut records = records();
        records.voltages.clear();
        let table = ConversionTable::from_records(&records);
        assert!(matches!(
            table.flow_limit("case", "line-1", "ae-1", Instant::Preventive),
            Err(BuildError::MissingConversionData { .. })
        ));
        assert!(matches!(
            table.flow_limit("case", "line-9", "ae-9", Instant::Preventive),
            Err(BuildError::MissingLimit { .. })
        ));
    }

    #[test]
    fn conversion_formula_rounds_to_a_tenth() {
        assert_eq!(amps_to_mw(400.0, 1000.0), 692.8);
        assert_eq!(amps_to_mw(225.0, 0.0), 0.0);
    }
}
