//! The durable experiment document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{DseError, Result};
use crate::interp::phase_values;
use crate::plan::{Phase, Plan};
use crate::value::ParamValue;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentCursor {
    pub current_phase: usize,
    pub current_trial: usize,
    #[serde(default)]
    pub dynamic_replan: bool,
}

/// Snapshot of a phase taken the first time its index is entered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase_number: u64,
    pub goal: String,
    pub hypothesis: String,
    pub params_changed: Vec<String>,
    pub param_ranges: Vec<(ParamValue, ParamValue)>,
    pub num_trials: usize,
    #[serde(default)]
    pub branch_decision: Option<String>,
    pub plan_digest: String,
    pub entered_at: String,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl PhaseRecord {
    pub fn from_phase(phase: &Phase, plan_digest: String, entered_at: String) -> Self {
        Self {
            phase_number: phase.number,
            goal: phase.goal.clone(),
            hypothesis: phase.hypothesis.clone(),
            params_changed: phase.params_changed.clone(),
            param_ranges: phase.param_ranges.clone(),
            num_trials: phase.num_trials,
            branch_decision: None,
            plan_digest,
            entered_at,
            completed_at: None,
        }
    }

    /// The phase as it was when entered, independent of later plan revisions.
    pub fn as_phase(&self) -> Phase {
        Phase {
            number: self.phase_number,
            goal: self.goal.clone(),
            hypothesis: self.hypothesis.clone(),
            params_changed: self.params_changed.clone(),
            param_ranges: self.param_ranges.clone(),
            num_trials: self.num_trials,
        }
    }
}

/// Extracted simulator statistics for one trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub sim_seconds: f64,
    pub memory_bytes_used: f64,
    pub instruction_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub applied: Vec<(String, ParamValue)>,
    pub result: TrialResult,
    #[serde(default)]
    pub exit_status: Option<i32>,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JustificationLog {
    #[serde(default)]
    pub user: Vec<String>,
    #[serde(default)]
    pub auto: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    User,
    Auto,
}

impl JustificationLog {
    /// Appends unless identical to the most recent entry of the same stream.
    /// Returns whether the entry was stored.
    pub fn push(&mut self, trigger: Trigger, text: &str) -> bool {
        let stream = match trigger {
            Trigger::User => &mut self.user,
            Trigger::Auto => &mut self.auto,
        };
        if stream.last().map(String::as_str) == Some(text) {
            return false;
        }
        stream.push(text.to_string());
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentState {
    /// Live parameter values, read by the simulator configuration.
    #[serde(default)]
    pub vars: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub min: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub max: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub user_modifications: Vec<String>,
    #[serde(default)]
    pub justifications: JustificationLog,
    #[serde(default)]
    pub cursor: ExperimentCursor,
    #[serde(default)]
    pub phases: BTreeMap<usize, PhaseRecord>,
    #[serde(default)]
    pub trials: BTreeMap<usize, BTreeMap<usize, TrialRecord>>,
    #[serde(default)]
    pub final_report: Option<String>,
}

impl ExperimentState {
    pub fn parsed_plan(&self) -> Result<Option<Plan>> {
        self.plan.as_deref().map(Plan::parse).transpose()
    }

    /// A parameter may be swept only when its global bounds differ.
    pub fn is_sweepable(&self, name: &str) -> bool {
        match (self.min.get(name), self.max.get(name)) {
            (Some(lo), Some(hi)) => lo != hi,
            _ => false,
        }
    }

    /// Parses `text` and checks every swept parameter against the store.
    /// Each phase's first and last trial are interpolated up front, so a plan
    /// is never accepted with a range that would fail once entered.
    pub fn validate_plan_text(&self, text: &str) -> Result<Plan> {
        let plan = Plan::parse(text)?;
        for phase in &plan.phases {
            for (name, (start, end)) in phase.params_changed.iter().zip(&phase.param_ranges) {
                let current = self
                    .vars
                    .get(name)
                    .ok_or_else(|| DseError::UnknownParameter(name.clone()))?;
                if !self.is_sweepable(name) {
                    return Err(DseError::invalid_range(
                        name,
                        "global min equals max; parameter is not eligible for sweeping",
                    ));
                }
                for bound in [start, end] {
                    if bound.is_int() != current.is_int() {
                        return Err(DseError::invalid_range(
                            name,
                            format!("bound {} does not match value kind of {}", bound, current),
                        ));
                    }
                }
            }
            phase_values(phase, 0)?;
            phase_values(phase, phase.num_trials - 1)?;
        }
        Ok(plan)
    }

    /// Sets a parameter's global bounds. Integer-valued parameters take
    /// integer bounds only.
    pub fn set_bounds(
        &mut self,
        name: &str,
        min: Option<ParamValue>,
        max: Option<ParamValue>,
    ) -> Result<()> {
        let current = self
            .vars
            .get(name)
            .ok_or_else(|| DseError::UnknownParameter(name.to_string()))?;
        let int_param = current.is_int();
        for bound in min.iter().chain(max.iter()) {
            if bound.is_int() != int_param {
                return Err(DseError::invalid_range(
                    name,
                    format!("bound {} does not match value kind of {}", bound, current),
                ));
            }
        }
        if let Some(lo) = min {
            self.min.insert(name.to_string(), lo);
        }
        if let Some(hi) = max {
            self.max.insert(name.to_string(), hi);
        }
        Ok(())
    }

    pub fn record_trial(&mut self, phase: usize, trial: usize, record: TrialRecord) {
        self.trials.entry(phase).or_default().insert(trial, record);
    }

    pub fn trial_count(&self) -> usize {
        self.trials.values().map(BTreeMap::len).sum()
    }

    /// All trials in execution order.
    pub fn trial_history(&self) -> Vec<(usize, usize, &TrialRecord)> {
        self.trials
            .iter()
            .flat_map(|(p, ts)| ts.iter().map(move |(t, r)| (*p, *t, r)))
            .collect()
    }

    /// After a finished experiment receives a new plan, moves the cursor from
    /// the terminal marker back to the first phase index never entered.
    pub fn reopen_if_finished(&mut self) {
        if self.final_report.is_none() || self.phases.contains_key(&self.cursor.current_phase) {
            return;
        }
        let next = self.phases.keys().next_back().map_or(0, |k| k + 1);
        if self.cursor.current_phase > next {
            self.cursor.current_phase = next;
            self.cursor.current_trial = 0;
        }
    }

    /// True once the final report exists and no phase remains to be entered.
    pub fn is_finished(&self) -> bool {
        self.final_report.is_some()
            && !self.phases.contains_key(&self.cursor.current_phase)
            && matches!(
                self.parsed_plan(),
                Ok(Some(plan)) if self.cursor.current_phase >= plan.len()
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExperimentState {
        serde_json::from_str(
            r#"{
                "vars": {"l1d_size": "32kB", "l1d_assoc": 8, "num_cores": 1},
                "min": {"l1d_size": "2kB", "l1d_assoc": 2, "num_cores": 1},
                "max": {"l1d_size": "128kB", "l1d_assoc": 16, "num_cores": 1}
            }"#,
        )
        .expect("defaults snapshot")
    }

    #[test]
    fn defaults_snapshot_fills_missing_sections() {
        let state = sample();
        assert_eq!(state.plan, None);
        assert_eq!(state.cursor, ExperimentCursor::default());
        assert!(state.phases.is_empty());
        assert_eq!(state.vars.get("l1d_assoc"), Some(&ParamValue::Int(8)));
    }

    #[test]
    fn plan_validation_checks_parameters() {
        let state = sample();
        state
            .validate_plan_text(r#"0 "g" "h" 1 "l1d_size" "2kB" "32kB" 5"#)
            .expect("valid plan");
        assert!(matches!(
            state.validate_plan_text(r#"0 "g" "h" 1 "l3_size" "2kB" "32kB" 5"#),
            Err(DseError::UnknownParameter(_))
        ));
        assert!(matches!(
            state.validate_plan_text(r#"0 "g" "h" 1 "num_cores" "1" "4" 5"#),
            Err(DseError::InvalidRange { .. })
        ));
    }

    #[test]
    fn plan_validation_rejects_ranges_that_cannot_interpolate() {
        let state = sample();
        assert!(matches!(
            state.validate_plan_text(r#"0 "g" "h" 1 "l1d_size" "1" "4" 3"#),
            Err(DseError::InvalidRange { .. })
        ));
        assert!(matches!(
            state.validate_plan_text(r#"0 "g" "h" 1 "l1d_assoc" "2kB" "8kB" 3"#),
            Err(DseError::InvalidRange { .. })
        ));
        assert!(matches!(
            state.validate_plan_text(r#"0 "g" "h" 1 "l1d_assoc" "4" "4" 3"#),
            Err(DseError::InvalidRange { .. })
        ));
        assert!(matches!(
            state.validate_plan_text(r#"0 "g" "h" 1 "l1d_size" "4kB" "8GHz" 3"#),
            Err(DseError::InvalidRange { .. })
        ));
        assert!(matches!(
            state.validate_plan_text(r#"0 "g" "h" 1 "l1d_size" "huge" "8kB" 3"#),
            Err(DseError::InvalidQuantity(_))
        ));
        let plan = state
            .validate_plan_text(r#"0 "g" "h" 1 "l1d_size" "512B" "2kB" 3"#)
            .expect("byte units may cross");
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn set_bounds_enforces_value_kind() {
        let mut state = sample();
        state
            .set_bounds("l1d_assoc", Some(ParamValue::Int(1)), None)
            .expect("int bound");
        assert_eq!(state.min.get("l1d_assoc"), Some(&ParamValue::Int(1)));
        assert_eq!(state.max.get("l1d_assoc"), Some(&ParamValue::Int(16)));
        assert!(state
            .set_bounds("l1d_assoc", None, Some(ParamValue::coerce("4kB")))
            .is_err());
        assert!(state.set_bounds("nope", None, None).is_err());
    }

    #[test]
    fn justification_log_deduplicates_consecutive_entries() {
        let mut log = JustificationLog::default();
        assert!(log.push(Trigger::Auto, "keep going"));
        assert!(!log.push(Trigger::Auto, "keep going"));
        assert!(log.push(Trigger::User, "keep going"));
        assert!(log.push(Trigger::Auto, "branch"));
        assert!(log.push(Trigger::Auto, "keep going"));
        assert_eq!(log.auto, vec!["keep going", "branch", "keep going"]);
        assert_eq!(log.user, vec!["keep going"]);
    }

    #[test]
    fn trial_map_round_trips_through_json() {
        let mut state = sample();
        let record = TrialRecord {
            applied: vec![("l1d_size".into(), ParamValue::coerce("4kB"))],
            result: TrialResult {
                sim_seconds: 0.5,
                memory_bytes_used: 1024.0,
                instruction_rate: 1.0e6,
            },
            exit_status: Some(0),
            recorded_at: "2026-01-01T00:00:00Z".into(),
        };
        state.record_trial(1, 3, record.clone());
        let text = serde_json::to_string(&state).expect("encode");
        let back: ExperimentState = serde_json::from_str(&text).expect("decode");
        assert_eq!(back.trials[&1][&3], record);
        assert_eq!(back.trial_history().len(), 1);
    }
}
