//! The phase/trial state machine.
//!
//! Every call to [`Experiment::step`] loads the persisted state, performs at
//! most one transition, writes the state back atomically and returns. A step
//! that fails leaves the stored document as it was before the failing
//! transition, so calling `step` again retries the same transition.

use serde::Serialize;
use std::cmp::Ordering;
use tracing::{info, warn};

use crate::error::{DseError, Result};
use crate::fsutil::{now_rfc3339, sha256_hex};
use crate::interp::phase_values;
use crate::plan::Plan;
use crate::ports::{PlanOracle, PlanRevision, ReportGenerator, SimulatorRunner};
use crate::replan;
use crate::state::{ExperimentState, PhaseRecord, TrialRecord, TrialResult, Trigger};
use crate::stats::extract_result;
use crate::store::StateStore;
use crate::value::ParamValue;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// No plan installed; nothing changed.
    NotReady,
    /// A phase was entered or completed; no trial ran.
    Continue,
    TrialResult(TrialResult),
    /// Every phase has run and the final report exists.
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentStatus {
    pub ready: bool,
    pub finished: bool,
    pub plan_phases: usize,
    pub current_phase: usize,
    pub current_trial: usize,
    pub phase_trials: Option<usize>,
    pub dynamic_replan: bool,
    pub trials_recorded: usize,
}

pub struct Experiment {
    store: StateStore,
    simulator: Box<dyn SimulatorRunner>,
    oracle: Box<dyn PlanOracle>,
    reporter: Box<dyn ReportGenerator>,
}

impl Experiment {
    pub fn new(
        store: StateStore,
        simulator: Box<dyn SimulatorRunner>,
        oracle: Box<dyn PlanOracle>,
        reporter: Box<dyn ReportGenerator>,
    ) -> Self {
        Self {
            store,
            simulator,
            oracle,
            reporter,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn state(&self) -> Result<ExperimentState> {
        self.store.load()
    }

    /// Performs exactly one transition.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let state = self.store.load()?;
        let plan_text = match state.plan.as_deref() {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => {
                info!("no plan installed; experiment not ready");
                return Ok(StepOutcome::NotReady);
            }
        };
        let plan = Plan::parse(&plan_text)?;
        let index = state.cursor.current_phase;

        if let Some(record) = state.phases.get(&index).cloned() {
            if state.cursor.current_trial < record.num_trials {
                return self.run_trial(state, index, &record);
            }
            return self.complete_phase(state, index, record);
        }

        match index.cmp(&plan.len()) {
            Ordering::Less => self.enter_phase(state, index, &plan, &plan_text),
            _ if state.final_report.is_none() => self.finish(state, index),
            _ => Ok(StepOutcome::Complete),
        }
    }

    fn enter_phase(
        &mut self,
        mut state: ExperimentState,
        index: usize,
        plan: &Plan,
        plan_text: &str,
    ) -> Result<StepOutcome> {
        let phase = &plan.phases[index];
        for name in &phase.params_changed {
            if !state.vars.contains_key(name) {
                return Err(DseError::UnknownParameter(name.clone()));
            }
        }
        let record = PhaseRecord::from_phase(
            phase,
            sha256_hex(plan_text.as_bytes()),
            now_rfc3339(),
        );
        info!(
            phase = index,
            goal = %record.goal,
            params = ?record.params_changed,
            trials = record.num_trials,
            "entering phase"
        );
        state.phases.insert(index, record);
        state.cursor.current_trial = 0;
        state.final_report = None;
        self.store.save(&state)?;
        Ok(StepOutcome::Continue)
    }

    fn run_trial(
        &mut self,
        mut state: ExperimentState,
        index: usize,
        record: &PhaseRecord,
    ) -> Result<StepOutcome> {
        let trial = state.cursor.current_trial;
        let values = phase_values(&record.as_phase(), trial)?;
        for (name, value) in &values {
            match state.vars.get_mut(name) {
                Some(slot) => *slot = value.clone(),
                None => return Err(DseError::UnknownParameter(name.clone())),
            }
        }
        self.store.save(&state)?;

        let output = self.simulator.run(&state.vars).map_err(DseError::Simulator)?;
        if output.status != Some(0) {
            let failure = DseError::tool_failure("simulator", output.status);
            warn!(phase = index, trial, error = %failure, "continuing to stats extraction");
        }
        let result = extract_result(output.report.as_deref())?;

        info!(
            phase = index,
            trial,
            applied = %format_applied(&values),
            sim_seconds = result.sim_seconds,
            memory_bytes = result.memory_bytes_used,
            inst_rate = result.instruction_rate,
            "trial recorded"
        );
        state.record_trial(
            index,
            trial,
            TrialRecord {
                applied: values,
                result,
                exit_status: output.status,
                recorded_at: now_rfc3339(),
            },
        );
        state.cursor.current_trial += 1;
        self.store.save(&state)?;
        Ok(StepOutcome::TrialResult(result))
    }

    fn complete_phase(
        &mut self,
        mut state: ExperimentState,
        index: usize,
        mut record: PhaseRecord,
    ) -> Result<StepOutcome> {
        if state.cursor.dynamic_replan {
            let request = replan::phase_review_request(&state, index, &record);
            let revision = replan::request_revision(self.oracle.as_mut(), &state, &request)?;
            replan::apply_revision(&mut state, Trigger::Auto, &revision);
            record.branch_decision = Some(revision.justification);
        }
        record.completed_at = Some(now_rfc3339());
        info!(
            phase = index,
            branch = record.branch_decision.as_deref().unwrap_or("-"),
            "phase complete"
        );
        state.phases.insert(index, record);
        state.cursor.current_phase = index + 1;
        state.cursor.current_trial = 0;
        self.store.save(&state)?;
        Ok(StepOutcome::Continue)
    }

    fn finish(&mut self, mut state: ExperimentState, index: usize) -> Result<StepOutcome> {
        let report = self.reporter.generate(&state).map_err(DseError::Report)?;
        state.final_report = Some(report);
        state.cursor.current_phase = index + 1;
        state.cursor.current_trial = 0;
        self.store.save(&state)?;
        info!(
            phases = state.phases.len(),
            trials = state.trial_count(),
            "all phases complete; final report generated"
        );
        Ok(StepOutcome::Complete)
    }

    /// Sends a user's modification request to the oracle and installs the
    /// plan it returns.
    pub fn modify_plan(&mut self, message: &str) -> Result<PlanRevision> {
        let mut state = self.store.load()?;
        let request = replan::user_request(&state, message);
        let revision = replan::request_revision(self.oracle.as_mut(), &state, &request)?;
        state.user_modifications.push(request.instruction.clone());
        replan::apply_revision(&mut state, Trigger::User, &revision);
        state.reopen_if_finished();
        self.store.save(&state)?;
        Ok(revision)
    }

    /// Installs plan text supplied directly. Returns the canonical text.
    pub fn install_plan(&mut self, text: &str) -> Result<String> {
        let mut state = self.store.load()?;
        let plan = state.validate_plan_text(text)?;
        let canonical = plan.to_text();
        state.plan = Some(canonical.clone());
        state.reopen_if_finished();
        self.store.save(&state)?;
        info!(phases = plan.len(), "plan installed");
        Ok(canonical)
    }

    pub fn set_dynamic_replan(&mut self, enabled: bool) -> Result<()> {
        let mut state = self.store.load()?;
        state.cursor.dynamic_replan = enabled;
        self.store.save(&state)?;
        info!(enabled, "dynamic replanning toggled");
        Ok(())
    }

    pub fn set_bounds(
        &mut self,
        name: &str,
        min: Option<ParamValue>,
        max: Option<ParamValue>,
    ) -> Result<()> {
        let mut state = self.store.load()?;
        state.set_bounds(name, min, max)?;
        self.store.save(&state)
    }

    pub fn reset(&mut self) -> Result<ExperimentState> {
        self.store.reset()
    }

    pub fn status(&self) -> Result<ExperimentStatus> {
        let state = self.store.load()?;
        let plan = state.parsed_plan()?;
        let cursor = &state.cursor;
        Ok(ExperimentStatus {
            ready: plan.as_ref().map(|p| !p.is_empty()).unwrap_or(false),
            finished: state.is_finished(),
            plan_phases: plan.as_ref().map(Plan::len).unwrap_or(0),
            current_phase: cursor.current_phase,
            current_trial: cursor.current_trial,
            phase_trials: state.phases.get(&cursor.current_phase).map(|r| r.num_trials),
            dynamic_replan: cursor.dynamic_replan,
            trials_recorded: state.trial_count(),
        })
    }
}

fn format_applied(values: &[(String, ParamValue)]) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
