//! Plan revision through the oracle, either after a phase completes or on a
//! user's request.

use tracing::info;

use crate::error::{DseError, Result};
use crate::ports::{PlanOracle, PlanRevision, RevisionRequest};
use crate::state::{ExperimentState, PhaseRecord, Trigger};

pub const DEFAULT_USER_REQUEST: &str = "Generate";

pub fn phase_review_instruction(index: usize, record: &PhaseRecord) -> String {
    format!(
        "Phase {index} has finished all {trials} trial(s). Its goal was: \"{goal}\". \
         Its hypothesis was: \"{hyp}\". Using the trial log, judge whether the hypothesis held. \
         If it held, return the plan unchanged. If it did not, revise phases {next} onward; \
         phases 0 through {index} have already run and must be kept as they are. \
         Reply with the full plan in the same line grammar and a short justification.",
        index = index,
        trials = record.num_trials,
        goal = record.goal,
        hyp = record.hypothesis,
        next = index + 1,
    )
}

fn base_request(
    state: &ExperimentState,
    trigger: Trigger,
    instruction: String,
    revise_from: usize,
) -> RevisionRequest {
    RevisionRequest {
        trigger,
        instruction,
        plan: state.plan.clone(),
        revise_from,
        completed_phase: None,
        phase_history: state.phases.clone(),
        trial_log: state.trials.clone(),
        vars: state.vars.clone(),
        min: state.min.clone(),
        max: state.max.clone(),
    }
}

/// Request built when phase `index` has exhausted its trials.
pub fn phase_review_request(
    state: &ExperimentState,
    index: usize,
    record: &PhaseRecord,
) -> RevisionRequest {
    let mut request = base_request(
        state,
        Trigger::Auto,
        phase_review_instruction(index, record),
        index + 1,
    );
    request.completed_phase = Some(record.clone());
    request
}

/// Request built from a user's free-text modification. Phases that have
/// already been entered are off limits.
pub fn user_request(state: &ExperimentState, message: &str) -> RevisionRequest {
    let message = message.trim();
    let instruction = if message.is_empty() {
        DEFAULT_USER_REQUEST.to_string()
    } else {
        message.to_string()
    };
    let cursor = &state.cursor;
    let revise_from = if state.phases.contains_key(&cursor.current_phase) {
        cursor.current_phase + 1
    } else {
        cursor.current_phase
    };
    base_request(state, Trigger::User, instruction, revise_from)
}

/// Asks the oracle and validates its plan against the parameter store.
/// The returned revision carries the plan in canonical form.
pub fn request_revision(
    oracle: &mut dyn PlanOracle,
    state: &ExperimentState,
    request: &RevisionRequest,
) -> Result<PlanRevision> {
    let revision = oracle.revise(request).map_err(DseError::Oracle)?;
    let plan = state.validate_plan_text(&revision.plan)?;
    Ok(PlanRevision {
        plan: plan.to_text(),
        justification: revision.justification.trim().to_string(),
    })
}

/// Installs a validated revision into `state`.
pub fn apply_revision(state: &mut ExperimentState, trigger: Trigger, revision: &PlanRevision) {
    let changed = state.plan.as_deref() != Some(revision.plan.as_str());
    state.plan = Some(revision.plan.clone());
    let stored = state.justifications.push(trigger, &revision.justification);
    info!(
        ?trigger,
        plan_changed = changed,
        justification_stored = stored,
        "plan revision applied"
    );
}
