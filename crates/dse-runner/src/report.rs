use anyhow::Result;
use std::fmt::Write as _;

use crate::ports::ReportGenerator;
use crate::state::{ExperimentState, TrialRecord};

/// Plain-text summary: one section per executed phase with its best trial by
/// instruction rate, followed by the user modification and justification
/// logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextReport;

impl ReportGenerator for TextReport {
    fn generate(&mut self, state: &ExperimentState) -> Result<String> {
        Ok(render(state))
    }
}

fn best_trial<'a>(
    trials: impl Iterator<Item = (&'a usize, &'a TrialRecord)>,
) -> Option<(usize, &'a TrialRecord)> {
    trials
        .max_by(|a, b| {
            a.1.result
                .instruction_rate
                .total_cmp(&b.1.result.instruction_rate)
        })
        .map(|(t, r)| (*t, r))
}

pub fn render(state: &ExperimentState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Design-space exploration report");
    let _ = writeln!(
        out,
        "phases run: {}  trials run: {}",
        state.phases.len(),
        state.trial_count()
    );
    for (index, phase) in &state.phases {
        let _ = writeln!(out);
        let _ = writeln!(out, "Phase {}: {}", index, phase.goal);
        let _ = writeln!(out, "  hypothesis: {}", phase.hypothesis);
        for (name, (lo, hi)) in phase.params_changed.iter().zip(&phase.param_ranges) {
            let _ = writeln!(out, "  sweep: {} {} -> {}", name, lo, hi);
        }
        let trials = state.trials.get(index);
        let _ = writeln!(
            out,
            "  trials: {}/{}",
            trials.map(|t| t.len()).unwrap_or(0),
            phase.num_trials
        );
        if let Some((t, best)) = trials.and_then(|t| best_trial(t.iter())) {
            let applied = best
                .applied
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "  best: trial {} ({}) inst_rate={} sim_seconds={} memory_bytes={}",
                t,
                applied,
                best.result.instruction_rate,
                best.result.sim_seconds,
                best.result.memory_bytes_used
            );
        }
        if let Some(decision) = &phase.branch_decision {
            let _ = writeln!(out, "  decision: {}", decision);
        }
    }
    write_log(&mut out, "User modifications", &state.user_modifications);
    write_log(&mut out, "Plan justifications (user)", &state.justifications.user);
    write_log(&mut out, "Plan justifications (auto)", &state.justifications.auto);
    out
}

fn write_log(out: &mut String, title: &str, entries: &[String]) {
    if entries.is_empty() {
        return;
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}:", title);
    for entry in entries {
        let _ = writeln!(out, "  - {}", entry);
    }
}
