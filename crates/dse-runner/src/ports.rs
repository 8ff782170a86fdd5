//! Capabilities the engine drives but does not implement.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::state::{ExperimentState, PhaseRecord, TrialRecord, Trigger};
use crate::value::ParamValue;

/// What a simulator invocation left behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationOutput {
    /// Exit status of the simulation tool; `None` if it died on a signal or
    /// could not be started.
    pub status: Option<i32>,
    /// Flat statistics report, if one was produced.
    pub report: Option<String>,
}

pub trait SimulatorRunner {
    /// Runs one simulation with `params` and blocks until it finishes.
    fn run(&mut self, params: &BTreeMap<String, ParamValue>) -> Result<SimulationOutput>;
}

/// Everything the oracle sees when asked to revise a plan.
#[derive(Debug, Clone, Serialize)]
pub struct RevisionRequest {
    pub trigger: Trigger,
    pub instruction: String,
    pub plan: Option<String>,
    /// First phase index the oracle may change.
    pub revise_from: usize,
    pub completed_phase: Option<PhaseRecord>,
    pub phase_history: BTreeMap<usize, PhaseRecord>,
    pub trial_log: BTreeMap<usize, BTreeMap<usize, TrialRecord>>,
    pub vars: BTreeMap<String, ParamValue>,
    pub min: BTreeMap<String, ParamValue>,
    pub max: BTreeMap<String, ParamValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRevision {
    pub plan: String,
    pub justification: String,
}

pub trait PlanOracle {
    fn revise(&mut self, request: &RevisionRequest) -> Result<PlanRevision>;
}

pub trait ReportGenerator {
    fn generate(&mut self, state: &ExperimentState) -> Result<String>;
}

/// Oracle stand-in for setups without one; every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOracle;

impl PlanOracle for NoOracle {
    fn revise(&mut self, _request: &RevisionRequest) -> Result<PlanRevision> {
        Err(anyhow::anyhow!("no plan oracle configured"))
    }
}
