//! Phase/trial orchestration for simulator-driven design-space exploration.
//!
//! A plan of phases, each sweeping one to three parameters over a range for
//! a fixed number of trials, is executed one externally requested step at a
//! time against a durable state document. Simulation, plan revision and
//! reporting are reached through the traits in [`ports`].

pub mod config;
pub mod error;
pub mod fsutil;
pub mod gem5;
pub mod interp;
pub mod machine;
pub mod oracle;
pub mod plan;
pub mod ports;
pub mod replan;
pub mod report;
pub mod state;
pub mod stats;
pub mod store;
pub mod value;

pub use config::{DseConfig, OracleConfig, SimulatorConfig, DEFAULT_CONFIG_FILE};
pub use error::{DseError, Result};
pub use gem5::Gem5Runner;
pub use interp::{interpolate, phase_values};
pub use machine::{Experiment, ExperimentStatus, StepOutcome};
pub use oracle::GeminiOracle;
pub use plan::{Phase, Plan};
pub use ports::{
    NoOracle, PlanOracle, PlanRevision, ReportGenerator, RevisionRequest, SimulationOutput,
    SimulatorRunner,
};
pub use report::TextReport;
pub use state::{
    ExperimentCursor, ExperimentState, JustificationLog, PhaseRecord, TrialRecord, TrialResult,
    Trigger,
};
pub use store::StateStore;
pub use value::{ParamValue, Quantity};

/// Builds an experiment wired to the gem5 runner, the configured oracle (if
/// any) and the text report.
pub fn experiment_from_config(config: &DseConfig) -> Experiment {
    let store = StateStore::new(&config.state_path, &config.defaults_path);
    let oracle: Box<dyn PlanOracle> = match &config.oracle {
        Some(oracle) => match GeminiOracle::from_config(oracle) {
            Ok(client) => Box::new(client),
            Err(e) => {
                tracing::warn!(error = %e, "plan oracle unavailable; revisions will fail");
                Box::new(NoOracle)
            }
        },
        None => Box::new(NoOracle),
    };
    Experiment::new(
        store,
        Box::new(Gem5Runner::new(config.simulator.clone())),
        oracle,
        Box::new(TextReport),
    )
}
