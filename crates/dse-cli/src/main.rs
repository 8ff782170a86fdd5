use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dse_runner::{DseConfig, DseError, Experiment, ParamValue, StepOutcome};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dse", version, about = "Phase/trial design-space exploration driver")]
struct Cli {
    /// Configuration file; a missing file means all defaults.
    #[arg(long, global = true, default_value = dse_runner::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a parameter defaults template (if absent) and reset the state.
    Init {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        json: bool,
    },
    /// Restore the live state from the defaults file.
    Reset {
        #[arg(long)]
        json: bool,
    },
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Perform exactly one transition.
    Step {
        #[arg(long)]
        json: bool,
    },
    /// Step until the experiment completes or is not ready.
    Run {
        #[arg(long)]
        max_steps: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    Plan {
        #[command(subcommand)]
        action: PlanCommand,
    },
    /// Set a parameter's global sweep bounds.
    Bounds {
        param: String,
        #[arg(long)]
        min: Option<String>,
        #[arg(long)]
        max: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Enable or disable replanning after each completed phase.
    Replan {
        #[arg(value_enum)]
        mode: Toggle,
        #[arg(long)]
        json: bool,
    },
    History {
        #[arg(long)]
        json: bool,
    },
    /// Print the final report, or a preview if the experiment is unfinished.
    Report {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PlanCommand {
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Install plan text from a file ("-" reads stdin).
    Set {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Ask the plan oracle to generate or revise the plan.
    Modify {
        #[arg(default_value = dse_runner::replan::DEFAULT_USER_REQUEST)]
        message: String,
        #[arg(long)]
        json: bool,
    },
}

const PARAMS_TEMPLATE: &str = r#"{
  "vars": {
    "l1i_size": "32kB",
    "l1i_assoc": 8,
    "l1d_size": "32kB",
    "l1d_assoc": 8,
    "l2_size": "256kB",
    "l2_assoc": 16,
    "DDR_memory_size": "2GB",
    "num_cores": 1
  },
  "min": {
    "l1i_size": "2kB",
    "l1i_assoc": 1,
    "l1d_size": "2kB",
    "l1d_assoc": 1,
    "l2_size": "128kB",
    "l2_assoc": 1,
    "DDR_memory_size": "512MB",
    "num_cores": 1
  },
  "max": {
    "l1i_size": "128kB",
    "l1i_assoc": 16,
    "l1d_size": "128kB",
    "l1d_assoc": 16,
    "l2_size": "4MB",
    "l2_assoc": 32,
    "DDR_memory_size": "8GB",
    "num_cores": 4
  }
}
"#;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(&cli.config, cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let code = err
                    .downcast_ref::<DseError>()
                    .map(DseError::code)
                    .unwrap_or("command_failed");
                emit_json(&json_error(code, format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(config_path: &Path, command: Commands) -> Result<Option<Value>> {
    let config = DseConfig::load(config_path)?;
    let mut exp = dse_runner::experiment_from_config(&config);
    match command {
        Commands::Init { force, json } => {
            let defaults = &config.defaults_path;
            let wrote = force || !defaults.exists();
            if wrote {
                if let Some(parent) = defaults.parent() {
                    dse_runner::fsutil::ensure_dir(parent)?;
                }
                dse_runner::fsutil::atomic_write_bytes(defaults, PARAMS_TEMPLATE.as_bytes())?;
            }
            let state = exp.reset()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "init",
                    "defaults_path": defaults.display().to_string(),
                    "defaults_written": wrote,
                    "state_path": exp.store().path().display().to_string(),
                    "params": state.vars.len()
                })));
            }
            if wrote {
                println!("defaults: {} (written)", defaults.display());
            } else {
                println!("defaults: {} (kept)", defaults.display());
            }
            println!("state: {}", exp.store().path().display());
            println!("params: {}", state.vars.len());
        }
        Commands::Reset { json } => {
            let state = exp.reset()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "reset",
                    "params": state.vars.len()
                })));
            }
            println!("state reset from {}", exp.store().defaults_path().display());
        }
        Commands::Status { json } => {
            let status = exp.status()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "status": serde_json::to_value(&status)?
                })));
            }
            println!("ready: {}", status.ready);
            println!("finished: {}", status.finished);
            println!("plan_phases: {}", status.plan_phases);
            match status.phase_trials {
                Some(n) => println!(
                    "cursor: phase {} trial {}/{}",
                    status.current_phase, status.current_trial, n
                ),
                None => println!("cursor: phase {} (not entered)", status.current_phase),
            }
            println!("dynamic_replan: {}", status.dynamic_replan);
            println!("trials_recorded: {}", status.trials_recorded);
        }
        Commands::Step { json } => {
            let outcome = exp.step()?;
            if outcome == StepOutcome::Complete {
                write_report_file(&config, &exp)?;
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "step",
                    "result": serde_json::to_value(outcome)?
                })));
            }
            print_outcome(&outcome);
        }
        Commands::Run { max_steps, json } => {
            let mut outcomes = Vec::new();
            loop {
                if max_steps.is_some_and(|max| outcomes.len() >= max) {
                    break;
                }
                let outcome = exp.step()?;
                outcomes.push(outcome);
                if !json {
                    print_outcome(&outcome);
                }
                if matches!(outcome, StepOutcome::Complete | StepOutcome::NotReady) {
                    break;
                }
            }
            if outcomes.last() == Some(&StepOutcome::Complete) {
                write_report_file(&config, &exp)?;
            }
            if json {
                let results = outcomes
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "steps": outcomes.len(),
                    "results": results
                })));
            }
            println!("steps: {}", outcomes.len());
        }
        Commands::Plan { action } => return run_plan_command(&mut exp, action),
        Commands::Bounds {
            param,
            min,
            max,
            json,
        } => {
            if min.is_none() && max.is_none() {
                return Err(anyhow::anyhow!("bounds: pass --min and/or --max"));
            }
            let min = min.as_deref().map(ParamValue::coerce);
            let max = max.as_deref().map(ParamValue::coerce);
            exp.set_bounds(&param, min, max)?;
            let state = exp.state()?;
            let (lo, hi) = (state.min.get(&param), state.max.get(&param));
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "bounds",
                    "param": param,
                    "min": lo,
                    "max": hi,
                    "sweepable": state.is_sweepable(&param)
                })));
            }
            println!("{}: min={} max={}", param, display_opt(lo), display_opt(hi));
        }
        Commands::Replan { mode, json } => {
            let enabled = matches!(mode, Toggle::On);
            exp.set_dynamic_replan(enabled)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "replan",
                    "dynamic_replan": enabled
                })));
            }
            println!("dynamic_replan: {}", enabled);
        }
        Commands::History { json } => {
            let state = exp.state()?;
            let history = state.trial_history();
            if json {
                let rows: Vec<Value> = history
                    .iter()
                    .map(|(phase, trial, record)| {
                        json!({
                            "phase": phase,
                            "trial": trial,
                            "applied": record.applied.iter().cloned().collect::<std::collections::BTreeMap<_, _>>(),
                            "result": record.result,
                            "exit_status": record.exit_status,
                            "recorded_at": record.recorded_at
                        })
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "history",
                    "trials": rows
                })));
            }
            for (phase, trial, record) in history {
                let applied = record
                    .applied
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(",");
                println!(
                    "{}.{}\t{}\tsim_seconds={}\tmemory={}\tinst_rate={}",
                    phase,
                    trial,
                    applied,
                    record.result.sim_seconds,
                    record.result.memory_bytes_used,
                    record.result.instruction_rate
                );
            }
        }
        Commands::Report { json } => {
            let state = exp.state()?;
            let (text, final_report) = match &state.final_report {
                Some(report) => (report.clone(), true),
                None => (dse_runner::report::render(&state), false),
            };
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "report",
                    "final": final_report,
                    "report": text
                })));
            }
            print!("{}", text);
        }
    }
    Ok(None)
}

fn run_plan_command(exp: &mut Experiment, action: PlanCommand) -> Result<Option<Value>> {
    match action {
        PlanCommand::Show { json } => {
            let state = exp.state()?;
            let plan = state.plan.unwrap_or_default();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plan show",
                    "plan": plan,
                    "user_modifications": state.user_modifications,
                    "justifications": state.justifications
                })));
            }
            if plan.trim().is_empty() {
                println!("no plan installed");
            } else {
                print!("{}", plan);
            }
        }
        PlanCommand::Set { file, json } => {
            let text = if file.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin())?
            } else {
                std::fs::read_to_string(&file)?
            };
            let canonical = exp.install_plan(&text)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plan set",
                    "plan": canonical
                })));
            }
            print!("{}", canonical);
        }
        PlanCommand::Modify { message, json } => {
            let revision = exp.modify_plan(&message)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plan modify",
                    "plan": revision.plan,
                    "justification": revision.justification
                })));
            }
            print!("{}", revision.plan);
            println!("justification: {}", revision.justification);
        }
    }
    Ok(None)
}

fn write_report_file(config: &DseConfig, exp: &Experiment) -> Result<()> {
    let Some(path) = &config.report_path else {
        return Ok(());
    };
    if let Some(report) = exp.state()?.final_report {
        if let Some(parent) = path.parent() {
            dse_runner::fsutil::ensure_dir(parent)?;
        }
        dse_runner::fsutil::atomic_write_bytes(path, report.as_bytes())?;
        tracing::info!(path = %path.display(), "final report written");
    }
    Ok(())
}

fn print_outcome(outcome: &StepOutcome) {
    match outcome {
        StepOutcome::NotReady => println!("not_ready: no plan installed"),
        StepOutcome::Continue => println!("continue"),
        StepOutcome::TrialResult(r) => println!(
            "trial_result: sim_seconds={} memory={} inst_rate={}",
            r.sim_seconds, r.memory_bytes_used, r.instruction_rate
        ),
        StepOutcome::Complete => println!("complete"),
    }
}

fn display_opt(value: Option<&ParamValue>) -> String {
    value.map(ToString::to_string).unwrap_or_else(|| "-".to_string())
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Init { json, .. }
        | Commands::Reset { json }
        | Commands::Status { json }
        | Commands::Step { json }
        | Commands::Run { json, .. }
        | Commands::Bounds { json, .. }
        | Commands::Replan { json, .. }
        | Commands::History { json }
        | Commands::Report { json } => *json,
        Commands::Plan { action } => match action {
            PlanCommand::Show { json }
            | PlanCommand::Set { json, .. }
            | PlanCommand::Modify { json, .. } => *json,
        },
    }
}
