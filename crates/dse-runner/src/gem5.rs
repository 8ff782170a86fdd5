//! Simulator runner that drives gem5 as a subprocess.

use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::config::SimulatorConfig;
use crate::error::DseError;
use crate::fsutil::atomic_write_json_pretty;
use crate::ports::{SimulationOutput, SimulatorRunner};
use crate::value::ParamValue;

pub struct Gem5Runner {
    config: SimulatorConfig,
    compiled: bool,
}

impl Gem5Runner {
    pub fn new(config: SimulatorConfig) -> Self {
        let compiled = config.compile.is_empty();
        Self { config, compiled }
    }

    fn params_path(&self) -> PathBuf {
        self.config.workdir.join(&self.config.params_path)
    }

    fn stats_path(&self) -> PathBuf {
        self.config.workdir.join(&self.config.stats_path)
    }

    fn compile_workload(&mut self) {
        if self.compiled {
            return;
        }
        match run_tool(&self.config.compile, &self.config.compile_dir) {
            Some(0) => {
                info!(command = ?self.config.compile, "workload compiled");
                self.compiled = true;
            }
            status => {
                let failure = DseError::tool_failure("compile", status);
                warn!(error = %failure, "external tool failure");
            }
        }
    }
}

impl SimulatorRunner for Gem5Runner {
    fn run(&mut self, params: &BTreeMap<String, ParamValue>) -> Result<SimulationOutput> {
        if self.config.command.is_empty() {
            return Err(anyhow!("simulator command is empty"));
        }
        atomic_write_json_pretty(&self.params_path(), &json!({ "vars": params }))?;
        self.compile_workload();

        let stats_path = self.stats_path();
        if stats_path.exists() {
            fs::remove_file(&stats_path)?;
        }
        // Non-zero exits are reported by the caller, which sees `status`.
        let status = run_tool(&self.config.command, &self.config.workdir);
        let report = match fs::read_to_string(&stats_path) {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(path = %stats_path.display(), error = %e, "no statistics report");
                None
            }
        };
        Ok(SimulationOutput { status, report })
    }
}

/// Runs `command` in `dir`, returning its exit code. `None` means it could not
/// be started or was killed by a signal.
fn run_tool(command: &[String], dir: &Path) -> Option<i32> {
    let (program, args) = command.split_first()?;
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();
    match output {
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if let Some(tail) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                debug!(program = %program, stderr_tail = %tail, "tool stderr");
            }
            debug!(
                program = %program,
                stdout_bytes = output.stdout.len(),
                "tool finished"
            );
            output.status.code()
        }
        Err(e) => {
            debug!(program = %program, dir = %dir.display(), error = %e, "failed to start tool");
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::fsutil::scratch_dir;

    fn config(dir: &Path, command: &[&str]) -> SimulatorConfig {
        SimulatorConfig {
            workdir: dir.to_path_buf(),
            compile: Vec::new(),
            compile_dir: dir.to_path_buf(),
            command: command.iter().map(|s| s.to_string()).collect(),
            params_path: PathBuf::from("cfg/params.json"),
            stats_path: PathBuf::from("m5out/stats.txt"),
        }
    }

    #[test]
    fn writes_params_and_reads_stats() {
        let dir = scratch_dir("gem5_ok");
        let script = "mkdir -p m5out && grep -c l1d_size cfg/params.json > m5out/stats.txt";
        let mut runner = Gem5Runner::new(config(&dir, &["sh", "-c", script]));
        let mut params = BTreeMap::new();
        params.insert("l1d_size".to_string(), ParamValue::coerce("4kB"));
        let out = runner.run(&params).expect("run");
        assert_eq!(out.status, Some(0));
        assert_eq!(out.report.as_deref().map(str::trim), Some("1"));
        let written: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.join("cfg/params.json")).expect("params"))
                .expect("json");
        assert_eq!(written["vars"]["l1d_size"], "4kB");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn stale_stats_are_not_reused_and_failures_are_not_fatal() {
        let dir = scratch_dir("gem5_fail");
        fs::create_dir_all(dir.join("m5out")).expect("m5out");
        fs::write(dir.join("m5out/stats.txt"), "stale").expect("stale");
        let mut runner = Gem5Runner::new(config(&dir, &["sh", "-c", "exit 7"]));
        let out = runner.run(&BTreeMap::new()).expect("run");
        assert_eq!(out.status, Some(7));
        assert_eq!(out.report, None);

        let mut missing = Gem5Runner::new(config(&dir, &["/nonexistent/dse-sim"]));
        let out = missing.run(&BTreeMap::new()).expect("run");
        assert_eq!(out.status, None);
        assert_eq!(out.report, None);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn compile_step_runs_once_after_success() {
        let dir = scratch_dir("gem5_compile");
        let mut cfg = config(&dir, &["true"]);
        cfg.compile = vec!["sh".into(), "-c".into(), "echo x >> builds.log".into()];
        let mut runner = Gem5Runner::new(cfg);
        runner.run(&BTreeMap::new()).expect("first");
        runner.run(&BTreeMap::new()).expect("second");
        let log = fs::read_to_string(dir.join("builds.log")).expect("log");
        assert_eq!(log.lines().count(), 1);
        let _ = fs::remove_dir_all(dir);
    }
}
