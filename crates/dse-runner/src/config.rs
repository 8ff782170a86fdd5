use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{DseError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "dse.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DseConfig {
    pub state_path: PathBuf,
    pub defaults_path: PathBuf,
    pub simulator: SimulatorConfig,
    pub oracle: Option<OracleConfig>,
    pub report_path: Option<PathBuf>,
}

impl Default for DseConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(".dse/state.json"),
            defaults_path: PathBuf::from("params.json"),
            simulator: SimulatorConfig::default(),
            oracle: None,
            report_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Directory the simulator runs in; the params and stats paths are
    /// relative to it.
    pub workdir: PathBuf,
    /// Workload build step, run once per session before the first simulation.
    pub compile: Vec<String>,
    pub compile_dir: PathBuf,
    pub command: Vec<String>,
    pub params_path: PathBuf,
    pub stats_path: PathBuf,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("/gem5"),
            compile: [
                "aarch64-linux-gnu-gcc",
                "uarch_stressor.c",
                "-static",
                "-o",
                "microbench.arm",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            compile_dir: PathBuf::from("."),
            command: [
                "build/ARM/gem5.opt",
                "configs/example/gem5_library/archai/uarch_spec.py",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            params_path: PathBuf::from("configs/example/gem5_library/archai/params.json"),
            stats_path: PathBuf::from("m5out/stats.txt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 120,
        }
    }
}

impl DseConfig {
    /// Reads `path`; a missing file yields the defaults. Relative paths are
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(raw) => serde_yaml::from_str::<DseConfig>(&raw)
                .map_err(|e| DseError::Config(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => DseConfig::default(),
            Err(e) => return Err(e.into()),
        };
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        config.resolve_relative(base);
        Ok(config)
    }

    fn resolve_relative(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.state_path);
        resolve(&mut self.defaults_path);
        resolve(&mut self.simulator.workdir);
        resolve(&mut self.simulator.compile_dir);
        if let Some(report) = self.report_path.as_mut() {
            resolve(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::scratch_dir;

    #[test]
    fn missing_file_yields_defaults_rooted_at_config_dir() {
        let dir = scratch_dir("cfg_missing");
        let config = DseConfig::load(&dir.join("dse.yaml")).expect("defaults");
        assert_eq!(config.state_path, dir.join(".dse/state.json"));
        assert_eq!(config.simulator.workdir, PathBuf::from("/gem5"));
        assert!(config.oracle.is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn partial_yaml_overrides_selected_fields() {
        let dir = scratch_dir("cfg_partial");
        let path = dir.join("dse.yaml");
        fs::write(
            &path,
            "defaults_path: defaults/params.json\nsimulator:\n  workdir: sim\n  compile: []\n  command: [\"./fake-sim\"]\noracle:\n  model: test-model\n",
        )
        .expect("write");
        let config = DseConfig::load(&path).expect("config");
        assert_eq!(config.defaults_path, dir.join("defaults/params.json"));
        assert_eq!(config.simulator.workdir, dir.join("sim"));
        assert!(config.simulator.compile.is_empty());
        assert_eq!(config.simulator.stats_path, PathBuf::from("m5out/stats.txt"));
        let oracle = config.oracle.expect("oracle");
        assert_eq!(oracle.model, "test-model");
        assert_eq!(oracle.api_key_env, "GEMINI_API_KEY");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        let dir = scratch_dir("cfg_bad");
        let path = dir.join("dse.yaml");
        fs::write(&path, "simulator: [unclosed").expect("write");
        assert!(matches!(DseConfig::load(&path), Err(DseError::Config(_))));
        let _ = fs::remove_dir_all(dir);
    }
}
