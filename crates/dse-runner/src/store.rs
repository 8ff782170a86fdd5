use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{DseError, Result};
use crate::fsutil::atomic_write_json_pretty;
use crate::state::ExperimentState;

/// File-backed experiment state with a separate default snapshot.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    defaults_path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, defaults_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            defaults_path: defaults_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defaults_path(&self) -> &Path {
        &self.defaults_path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<ExperimentState> {
        read_state(&self.path)
    }

    /// Overwrites the whole document atomically.
    pub fn save(&self, state: &ExperimentState) -> Result<()> {
        atomic_write_json_pretty(&self.path, state)?;
        debug!(
            path = %self.path.display(),
            phase = state.cursor.current_phase,
            trial = state.cursor.current_trial,
            "persisted experiment state"
        );
        Ok(())
    }

    /// Replaces the live document with the default snapshot.
    pub fn reset(&self) -> Result<ExperimentState> {
        let state = read_state(&self.defaults_path)?;
        self.save(&state)?;
        info!(
            defaults = %self.defaults_path.display(),
            params = state.vars.len(),
            "experiment state reset to defaults"
        );
        Ok(state)
    }
}

fn read_state(path: &Path) -> Result<ExperimentState> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(DseError::NotInitialized(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::scratch_dir;
    use crate::value::ParamValue;

    #[test]
    fn load_before_init_reports_not_initialized() {
        let dir = scratch_dir("store_missing");
        let store = StateStore::new(dir.join("state.json"), dir.join("params.json"));
        assert!(matches!(store.load(), Err(DseError::NotInitialized(_))));
        assert!(matches!(store.reset(), Err(DseError::NotInitialized(_))));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn reset_replaces_everything_from_defaults() {
        let dir = scratch_dir("store_reset");
        let defaults = dir.join("params.json");
        fs::write(
            &defaults,
            r#"{"vars": {"num_cores": 1}, "min": {"num_cores": 1}, "max": {"num_cores": 4}}"#,
        )
        .expect("defaults");
        let store = StateStore::new(dir.join(".dse").join("state.json"), &defaults);

        let mut state = store.reset().expect("reset");
        state.plan = Some("0 \"g\" \"h\" 1 \"num_cores\" \"1\" \"4\" 3\n".into());
        state.cursor.current_phase = 2;
        state.vars.insert("num_cores".into(), ParamValue::Int(3));
        store.save(&state).expect("save");
        assert_eq!(store.load().expect("load"), state);

        let fresh = store.reset().expect("reset again");
        assert_eq!(fresh.plan, None);
        assert_eq!(fresh.cursor.current_phase, 0);
        assert_eq!(fresh.vars.get("num_cores"), Some(&ParamValue::Int(1)));
        assert_eq!(store.load().expect("load"), fresh);
        let _ = fs::remove_dir_all(dir);
    }
}
