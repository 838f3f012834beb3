use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use warden_core::write_text_atomic;

const ENGINE_STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    schema_version: u32,
    /// Sorted PagerDuty user ids last written to the on-call group.
    #[serde(default)]
    pub on_call_list: Vec<String>,
    /// Unix seconds of the last long-maintenance announcement.
    #[serde(default)]
    pub last_maintenance_warning_time: u64,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: ENGINE_STATE_SCHEMA_VERSION,
            on_call_list: Vec::new(),
            last_maintenance_warning_time: 0,
        }
    }
}

/// Owns [`PersistedState`] and its file. Setters report whether anything
/// changed; callers save right after a change.
pub struct EngineStateStore {
    path: PathBuf,
    state: PersistedState,
}

impl EngineStateStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read state file {}", path.display()))?;
            serde_json::from_str::<PersistedState>(&raw)
                .with_context(|| format!("failed to parse state file {}", path.display()))?
        } else {
            PersistedState::default()
        };

        if state.schema_version != ENGINE_STATE_SCHEMA_VERSION {
            bail!(
                "unsupported engine state schema: expected {}, found {}",
                ENGINE_STATE_SCHEMA_VERSION,
                state.schema_version
            );
        }
        Ok(Self { path, state })
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn on_call_list(&self) -> &[String] {
        &self.state.on_call_list
    }

    pub fn replace_on_call_list(&mut self, sorted_ids: Vec<String>) -> bool {
        if self.state.on_call_list == sorted_ids {
            return false;
        }
        self.state.on_call_list = sorted_ids;
        true
    }

    pub fn last_maintenance_warning_time(&self) -> u64 {
        self.state.last_maintenance_warning_time
    }

    pub fn set_last_maintenance_warning_time(&mut self, unix_seconds: u64) -> bool {
        if self.state.last_maintenance_warning_time == unix_seconds {
            return false;
        }
        self.state.last_maintenance_warning_time = unix_seconds;
        true
    }

    pub fn save(&self) -> Result<()> {
        let mut payload =
            serde_json::to_string_pretty(&self.state).context("failed to serialize state")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write state file {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let temp = tempdir().expect("tempdir");
        let store = EngineStateStore::load(temp.path().join("state.json")).expect("load");
        assert!(store.on_call_list().is_empty());
        assert_eq!(store.last_maintenance_warning_time(), 0);
    }

    #[test]
    fn saved_fields_survive_reload() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let mut store = EngineStateStore::load(path.clone()).expect("load");
        assert!(store.replace_on_call_list(vec!["P1".to_string(), "P2".to_string()]));
        assert!(!store.replace_on_call_list(vec!["P1".to_string(), "P2".to_string()]));
        assert!(store.set_last_maintenance_warning_time(1_700_000_000));
        store.save().expect("save");

        let reloaded = EngineStateStore::load(path).expect("reload");
        assert_eq!(reloaded.on_call_list(), ["P1", "P2"]);
        assert_eq!(reloaded.last_maintenance_warning_time(), 1_700_000_000);
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        std::fs::write(&path, "{\"schema_version\": 2}").expect("write");
        let error = EngineStateStore::load(path).err().expect("schema error");
        assert!(error.to_string().contains("unsupported engine state schema"));
    }
}
