//! Per-user preference storage: PagerDuty tokens and user ids keyed by chat
//! user id.

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::SystemTime,
};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_core::write_text_atomic;

const PREFERENCES_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagerduty_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagerduty_user_id: Option<String>,
}

/// Key/value store holding [`UserPreferences`].
///
/// Writers other than [`crate::IdentityMap`] would bypass identity
/// invalidation, so the map owns the only write path used by the crate.
pub trait PreferenceStore: Send + Sync {
    fn all_users(&self) -> Result<Vec<UserPreferences>>;
    fn get(&self, username: &str) -> Result<Option<UserPreferences>>;
    fn put(&self, preferences: UserPreferences) -> Result<()>;

    /// Picks up writes made outside this handle, such as `warden register`
    /// running in another process. Returns true when the contents changed.
    fn refresh(&self) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreferencesFile {
    schema_version: u32,
    #[serde(default)]
    users: BTreeMap<String, UserPreferences>,
}

impl Default for PreferencesFile {
    fn default() -> Self {
        Self {
            schema_version: PREFERENCES_SCHEMA_VERSION,
            users: BTreeMap::new(),
        }
    }
}

/// Modification time and length of the file a [`LoadedPreferences`] was read
/// from; `None` while the file does not exist.
type FileStamp = Option<(SystemTime, u64)>;

struct LoadedPreferences {
    file: PreferencesFile,
    stamp: FileStamp,
}

/// JSON-file backed [`PreferenceStore`]. The file is shared with other
/// processes and is reloaded whenever its stamp moves.
pub struct FilePreferenceStore {
    path: PathBuf,
    contents: Mutex<LoadedPreferences>,
}

fn file_stamp(path: &Path) -> Result<FileStamp> {
    match std::fs::metadata(path) {
        Ok(metadata) => {
            let modified = metadata
                .modified()
                .with_context(|| format!("failed to stat preferences file {}", path.display()))?;
            Ok(Some((modified, metadata.len())))
        }
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error)
            .with_context(|| format!("failed to stat preferences file {}", path.display())),
    }
}

fn read_preferences(path: &Path) -> Result<LoadedPreferences> {
    let stamp = file_stamp(path)?;
    let file = if stamp.is_some() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read preferences file {}", path.display()))?;
        serde_json::from_str::<PreferencesFile>(&raw)
            .with_context(|| format!("failed to parse preferences file {}", path.display()))?
    } else {
        PreferencesFile::default()
    };
    if file.schema_version != PREFERENCES_SCHEMA_VERSION {
        bail!(
            "unsupported preferences schema: expected {}, found {}",
            PREFERENCES_SCHEMA_VERSION,
            file.schema_version
        );
    }
    Ok(LoadedPreferences { file, stamp })
}

impl FilePreferenceStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let loaded = read_preferences(&path)?;
        Ok(Self {
            path,
            contents: Mutex::new(loaded),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, LoadedPreferences>> {
        self.contents
            .lock()
            .map_err(|_| anyhow!("preferences mutex is poisoned"))
    }

    /// Reloads `loaded` when the file on disk no longer matches its stamp.
    fn reload_if_stale(&self, loaded: &mut LoadedPreferences) -> Result<bool> {
        if file_stamp(&self.path)? == loaded.stamp {
            return Ok(false);
        }
        *loaded = read_preferences(&self.path)?;
        debug!(path = %self.path.display(), "preferences reloaded from disk");
        Ok(true)
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn all_users(&self) -> Result<Vec<UserPreferences>> {
        Ok(self.lock()?.file.users.values().cloned().collect())
    }

    fn get(&self, username: &str) -> Result<Option<UserPreferences>> {
        Ok(self.lock()?.file.users.get(username).cloned())
    }

    fn put(&self, preferences: UserPreferences) -> Result<()> {
        if preferences.username.trim().is_empty() {
            bail!("preferences require a non-empty username");
        }
        let mut loaded = self.lock()?;
        // never write back over records another process added
        self.reload_if_stale(&mut loaded)?;
        let previous = loaded
            .file
            .users
            .insert(preferences.username.clone(), preferences.clone());
        let mut payload = serde_json::to_string_pretty(&loaded.file)
            .context("failed to serialize preferences")?;
        payload.push('\n');
        if let Err(error) = write_text_atomic(&self.path, &payload) {
            // keep memory in line with disk
            match previous {
                Some(previous) => loaded.file.users.insert(previous.username.clone(), previous),
                None => loaded.file.users.remove(&preferences.username),
            };
            return Err(error)
                .with_context(|| format!("failed to write preferences {}", self.path.display()));
        }
        loaded.stamp = file_stamp(&self.path)?;
        Ok(())
    }

    fn refresh(&self) -> Result<bool> {
        let mut loaded = self.lock()?;
        self.reload_if_stale(&mut loaded)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn put_persists_and_reopen_reads_back() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("preferences.json");
        let store = FilePreferenceStore::open(path.clone()).expect("open");
        store
            .put(UserPreferences {
                username: "U1".to_string(),
                display_name: Some("ada".to_string()),
                pagerduty_token: Some("tok".to_string()),
                pagerduty_user_id: Some("PUSER1".to_string()),
            })
            .expect("put");

        let reopened = FilePreferenceStore::open(path).expect("reopen");
        let user = reopened.get("U1").expect("get").expect("present");
        assert_eq!(user.pagerduty_user_id.as_deref(), Some("PUSER1"));
        assert_eq!(reopened.all_users().expect("all").len(), 1);
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("preferences.json");
        std::fs::write(&path, "{\"schema_version\": 9, \"users\": {}}").expect("write");
        let error = FilePreferenceStore::open(path).err().expect("schema error");
        assert!(error.to_string().contains("unsupported preferences schema"));
    }

    fn registered(username: &str, remote_id: &str) -> UserPreferences {
        UserPreferences {
            username: username.to_string(),
            display_name: None,
            pagerduty_token: Some(format!("token-{username}")),
            pagerduty_user_id: Some(remote_id.to_string()),
        }
    }

    #[test]
    fn regression_refresh_sees_writes_from_another_handle() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("preferences.json");
        let running = FilePreferenceStore::open(path.clone()).expect("open running");
        let register = FilePreferenceStore::open(path).expect("open register");

        register.put(registered("U1", "PUSER1")).expect("register U1");
        assert!(running.get("U1").expect("get").is_none());

        assert!(running.refresh().expect("refresh"));
        assert_eq!(
            running
                .get("U1")
                .expect("get")
                .and_then(|user| user.pagerduty_user_id)
                .as_deref(),
            Some("PUSER1")
        );
        assert!(!running.refresh().expect("second refresh"));
    }

    #[test]
    fn regression_put_keeps_records_written_by_another_handle() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("preferences.json");
        let running = FilePreferenceStore::open(path.clone()).expect("open running");
        let register = FilePreferenceStore::open(path.clone()).expect("open register");

        register.put(registered("U1", "PUSER1")).expect("register U1");
        running.put(registered("U2", "PUSER2")).expect("write U2");

        let reopened = FilePreferenceStore::open(path).expect("reopen");
        let mut usernames = reopened
            .all_users()
            .expect("all")
            .into_iter()
            .map(|user| user.username)
            .collect::<Vec<_>>();
        usernames.sort();
        assert_eq!(usernames, vec!["U1".to_string(), "U2".to_string()]);
        assert!(!running.refresh().expect("own write is not a change"));
    }
}
