//! Bidirectional chat-username <-> PagerDuty-user-id mapping.
//!
//! The mapping is derived from [`PreferenceStore`] contents and cached as an
//! immutable [`IdentitySnapshot`]. Both directions are built together and
//! swapped in with a single pointer store, so readers never see a
//! half-rebuilt map. Any preference write, in this process or picked up
//! from disk, moves the generation and retires the snapshot.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::Result;
use arc_swap::ArcSwapOption;
use tracing::{debug, warn};

use crate::preferences::{PreferenceStore, UserPreferences};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdentitySnapshot {
    by_username: HashMap<String, String>,
    by_remote_id: HashMap<String, String>,
}

impl IdentitySnapshot {
    /// Builds both directions; on a duplicated remote id the first username
    /// in sorted order keeps it so the maps stay inverses.
    pub fn build(users: &[UserPreferences]) -> Self {
        let mut sorted = users.iter().collect::<Vec<_>>();
        sorted.sort_by(|left, right| left.username.cmp(&right.username));

        let mut snapshot = Self::default();
        for user in sorted {
            let Some(remote_id) = user
                .pagerduty_user_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
            else {
                continue;
            };
            if let Some(owner) = snapshot.by_remote_id.get(remote_id) {
                warn!(
                    remote_id,
                    kept = %owner,
                    skipped = %user.username,
                    "pagerduty user id is claimed by several chat users"
                );
                continue;
            }
            snapshot
                .by_remote_id
                .insert(remote_id.to_string(), user.username.clone());
            snapshot
                .by_username
                .insert(user.username.clone(), remote_id.to_string());
        }
        snapshot
    }

    pub fn remote_id_for(&self, username: &str) -> Option<&str> {
        self.by_username.get(username).map(String::as_str)
    }

    pub fn username_for(&self, remote_id: &str) -> Option<&str> {
        self.by_remote_id.get(remote_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_username.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_username.is_empty()
    }
}

/// A snapshot tagged with the generation it was built from; entries from an
/// older generation are never served.
struct CachedSnapshot {
    generation: u64,
    snapshot: Arc<IdentitySnapshot>,
}

pub struct IdentityMap {
    store: Arc<dyn PreferenceStore>,
    snapshot: ArcSwapOption<CachedSnapshot>,
    generation: AtomicU64,
}

impl IdentityMap {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self {
            store,
            snapshot: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot, built lazily from the store.
    pub fn snapshot(&self) -> Result<Arc<IdentitySnapshot>> {
        self.pick_up_external_writes()?;
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(cached) = self.snapshot.load_full() {
            if cached.generation == generation {
                return Ok(Arc::clone(&cached.snapshot));
            }
        }
        let users = self.store.all_users()?;
        let built = Arc::new(IdentitySnapshot::build(&users));
        // may land after a newer write; the stale tag keeps it from being served
        self.snapshot.store(Some(Arc::new(CachedSnapshot {
            generation,
            snapshot: Arc::clone(&built),
        })));
        Ok(built)
    }

    fn pick_up_external_writes(&self) -> Result<()> {
        if self.store.refresh()? {
            debug!("preferences changed outside this process; dropping identity snapshot");
            self.invalidate();
        }
        Ok(())
    }

    pub fn remote_id_for(&self, username: &str) -> Result<Option<String>> {
        Ok(self.snapshot()?.remote_id_for(username).map(str::to_string))
    }

    pub fn username_for(&self, remote_id: &str) -> Result<Option<String>> {
        Ok(self.snapshot()?.username_for(remote_id).map(str::to_string))
    }

    pub fn token_for(&self, username: &str) -> Result<Option<String>> {
        self.pick_up_external_writes()?;
        Ok(self
            .store
            .get(username)?
            .and_then(|user| user.pagerduty_token)
            .filter(|token| !token.trim().is_empty()))
    }

    /// Resolves a chat reference (`<@U123>`, `@ada`, `U123`, or a display
    /// name) to a known local user.
    pub fn resolve_user(&self, name: &str) -> Result<Option<UserPreferences>> {
        let needle = normalize_user_reference(name);
        if needle.is_empty() {
            return Ok(None);
        }
        self.pick_up_external_writes()?;
        if let Some(user) = self.store.get(&needle)? {
            return Ok(Some(user));
        }
        Ok(self.store.all_users()?.into_iter().find(|user| {
            user.username.eq_ignore_ascii_case(&needle)
                || user
                    .display_name
                    .as_deref()
                    .is_some_and(|display| display.eq_ignore_ascii_case(&needle))
        }))
    }

    /// Stores a validated token and remote id for `username`, then drops the
    /// cached snapshot.
    pub fn store_remote_identity(
        &self,
        username: &str,
        display_name: Option<&str>,
        token: &str,
        remote_id: &str,
    ) -> Result<()> {
        self.pick_up_external_writes()?;
        let mut preferences = self.store.get(username)?.unwrap_or_else(|| UserPreferences {
            username: username.to_string(),
            ..UserPreferences::default()
        });
        if let Some(display_name) = display_name.filter(|name| !name.trim().is_empty()) {
            preferences.display_name = Some(display_name.trim().to_string());
        }
        preferences.pagerduty_token = Some(token.trim().to_string());
        preferences.pagerduty_user_id = Some(remote_id.trim().to_string());
        let result = self.store.put(preferences);
        self.invalidate();
        result
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.snapshot.store(None);
    }
}

fn normalize_user_reference(name: &str) -> String {
    let trimmed = name.trim();
    let unwrapped = trimmed
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .map(|inner| inner.split('|').next().unwrap_or(inner))
        .unwrap_or(trimmed);
    unwrapped.trim_start_matches('@').trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::preferences::FilePreferenceStore;

    #[derive(Default)]
    struct MemoryPreferences {
        users: Mutex<Vec<UserPreferences>>,
        reads: AtomicU64,
    }

    impl PreferenceStore for MemoryPreferences {
        fn all_users(&self) -> Result<Vec<UserPreferences>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.users.lock().expect("lock").clone())
        }

        fn get(&self, username: &str) -> Result<Option<UserPreferences>> {
            Ok(self
                .users
                .lock()
                .expect("lock")
                .iter()
                .find(|user| user.username == username)
                .cloned())
        }

        fn put(&self, preferences: UserPreferences) -> Result<()> {
            let mut users = self.users.lock().expect("lock");
            users.retain(|user| user.username != preferences.username);
            users.push(preferences);
            Ok(())
        }
    }

    fn user(username: &str, remote_id: Option<&str>) -> UserPreferences {
        UserPreferences {
            username: username.to_string(),
            display_name: None,
            pagerduty_token: Some(format!("token-{username}")),
            pagerduty_user_id: remote_id.map(str::to_string),
        }
    }

    #[test]
    fn snapshot_directions_are_inverses_even_with_duplicates() {
        let snapshot = IdentitySnapshot::build(&[
            user("U2", Some("PX")),
            user("U1", Some("PX")),
            user("U3", Some("PY")),
            user("U4", None),
        ]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.username_for("PX"), Some("U1"));
        assert_eq!(snapshot.remote_id_for("U2"), None);
        for (username, remote_id) in [("U1", "PX"), ("U3", "PY")] {
            assert_eq!(snapshot.remote_id_for(username), Some(remote_id));
            assert_eq!(snapshot.username_for(remote_id), Some(username));
        }
    }

    #[test]
    fn snapshot_is_cached_until_a_preference_write() {
        let store = Arc::new(MemoryPreferences::default());
        store.put(user("U1", Some("P1"))).expect("seed");
        let map = IdentityMap::new(store.clone());

        assert_eq!(map.remote_id_for("U1").expect("lookup").as_deref(), Some("P1"));
        assert_eq!(map.username_for("P1").expect("lookup").as_deref(), Some("U1"));
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);

        map.store_remote_identity("U1", None, "new-token", "P9")
            .expect("write");
        assert_eq!(map.remote_id_for("U1").expect("lookup").as_deref(), Some("P9"));
        assert_eq!(map.username_for("P1").expect("lookup"), None);
        assert_eq!(map.username_for("P9").expect("lookup").as_deref(), Some("U1"));
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn regression_stale_snapshot_installed_late_is_not_served() {
        let store = Arc::new(MemoryPreferences::default());
        store.put(user("U1", Some("P1"))).expect("seed");
        let map = IdentityMap::new(store.clone());
        let stale = map.snapshot().expect("initial snapshot");

        // a reader that built from the old contents installs after the write
        store.put(user("U1", Some("P9"))).expect("write");
        map.invalidate();
        map.snapshot.store(Some(Arc::new(CachedSnapshot {
            generation: 0,
            snapshot: stale,
        })));

        assert_eq!(map.remote_id_for("U1").expect("lookup").as_deref(), Some("P9"));
        assert_eq!(map.username_for("P1").expect("lookup"), None);
    }

    #[test]
    fn regression_registration_from_another_process_reaches_running_map() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("preferences.json");
        let running = IdentityMap::new(Arc::new(
            FilePreferenceStore::open(path.clone()).expect("open running"),
        ));
        let register = IdentityMap::new(Arc::new(
            FilePreferenceStore::open(path).expect("open register"),
        ));
        assert!(running.snapshot().expect("empty snapshot").is_empty());

        register
            .store_remote_identity("U1", None, "tok", "PUSER1")
            .expect("register");

        assert_eq!(running.token_for("U1").expect("token").as_deref(), Some("tok"));
        assert_eq!(
            running.remote_id_for("U1").expect("lookup").as_deref(),
            Some("PUSER1")
        );
        assert_eq!(
            running.username_for("PUSER1").expect("lookup").as_deref(),
            Some("U1")
        );
    }

    #[test]
    fn resolve_user_accepts_mentions_and_display_names() {
        let store = Arc::new(MemoryPreferences::default());
        store
            .put(UserPreferences {
                display_name: Some("Ada".to_string()),
                ..user("U1", Some("P1"))
            })
            .expect("seed");
        let map = IdentityMap::new(store);

        for reference in ["<@U1>", "<@U1|ada>", "@ada", "U1", "ADA"] {
            let resolved = map.resolve_user(reference).expect("resolve");
            assert_eq!(
                resolved.map(|user| user.username).as_deref(),
                Some("U1"),
                "{reference}"
            );
        }
        assert!(map.resolve_user("grace").expect("resolve").is_none());
    }
}
