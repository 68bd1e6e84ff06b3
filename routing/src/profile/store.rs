//! Profile Store: exclusive owner of backend performance profiles
//!
//! Each profile sits behind its own mutex so updates for one backend are
//! serialized without blocking unrelated backends. The outer map lock is
//! only held long enough to find (or register) the entry.

use super::types::{ModelProfile, Observation};
use crate::config::ProfileUpdateConfig;
use crate::error::{RoutingError, RoutingResult};
use crate::task::Capability;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::debug;

/// Shared reference to a ProfileStore
pub type SharedProfileStore = Arc<ProfileStore>;

pub struct ProfileStore {
    profiles: RwLock<HashMap<String, Arc<Mutex<ModelProfile>>>>,
    params: ProfileUpdateConfig,
}

impl ProfileStore {
    pub fn new(params: ProfileUpdateConfig) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            params,
        }
    }

    /// Build a store from an initial profile set.
    pub fn with_profiles(
        params: ProfileUpdateConfig,
        profiles: impl IntoIterator<Item = ModelProfile>,
    ) -> RoutingResult<Self> {
        let store = Self::new(params);
        for profile in profiles {
            store.insert(profile)?;
        }
        Ok(store)
    }

    pub fn shared(self) -> SharedProfileStore {
        Arc::new(self)
    }

    pub fn params(&self) -> &ProfileUpdateConfig {
        &self.params
    }

    /// Register a new backend. Fails if the id is taken.
    pub fn insert(&self, profile: ModelProfile) -> RoutingResult<()> {
        profile.validate()?;
        let mut map = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&profile.backend_id) {
            return Err(RoutingError::DuplicateProfile(profile.backend_id));
        }
        debug!(backend = %profile.backend_id, "Profile registered");
        map.insert(profile.backend_id.clone(), Arc::new(Mutex::new(profile)));
        Ok(())
    }

    /// Register or replace a backend's profile wholesale.
    pub fn upsert(&self, profile: ModelProfile) -> RoutingResult<()> {
        profile.validate()?;
        // The slot is replaced in place so an `update` holding it is not lost.
        let mut map = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        match map.get(&profile.backend_id) {
            Some(slot) => *lock(slot) = profile,
            None => {
                map.insert(profile.backend_id.clone(), Arc::new(Mutex::new(profile)));
            }
        }
        Ok(())
    }

    /// Snapshot of one profile.
    pub fn get(&self, backend_id: &str) -> Option<ModelProfile> {
        self.entry(backend_id).map(|slot| lock(&slot).clone())
    }

    /// Profiles whose capability set covers `required`, sorted by backend id.
    pub fn list_eligible(&self, required: &BTreeSet<Capability>) -> Vec<ModelProfile> {
        let mut eligible: Vec<ModelProfile> = self
            .slots()
            .iter()
            .map(|slot| lock(slot).clone())
            .filter(|p| p.supports(required))
            .collect();
        eligible.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
        eligible
    }

    /// All profiles sorted by backend id.
    pub fn snapshot(&self) -> Vec<ModelProfile> {
        self.list_eligible(&BTreeSet::new())
    }

    pub fn len(&self) -> usize {
        self.profiles.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply one observation with the store's update coefficients.
    ///
    /// Read-modify-write happens under the backend's own lock, so concurrent
    /// updates to the same backend never lose an observation.
    pub fn update(&self, backend_id: &str, observation: Observation) -> RoutingResult<()> {
        let slot = self
            .entry(backend_id)
            .ok_or_else(|| RoutingError::ProfileNotFound(backend_id.to_string()))?;
        let mut profile = lock(&slot);
        profile.apply(&observation, &self.params);
        debug!(
            backend = backend_id,
            bucket = %observation.bucket,
            success = observation.success,
            latency_ms = observation.latency_ms,
            avg_response_time_ms = profile.avg_response_time_ms,
            success_rate = profile.success_rate,
            "Profile updated"
        );
        Ok(())
    }

    fn entry(&self, backend_id: &str) -> Option<Arc<Mutex<ModelProfile>>> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(backend_id)
            .cloned()
    }

    fn slots(&self) -> Vec<Arc<Mutex<ModelProfile>>> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new(ProfileUpdateConfig::default())
    }
}

fn lock(slot: &Mutex<ModelProfile>) -> MutexGuard<'_, ModelProfile> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
