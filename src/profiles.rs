use crate::lock;
use crate::model::PlaybackProfile;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Per-track remembered positions, shared between the chain actions and the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct PlaybackProfiles {
    inner: Arc<Mutex<HashMap<PathBuf, PlaybackProfile>>>,
}

impl PlaybackProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_saved(profiles: Vec<PlaybackProfile>) -> Self {
        let store = Self::new();
        for profile in profiles {
            store.add(profile);
        }
        store
    }

    pub fn get(&self, track: &Path) -> Option<PlaybackProfile> {
        lock(&self.inner).get(track).cloned()
    }

    pub fn has(&self, track: &Path) -> bool {
        lock(&self.inner).contains_key(track)
    }

    pub fn add(&self, profile: PlaybackProfile) {
        lock(&self.inner).insert(profile.track.clone(), profile);
    }

    pub fn remove(&self, track: &Path) -> Option<PlaybackProfile> {
        lock(&self.inner).remove(track)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<PlaybackProfile> {
        let mut profiles: Vec<PlaybackProfile> = lock(&self.inner).values().cloned().collect();
        profiles.sort_by(|a, b| a.track.cmp(&b.track));
        profiles
    }
}
