// Favorites - a persisted set of track ids
// Insertion order is kept only so listings look stable

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::audio::playlist::write_atomically;
use crate::audio::Track;
use crate::error::{CoreError, Result};
use crate::events::{CoreEvent, EventBus};
use crate::library::LibraryIndex;

pub struct FavoritesStore {
    path: PathBuf,
    ids: Mutex<Vec<String>>,
    events: Arc<EventBus>,
}

impl FavoritesStore {
    pub fn open(path: PathBuf, events: Arc<EventBus>) -> Result<Self> {
        let ids = load_ids(&path)?;
        info!("Loaded {} favorites from {}", ids.len(), path.display());

        Ok(Self {
            path,
            ids: Mutex::new(ids),
            events,
        })
    }

    pub fn favorite_track_ids(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn is_favorite(&self, track_id: &str) -> bool {
        self.lock().iter().any(|id| id == track_id)
    }

    /// Returns whether the set actually changed.
    pub fn set_favorite(&self, track_id: &str, favorite: bool) -> Result<bool> {
        check_id(track_id)?;
        let guard = self.lock();
        let present = guard.iter().any(|id| id == track_id);
        if present == favorite {
            return Ok(false);
        }

        self.commit(with_membership(&guard, track_id, favorite), guard)?;
        Ok(true)
    }

    /// Flip membership under one lock, so concurrent toggles never lose an update.
    /// Returns the new membership.
    pub fn toggle(&self, track_id: &str) -> Result<bool> {
        check_id(track_id)?;
        let guard = self.lock();
        let favorite = !guard.iter().any(|id| id == track_id);
        self.commit(with_membership(&guard, track_id, favorite), guard)?;
        debug!("Track {} favorite: {}", track_id, favorite);
        Ok(favorite)
    }

    /// Drop a track that left the library. Returns whether it was a favorite.
    pub fn sweep(&self, track_id: &str) -> Result<bool> {
        self.set_favorite(track_id, false)
    }

    /// Resolve favorites against the library, dropping ids that no longer exist.
    pub fn favorite_tracks(&self, library: &LibraryIndex) -> Vec<Arc<Track>> {
        let snapshot = library.snapshot();
        self.lock()
            .iter()
            .filter_map(|id| snapshot.get(id).cloned())
            .collect()
    }

    fn commit(&self, next: Vec<String>, mut guard: MutexGuard<'_, Vec<String>>) -> Result<()> {
        let json = serde_json::to_string_pretty(&next)?;
        write_atomically(&self.path, json.as_bytes())?;
        *guard = next;
        drop(guard);

        self.events.emit(CoreEvent::FavoritesChanged);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// Blank ids are dropped on load, so they must never be written
fn check_id(track_id: &str) -> Result<()> {
    if track_id.trim().is_empty() {
        return Err(CoreError::invalid("track id must not be empty"));
    }
    Ok(())
}

fn with_membership(current: &[String], track_id: &str, favorite: bool) -> Vec<String> {
    let mut next: Vec<String> = current.iter().filter(|id| *id != track_id).cloned().collect();
    if favorite {
        next.push(track_id.to_string());
    }
    next
}

fn load_ids(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let raw: Vec<serde_json::Value> = serde_json::from_str(&content)
        .map_err(|e| CoreError::Persistence(format!("{} is not a favorites list: {}", path.display(), e)))?;

    let mut ids: Vec<String> = Vec::with_capacity(raw.len());
    for value in raw {
        match value {
            serde_json::Value::String(id) if !id.is_empty() => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            other => warn!("Skipping malformed favorite entry: {}", other),
        }
    }
    Ok(ids)
}
