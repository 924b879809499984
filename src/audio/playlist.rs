use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::track::Track;
use crate::error::{CoreError, Result};
use crate::events::{CoreEvent, EventBus};
use crate::library::LibraryIndex;

const PLACEHOLDER_COLOR: Rgba<u8> = Rgba([48, 48, 56, 255]);

/// A named, ordered list of track ids.
///
/// Ids are soft references: they may point at tracks that have since been
/// deleted from the library. Duplicates are allowed and order matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub track_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_cover: Option<String>, // file name inside the covers directory
}

impl Playlist {
    pub fn new(name: String, track_ids: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            track_ids,
            custom_cover: None,
        }
    }

    /// Rebuild a playlist from its stored record. `None` for malformed records.
    ///
    /// A `null` or blank `custom_cover` means no cover. `to_record` writes that
    /// as an absent key, so such a record comes back in its canonical form.
    pub fn from_record(record: &Value) -> Option<Self> {
        let mut playlist: Playlist = serde_json::from_value(record.clone()).ok()?;
        if playlist.id.trim().is_empty() || playlist.name.trim().is_empty() {
            return None;
        }
        if playlist.custom_cover.as_deref().is_some_and(|c| c.trim().is_empty()) {
            playlist.custom_cover = None;
        }
        Some(playlist)
    }

    /// The canonical record; a missing cover is left out rather than written as `null`.
    pub fn to_record(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            // A struct of strings always serialises to an object
            _ => Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.track_ids.is_empty()
    }
}

/// Every playlist, persisted as one JSON document rewritten on each mutation.
pub struct PlaylistStore {
    path: PathBuf,
    covers_dir: PathBuf,
    cover_tiles: usize,
    playlists: Mutex<Vec<Playlist>>,
    events: Arc<EventBus>,
}

impl PlaylistStore {
    pub fn open(
        path: PathBuf,
        covers_dir: PathBuf,
        cover_tiles: usize,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let playlists = load_playlists(&path)?;
        info!("Loaded {} playlists from {}", playlists.len(), path.display());

        Ok(Self {
            path,
            covers_dir,
            cover_tiles: cover_tiles.max(1),
            playlists: Mutex::new(playlists),
            events,
        })
    }

    /// Re-read the document from disk, replacing the in-memory list.
    pub fn reload(&self) -> Result<()> {
        let playlists = load_playlists(&self.path)?;
        *self.lock() = playlists;
        self.events.emit(CoreEvent::PlaylistsChanged);
        Ok(())
    }

    /// All playlists in creation order.
    pub fn playlists(&self) -> Vec<Playlist> {
        self.lock().clone()
    }

    pub fn playlist(&self, playlist_id: &str) -> Option<Playlist> {
        self.lock().iter().find(|p| p.id == playlist_id).cloned()
    }

    pub fn create(
        &self,
        name: &str,
        track_ids: Vec<String>,
        cover: Option<&[u8]>,
    ) -> Result<Playlist> {
        let name = validate_name(name)?;
        let mut playlist = Playlist::new(name, track_ids);

        if let Some(bytes) = cover {
            playlist.custom_cover = Some(self.write_cover(&playlist.id, bytes)?);
        }

        let created = playlist.clone();
        let result = self.mutate(move |playlists| {
            playlists.push(playlist);
            Ok(())
        });

        if let Err(e) = result {
            if let Some(cover) = &created.custom_cover {
                self.remove_cover(cover);
            }
            return Err(e);
        }

        info!("Created playlist '{}' ({})", created.name, created.id);
        Ok(created)
    }

    pub fn rename(&self, playlist_id: &str, new_name: &str) -> Result<()> {
        let new_name = validate_name(new_name)?;
        self.mutate(|playlists| {
            let playlist = find_mut(playlists, playlist_id)?;
            info!("Renamed playlist '{}' to '{}'", playlist.name, new_name);
            playlist.name = new_name;
            Ok(())
        })
    }

    pub fn delete(&self, playlist_id: &str) -> Result<()> {
        let removed = self.mutate(|playlists| {
            let pos = playlists
                .iter()
                .position(|p| p.id == playlist_id)
                .ok_or_else(|| CoreError::not_found(format!("playlist {}", playlist_id)))?;
            Ok(playlists.remove(pos))
        })?;

        if let Some(cover) = &removed.custom_cover {
            self.remove_cover(cover);
        }
        info!("Deleted playlist '{}'", removed.name);
        Ok(())
    }

    /// Append ids in order. Duplicates are kept.
    pub fn add_track_ids(&self, track_ids: &[String], playlist_id: &str) -> Result<()> {
        self.mutate(|playlists| {
            let playlist = find_mut(playlists, playlist_id)?;
            playlist.track_ids.extend(track_ids.iter().cloned());
            debug!("Added {} tracks to playlist '{}'", track_ids.len(), playlist.name);
            Ok(())
        })
    }

    /// Replace the whole id list in one write (reorders, dedup).
    pub fn replace_track_ids(&self, track_ids: Vec<String>, playlist_id: &str) -> Result<()> {
        self.mutate(|playlists| {
            let playlist = find_mut(playlists, playlist_id)?;
            playlist.track_ids = track_ids;
            Ok(())
        })
    }

    /// Remove every occurrence of `track_id`. Returns how many entries went.
    pub fn remove_track_id(&self, track_id: &str, playlist_id: &str) -> Result<usize> {
        self.mutate(|playlists| {
            let playlist = find_mut(playlists, playlist_id)?;
            let before = playlist.track_ids.len();
            playlist.track_ids.retain(|id| id != track_id);
            Ok(before - playlist.track_ids.len())
        })
    }

    /// Sweep a deleted track out of every playlist. Returns how many playlists changed.
    pub fn remove_track_id_from_all_playlists(&self, track_id: &str) -> Result<usize> {
        let touched = self.mutate(|playlists| {
            let mut touched = 0;
            for playlist in playlists.iter_mut() {
                let before = playlist.track_ids.len();
                playlist.track_ids.retain(|id| id != track_id);
                if playlist.track_ids.len() != before {
                    touched += 1;
                }
            }
            Ok(touched)
        })?;

        info!("Swept track {} from {} playlists", track_id, touched);
        Ok(touched)
    }

    /// Set or clear (`None`) the custom cover image.
    pub fn set_custom_cover(&self, cover: Option<&[u8]>, playlist_id: &str) -> Result<()> {
        if self.playlist(playlist_id).is_none() {
            return Err(CoreError::not_found(format!("playlist {}", playlist_id)));
        }

        let new_cover = match cover {
            Some(bytes) => Some(self.write_cover(playlist_id, bytes)?),
            None => None,
        };

        let result = self.mutate(|playlists| {
            let playlist = find_mut(playlists, playlist_id)?;
            Ok(std::mem::replace(&mut playlist.custom_cover, new_cover.clone()))
        });

        match result {
            Ok(old_cover) => {
                if let Some(old) = old_cover {
                    self.remove_cover(&old);
                }
                Ok(())
            }
            Err(e) => {
                if let Some(cover) = &new_cover {
                    self.remove_cover(cover);
                }
                Err(e)
            }
        }
    }

    /// Resolve ids against the library, silently dropping ones that no longer exist.
    pub fn tracks_for_playlist(&self, playlist: &Playlist, library: &LibraryIndex) -> Vec<Arc<Track>> {
        let snapshot = library.snapshot();
        playlist
            .track_ids
            .iter()
            .filter_map(|id| snapshot.get(id).cloned())
            .collect()
    }

    /// Custom cover if set, else a mosaic of the first tracks' artwork, else a placeholder.
    pub fn cover_for_playlist(
        &self,
        playlist: &Playlist,
        library: &LibraryIndex,
        size: u32,
    ) -> RgbaImage {
        let size = size.max(1);

        if let Some(cover) = &playlist.custom_cover {
            match image::open(self.covers_dir.join(cover)) {
                Ok(img) => return img.resize_to_fill(size, size, FilterType::Triangle).to_rgba8(),
                Err(e) => warn!("Custom cover {} unreadable, falling back: {}", cover, e),
            }
        }

        let artworks: Vec<DynamicImage> = self
            .tracks_for_playlist(playlist, library)
            .iter()
            .filter_map(|track| track.artwork())
            .filter_map(|bytes| image::load_from_memory(&bytes).ok())
            .take(self.cover_tiles)
            .collect();

        stitch_cover(&artworks, self.cover_tiles, size)
    }

    // Clone, mutate, persist, then commit. A failed write leaves memory untouched.
    fn mutate<T>(&self, f: impl FnOnce(&mut Vec<Playlist>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        save_playlists(&self.path, &next)?;
        *guard = next;
        drop(guard);

        self.events.emit(CoreEvent::PlaylistsChanged);
        Ok(out)
    }

    fn write_cover(&self, playlist_id: &str, bytes: &[u8]) -> Result<String> {
        let format = image::guess_format(bytes)
            .map_err(|e| CoreError::invalid(format!("cover is not an image: {}", e)))?;
        let ext = format.extensions_str().first().copied().unwrap_or("img");
        let file_name = format!("{}-{}.{}", playlist_id, Uuid::new_v4().simple(), ext);

        fs::create_dir_all(&self.covers_dir)
            .and_then(|_| fs::write(self.covers_dir.join(&file_name), bytes))
            .map_err(|e| CoreError::Persistence(format!("failed to write cover: {}", e)))?;

        debug!("Wrote cover {}", file_name);
        Ok(file_name)
    }

    fn remove_cover(&self, file_name: &str) {
        if let Err(e) = fs::remove_file(self.covers_dir.join(file_name)) {
            warn!("Failed to remove cover {}: {}", file_name, e);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Playlist>> {
        self.playlists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::invalid("playlist name must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn find_mut<'a>(playlists: &'a mut [Playlist], playlist_id: &str) -> Result<&'a mut Playlist> {
    playlists
        .iter_mut()
        .find(|p| p.id == playlist_id)
        .ok_or_else(|| CoreError::not_found(format!("playlist {}", playlist_id)))
}

fn load_playlists(path: &Path) -> Result<Vec<Playlist>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let records: Vec<Value> = serde_json::from_str(&content)
        .map_err(|e| CoreError::Persistence(format!("{} is not a playlist list: {}", path.display(), e)))?;

    let total = records.len();
    let playlists: Vec<Playlist> = records.iter().filter_map(Playlist::from_record).collect();
    if playlists.len() != total {
        warn!(
            "Skipped {} malformed playlist records in {}",
            total - playlists.len(),
            path.display()
        );
    }
    Ok(playlists)
}

fn save_playlists(path: &Path, playlists: &[Playlist]) -> Result<()> {
    let records: Vec<Value> = playlists
        .iter()
        .map(|p| Value::Object(p.to_record()))
        .collect();
    let json = serde_json::to_string_pretty(&records)?;
    write_atomically(path, json.as_bytes())?;
    debug!("Saved {} playlists to {}", playlists.len(), path.display());
    Ok(())
}

/// Write to a sibling temp file and rename over `path`, so readers never see half a document.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let persist = || -> std::io::Result<()> {
        fs::create_dir_all(parent)?;
        let mut file = tempfile::NamedTempFile::new_in(parent)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    };

    persist().map_err(|e| CoreError::Persistence(format!("failed to write {}: {}", path.display(), e)))
}

fn stitch_cover(artworks: &[DynamicImage], tiles: usize, size: u32) -> RgbaImage {
    let side = (tiles as f64).sqrt().floor() as u32;

    if side >= 2 && artworks.len() >= (side * side) as usize {
        let tile = (size / side).max(1);
        let mut canvas = RgbaImage::from_pixel(size, size, PLACEHOLDER_COLOR);
        for (i, art) in artworks.iter().take((side * side) as usize).enumerate() {
            let i = i as u32;
            let piece = art.resize_to_fill(tile, tile, FilterType::Triangle).to_rgba8();
            imageops::overlay(&mut canvas, &piece, ((i % side) * tile) as i64, ((i / side) * tile) as i64);
        }
        return canvas;
    }

    match artworks.first() {
        Some(art) => art.resize_to_fill(size, size, FilterType::Triangle).to_rgba8(),
        None => RgbaImage::from_pixel(size, size, PLACEHOLDER_COLOR),
    }
}
