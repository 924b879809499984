// Library index - the in-memory set of tracks found in the music directory
// Readers always get a complete snapshot; rescans build a new one and swap it in

use crate::audio::{MusicScanner, ScanCancel, ScanProgress, Track};
use crate::config::LibraryConfig;
use crate::error::{CoreError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Immutable view of the library at one point in time.
#[derive(Debug, Default)]
pub struct LibrarySnapshot {
    tracks: Vec<Arc<Track>>,
    by_id: HashMap<String, usize>,
}

impl LibrarySnapshot {
    fn build(mut tracks: Vec<Track>) -> Self {
        tracks.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        // Two paths hashing to one id would shadow each other; keep the first
        tracks.dedup_by(|a, b| a.id == b.id);

        let tracks: Vec<Arc<Track>> = tracks.into_iter().map(Arc::new).collect();
        let by_id = tracks
            .iter()
            .enumerate()
            .map(|(idx, track)| (track.id.clone(), idx))
            .collect();

        Self { tracks, by_id }
    }

    pub fn tracks(&self) -> &[Arc<Track>] {
        &self.tracks
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Track>> {
        self.by_id.get(id).and_then(|&idx| self.tracks.get(idx))
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

pub struct LibraryIndex {
    music_directory: PathBuf,
    scanner: MusicScanner,
    snapshot: RwLock<Arc<LibrarySnapshot>>,
    // Serialises writers (scan, delete) so a delete never lands on a stale snapshot
    writer: Mutex<()>,
}

impl LibraryIndex {
    pub fn new(music_directory: PathBuf, config: &LibraryConfig) -> Self {
        Self {
            music_directory,
            scanner: MusicScanner::new(config),
            snapshot: RwLock::new(Arc::new(LibrarySnapshot::default())),
            writer: Mutex::new(()),
        }
    }

    pub fn music_directory(&self) -> &Path {
        &self.music_directory
    }

    /// Create the music directory if it is missing.
    pub fn ensure_music_directory(&self) -> Result<()> {
        if !self.music_directory.exists() {
            fs::create_dir_all(&self.music_directory)?;
            info!("Created music directory: {}", self.music_directory.display());
        }
        Ok(())
    }

    pub fn files_drop_hint(&self) -> String {
        format!(
            "Drop audio files into {} and rescan the library",
            self.music_directory.display()
        )
    }

    /// Rescan the music directory and install the result.
    ///
    /// On failure the previous snapshot stays in place.
    pub fn scan(&self) -> Result<usize> {
        let _writer = self.lock_writer();
        let tracks = self.scanner.scan_directory(&self.music_directory)?;
        Ok(self.install(tracks))
    }

    pub fn reload(&self) -> Result<Vec<Arc<Track>>> {
        self.scan()?;
        Ok(self.tracks())
    }

    /// Cancellable rescan. Returns `false` when cancelled, leaving the old snapshot.
    pub async fn scan_incremental(
        &self,
        progress_tx: mpsc::Sender<ScanProgress>,
        cancel: ScanCancel,
    ) -> Result<bool> {
        let scanned = self
            .scanner
            .scan_directory_incremental(&self.music_directory, progress_tx, cancel)
            .await?;

        match scanned {
            Some(tracks) => {
                let _writer = self.lock_writer();
                // A delete may have landed while the walk ran unlocked
                let found = tracks.len();
                let tracks: Vec<Track> = tracks.into_iter().filter(|t| t.file_path.exists()).collect();
                if tracks.len() != found {
                    debug!("Dropped {} tracks deleted during the scan", found - tracks.len());
                }
                self.install(tracks);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Swap in a new track set built from `tracks`.
    pub fn replace_tracks(&self, tracks: Vec<Track>) -> usize {
        let _writer = self.lock_writer();
        self.install(tracks)
    }

    pub fn snapshot(&self) -> Arc<LibrarySnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.snapshot().tracks().to_vec()
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Track>> {
        self.snapshot().get(id).cloned()
    }

    pub fn track(&self, id: &str) -> Result<Arc<Track>> {
        self.lookup(id)
            .ok_or_else(|| CoreError::not_found(format!("track {}", id)))
    }

    /// Delete the backing file and drop the track from the index.
    ///
    /// Playlists and favorites still reference the id afterwards; sweeping
    /// them is the caller's job.
    pub fn delete(&self, id: &str) -> Result<Arc<Track>> {
        let _writer = self.lock_writer();
        let current = self.snapshot();
        let track = current
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("track {}", id)))?;

        match fs::remove_file(&track.file_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} was already gone from disk", track.file_path.display());
            }
            Err(e) => return Err(CoreError::Io(e)),
        }

        let remaining: Vec<Track> = current
            .tracks()
            .iter()
            .filter(|t| t.id != id)
            .map(|t| Track::clone(t))
            .collect();
        self.install(remaining);

        info!("Deleted track '{}' ({})", track.title, track.file_path.display());
        Ok(track)
    }

    fn install(&self, tracks: Vec<Track>) -> usize {
        let snapshot = Arc::new(LibrarySnapshot::build(tracks));
        let count = snapshot.len();
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot;
        count
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, ()> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library_with_files(names: &[&str]) -> (tempfile::TempDir, LibraryIndex) {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), b"data").unwrap();
        }
        let library = LibraryIndex::new(dir.path().to_path_buf(), &LibraryConfig::default());
        (dir, library)
    }

    #[test]
    fn test_scan_then_lookup() {
        let (_dir, library) = library_with_files(&["Bravo.wav", "alpha.wav"]);
        assert_eq!(library.scan().unwrap(), 2);

        let titles: Vec<String> = library.tracks().iter().map(|t| t.title.clone()).collect();
        assert_eq!(titles, vec!["alpha", "Bravo"]);

        let id = library.tracks()[0].id.clone();
        assert_eq!(library.lookup(&id).unwrap().title, "alpha");
        assert!(library.lookup("missing").is_none());
        assert!(matches!(library.track("missing"), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_rescan_keeps_ids() {
        let (dir, library) = library_with_files(&["one.wav"]);
        library.scan().unwrap();
        let before = library.tracks()[0].id.clone();

        fs::write(dir.path().join("two.wav"), b"data").unwrap();
        let tracks = library.reload().unwrap();

        assert_eq!(tracks.len(), 2);
        assert!(library.lookup(&before).is_some());
    }

    #[test]
    fn test_delete_removes_file_and_record() {
        let (dir, library) = library_with_files(&["gone.wav", "stays.wav"]);
        library.scan().unwrap();
        let id = library
            .tracks()
            .iter()
            .find(|t| t.title == "gone")
            .unwrap()
            .id
            .clone();

        let deleted = library.delete(&id).unwrap();

        assert_eq!(deleted.title, "gone");
        assert!(!dir.path().join("gone.wav").exists());
        assert!(library.lookup(&id).is_none());
        assert_eq!(library.tracks().len(), 1);
        assert!(matches!(library.delete(&id), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_old_snapshot_stays_valid_for_readers() {
        let (_dir, library) = library_with_files(&["a.wav"]);
        library.scan().unwrap();
        let held = library.snapshot();

        library.replace_tracks(Vec::new());

        assert_eq!(held.len(), 1);
        assert!(library.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_delete_during_incremental_scan_stays_deleted() {
        let (_dir, library) = library_with_files(&["a.wav", "b.wav", "c.wav"]);
        library.scan().unwrap();
        let id = library.tracks()[0].id.clone();

        let (tx, mut rx) = mpsc::channel(1);
        let scan = library.scan_incremental(tx, ScanCancel::new());
        let meddle = async {
            // Started, then the first track: the walk is underway
            rx.recv().await;
            rx.recv().await;
            library.delete(&id).unwrap();
            while rx.recv().await.is_some() {}
        };
        let (completed, _) = tokio::join!(scan, meddle);

        assert!(completed.unwrap());
        assert!(library.lookup(&id).is_none());
        assert_eq!(library.tracks().len(), 2);
    }

    #[test]
    fn test_failed_scan_keeps_previous_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let music = dir.path().join("music");
        let library = LibraryIndex::new(music.clone(), &LibraryConfig::default());
        library.ensure_music_directory().unwrap();
        fs::write(music.join("a.wav"), b"data").unwrap();
        library.scan().unwrap();

        fs::remove_dir_all(&music).unwrap();
        assert!(library.scan().is_err());
        assert_eq!(library.tracks().len(), 1);
    }
}
