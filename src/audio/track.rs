use super::AudioFormat;
use id3::TagLike;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

/// One audio file in the library.
///
/// Tracks are built once by a scan and shared as `Arc<Track>`; nothing mutates
/// them afterwards. The id is a hash of the path relative to the music
/// directory, so the same file keeps its id across rescans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub file_path: PathBuf,
    pub format: AudioFormat,
    pub file_size: u64,
    pub duration: Option<Duration>,
    #[serde(skip)]
    artwork: ArtworkCache,
}

/// Embedded cover art, decoded on first request.
#[derive(Clone, Default)]
struct ArtworkCache(Arc<OnceLock<Option<Arc<[u8]>>>>);

impl std::fmt::Debug for ArtworkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.get() {
            None => f.write_str("ArtworkCache(unloaded)"),
            Some(None) => f.write_str("ArtworkCache(none)"),
            Some(Some(bytes)) => write!(f, "ArtworkCache({} bytes)", bytes.len()),
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}

impl Track {
    pub fn new(id: impl Into<String>, file_path: PathBuf) -> Self {
        let format = file_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(AudioFormat::from_extension)
            .unwrap_or(AudioFormat::Unknown);

        let title = file_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("Unknown")
            .to_string();

        Self {
            id: id.into(),
            title,
            artist: "Unknown Artist".to_string(),
            file_path,
            format,
            file_size: 0,
            duration: None,
            artwork: ArtworkCache::default(),
        }
    }

    /// Stable id for a file: xxhash64 of its path relative to the music directory.
    pub fn identifier_for(music_root: &Path, file_path: &Path) -> String {
        let relative = file_path.strip_prefix(music_root).unwrap_or(file_path);
        // Normalise separators so the id does not depend on the platform
        let key = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        format!("{:016x}", xxh64(key.as_bytes(), 0))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Pre-seed the artwork instead of reading it from the file.
    pub fn with_artwork(mut self, bytes: Vec<u8>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Some(Arc::from(bytes)));
        self.artwork = ArtworkCache(Arc::new(cell));
        self
    }

    /// Duration in seconds; 0.0 when the length is unknown.
    pub fn duration_secs(&self) -> f64 {
        self.duration.map(|d| d.as_secs_f64()).unwrap_or(0.0)
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Embedded cover image bytes, read from the file the first time they are asked for.
    pub fn artwork(&self) -> Option<Arc<[u8]>> {
        self.artwork
            .0
            .get_or_init(|| {
                let bytes = read_embedded_artwork(&self.file_path, self.format);
                debug!(
                    "Artwork for {}: {}",
                    self.file_path.display(),
                    if bytes.is_some() { "found" } else { "none" }
                );
                bytes.map(Arc::from)
            })
            .clone()
    }

    pub fn is_playable(&self) -> bool {
        self.format.is_supported() && self.file_path.exists()
    }
}

fn read_embedded_artwork(path: &Path, format: AudioFormat) -> Option<Vec<u8>> {
    match format {
        AudioFormat::Mp3 => {
            let tag = id3::Tag::read_from_path(path).ok()?;
            let picture = tag.pictures().next()?;
            Some(picture.data.clone())
        }
        AudioFormat::Mp4 => {
            let tag = mp4ameta::Tag::read_from_path(path).ok()?;
            let artwork = tag.artwork()?;
            Some(artwork.data.to_vec())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_is_relative_to_root() {
        let a = Track::identifier_for(Path::new("/music"), Path::new("/music/rock/song.mp3"));
        let b = Track::identifier_for(Path::new("/mnt/other"), Path::new("/mnt/other/rock/song.mp3"));
        let c = Track::identifier_for(Path::new("/music"), Path::new("/music/rock/other.mp3"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_new_track_uses_file_stem() {
        let track = Track::new("abc", PathBuf::from("/music/Intro.flac"));
        assert_eq!(track.title, "Intro");
        assert_eq!(track.format, AudioFormat::Flac);
        assert_eq!(track.duration_secs(), 0.0);
        assert_eq!(track.file_name(), "Intro.flac");
    }

    #[test]
    fn test_missing_file_has_no_artwork() {
        let track = Track::new("abc", PathBuf::from("/definitely/not/here.mp3"));
        assert!(track.artwork().is_none());
    }

    #[test]
    fn test_seeded_artwork_is_shared_between_clones() {
        let track = Track::new("abc", PathBuf::from("x.mp3")).with_artwork(vec![1, 2, 3]);
        let copy = track.clone();
        assert_eq!(copy.artwork().as_deref(), Some(&[1u8, 2, 3][..]));
    }
}
