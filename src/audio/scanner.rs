use super::metadata_parser::MetadataParser;
use super::{AudioFormat, Track};
use crate::config::LibraryConfig;
use crate::error::{CoreError, Result};
use id3::TagLike;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

#[derive(Clone)]
pub struct MusicScanner {
    supported_extensions: Vec<String>,
    follow_links: bool,
    include_hidden: bool,
    max_file_size: u64,
    parser: Arc<MetadataParser>,
}

#[derive(Debug, Clone)]
pub enum ScanProgress {
    Started { root: PathBuf },
    TrackFound { track: Track, progress: usize },
    Skipped { path: PathBuf, error: String },
    Completed { total_tracks: usize },
    Cancelled { tracks_found: usize },
}

/// Shared flag for stopping a long scan from another task.
#[derive(Debug, Clone, Default)]
pub struct ScanCancel(Arc<AtomicBool>);

impl ScanCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl MusicScanner {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            supported_extensions: config
                .extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            follow_links: config.follow_links,
            include_hidden: config.include_hidden,
            max_file_size: config.max_file_size,
            parser: Arc::new(MetadataParser::new()),
        }
    }

    /// Walk `root` and build a track for every supported file.
    ///
    /// Files that cannot be read are logged and left out; only a missing
    /// root fails the scan.
    pub fn scan_directory<P: AsRef<Path>>(&self, root: P) -> Result<Vec<Track>> {
        let root = root.as_ref();
        ensure_root(root)?;

        let mut tracks = Vec::new();
        let mut skipped = 0usize;

        for path in self.candidate_files(root) {
            match self.create_track_from_file(root, &path) {
                Ok(track) => tracks.push(track),
                Err(e) => {
                    skipped += 1;
                    warn!("Skipping {}: {}", path.display(), e);
                }
            }
        }

        info!(
            "Scanned {}: {} tracks, {} skipped",
            root.display(),
            tracks.len(),
            skipped
        );
        Ok(tracks)
    }

    /// Scan with progress updates via channel for non-blocking UI updates.
    ///
    /// Returns `Ok(None)` when `cancel` fired before the walk finished.
    pub async fn scan_directory_incremental(
        &self,
        root: &Path,
        progress_tx: mpsc::Sender<ScanProgress>,
        cancel: ScanCancel,
    ) -> Result<Option<Vec<Track>>> {
        ensure_root(root)?;

        let mut tracks = Vec::new();
        let _ = progress_tx
            .send(ScanProgress::Started {
                root: root.to_path_buf(),
            })
            .await;

        for path in self.candidate_files(root) {
            if cancel.is_cancelled() {
                info!("Scan of {} cancelled after {} tracks", root.display(), tracks.len());
                let _ = progress_tx
                    .send(ScanProgress::Cancelled {
                        tracks_found: tracks.len(),
                    })
                    .await;
                return Ok(None);
            }

            match self.create_track_from_file(root, &path) {
                Ok(track) => {
                    tracks.push(track.clone());
                    let _ = progress_tx
                        .send(ScanProgress::TrackFound {
                            track,
                            progress: tracks.len(),
                        })
                        .await;

                    // Yield control periodically for UI responsiveness
                    if tracks.len() % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    let _ = progress_tx
                        .send(ScanProgress::Skipped {
                            path,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        }

        let _ = progress_tx
            .send(ScanProgress::Completed {
                total_tracks: tracks.len(),
            })
            .await;

        Ok(Some(tracks))
    }

    fn candidate_files(&self, root: &Path) -> Vec<PathBuf> {
        let include_hidden = self.include_hidden;

        WalkDir::new(root)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| include_hidden || e.depth() == 0 || !is_hidden(e))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Unreadable directory entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.is_supported_file(path))
            .collect()
    }

    fn is_supported_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let normalized = ext.to_ascii_lowercase();
                self.supported_extensions.contains(&normalized)
            })
            .unwrap_or(false)
    }

    fn create_track_from_file(&self, root: &Path, path: &Path) -> Result<Track> {
        let metadata = fs::metadata(path)?;
        let file_size = metadata.len();

        // Skip empty files or absurdly large ones
        if file_size == 0 || file_size > self.max_file_size {
            return Err(CoreError::invalid(format!("unexpected file size {}", file_size)));
        }

        let mut track = Track::new(Track::identifier_for(root, path), path.to_path_buf());
        track.file_size = file_size;

        let tags = match track.format {
            AudioFormat::Mp3 => read_id3_tags(path),
            AudioFormat::Mp4 => read_mp4_tags(path),
            _ => None,
        };

        let parsed = self.parser.parse_stem(&track.title);
        let (title, artist, duration) = match tags {
            Some(tags) => (tags.title, tags.artist, tags.duration),
            None => (None, None, None),
        };

        track.title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(parsed.suggested_title);
        if let Some(artist) = artist
            .filter(|a| !a.trim().is_empty())
            .or(parsed.suggested_artist)
        {
            track.artist = artist;
        }
        track.duration = duration;

        // Feature-gated duration probing using symphonia
        #[cfg(feature = "probe")]
        {
            if track.duration.is_none() {
                match probe_duration_with_symphonia(path) {
                    Ok(duration) => track.duration = Some(duration),
                    Err(e) => debug!("No probed duration for {}: {}", path.display(), e),
                }
            }
        }

        debug!("Indexed {} as {}", path.display(), track.id);
        Ok(track)
    }
}

struct TagFields {
    title: Option<String>,
    artist: Option<String>,
    duration: Option<Duration>,
}

fn read_id3_tags(path: &Path) -> Option<TagFields> {
    let tag = match id3::Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(e) => {
            debug!("No ID3 tag in {}: {}", path.display(), e);
            return None;
        }
    };

    Some(TagFields {
        title: tag.title().map(|s| s.to_string()),
        artist: tag.artist().map(|s| s.to_string()),
        duration: tag.duration().map(|ms| Duration::from_millis(ms as u64)),
    })
}

fn read_mp4_tags(path: &Path) -> Option<TagFields> {
    let tag = match mp4ameta::Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(e) => {
            debug!("No MP4 metadata in {}: {}", path.display(), e);
            return None;
        }
    };

    Some(TagFields {
        title: tag.title().map(|s| s.to_string()),
        artist: tag.artist().map(|s| s.to_string()),
        duration: tag.duration(),
    })
}

fn ensure_root(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(CoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("music directory {} does not exist", root.display()),
        )))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Feature-gated duration probing using symphonia codec
#[cfg(feature = "probe")]
fn probe_duration_with_symphonia(path: &Path) -> anyhow::Result<Duration> {
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow::anyhow!("No supported audio tracks found"))?;

    match (track.codec_params.time_base, track.codec_params.n_frames) {
        (Some(time_base), Some(n_frames)) => {
            let time = time_base.calc_time(n_frames);
            Ok(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
        }
        _ => Err(anyhow::anyhow!("Could not determine duration from file")),
    }
}
