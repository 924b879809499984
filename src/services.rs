// Startup composition - one instance of every store, built once and shared by Arc
// Nothing in the crate reaches for a global; consumers get handed what they need

use crate::audio::PlaylistStore;
use crate::behavior::{AffinityWeights, AnalyticsDatabase, AnalyticsEngine};
use crate::config::Config;
use crate::error::Result;
use crate::events::{CoreEvent, EventBus};
use crate::favorites::FavoritesStore;
use crate::library::LibraryIndex;
use crate::playback::{PlaybackEngine, PlaybackQueue};
use crate::sleep_timer::SleepTimer;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct Services {
    pub config: Config,
    pub events: Arc<EventBus>,
    pub library: Arc<LibraryIndex>,
    pub playlists: Arc<PlaylistStore>,
    pub favorites: Arc<FavoritesStore>,
    pub analytics: Arc<AnalyticsEngine>,
    pub playback: Arc<PlaybackQueue>,
    pub sleep_timer: SleepTimer,
}

impl Services {
    /// Open every store under `config.data_directory` and wire them together.
    /// The library starts empty; call `library.scan()` to fill it.
    pub fn start(config: Config, engine: Box<dyn PlaybackEngine>, runtime: Handle) -> Result<Self> {
        std::fs::create_dir_all(&config.data_directory)?;
        let events = Arc::new(EventBus::new());

        let library = Arc::new(LibraryIndex::new(config.music_directory.clone(), &config.library));
        let playlists = Arc::new(PlaylistStore::open(
            config.playlists_path(),
            config.covers_directory(),
            config.covers.tile_count,
            Arc::clone(&events),
        )?);
        let favorites = Arc::new(FavoritesStore::open(config.favorites_path(), Arc::clone(&events))?);

        let weights = AffinityWeights::new(config.analytics.skip_weight, config.analytics.prior);
        let analytics = Arc::new(AnalyticsEngine::new(
            AnalyticsDatabase::new(config.analytics_path())?,
            weights,
        ));

        let playback = Arc::new(PlaybackQueue::new(
            engine,
            analytics.clone(),
            Arc::clone(&events),
            config.playback.restart_threshold_seconds,
        ));
        let sleep_timer = SleepTimer::new(runtime, playback.clone(), Arc::clone(&events));

        info!("Services started with data in {}", config.data_directory.display());
        Ok(Self {
            config,
            events,
            library,
            playlists,
            favorites,
            analytics,
            playback,
            sleep_timer,
        })
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Delete the track's file, then drop its id from every playlist and
    /// from favorites. A failed sweep is logged; the file is already gone.
    pub fn delete_track(&self, track_id: &str) -> Result<()> {
        let track = self.library.delete(track_id)?;

        match self.playlists.remove_track_id_from_all_playlists(track_id) {
            Ok(removed) => info!("Removed {} from {} playlist entries", track.title, removed),
            Err(e) => warn!("Failed to sweep playlists for {}: {}", track_id, e),
        }
        if let Err(e) = self.favorites.sweep(track_id) {
            warn!("Failed to sweep favorites for {}: {}", track_id, e);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::SilentEngine;

    #[tokio::test]
    async fn test_delete_track_sweeps_playlists_and_favorites() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        std::fs::create_dir_all(&config.music_directory).unwrap();
        std::fs::write(config.music_directory.join("Artist - Song.mp3"), b"not really audio").unwrap();
        std::fs::write(config.music_directory.join("Other - Tune.mp3"), b"not really audio").unwrap();

        let services = Services::start(config, Box::new(SilentEngine::new()), Handle::current()).unwrap();
        assert_eq!(services.library.scan().unwrap(), 2);

        let tracks = services.library.tracks();
        let doomed = tracks[0].id.clone();
        let kept = tracks[1].id.clone();
        let playlist = services
            .playlists
            .create("Mix", vec![doomed.clone(), kept.clone(), doomed.clone()], None)
            .unwrap();
        services.favorites.set_favorite(&doomed, true).unwrap();

        services.delete_track(&doomed).unwrap();

        assert!(services.library.lookup(&doomed).is_none());
        assert!(!tracks[0].file_path.exists());
        assert_eq!(services.playlists.playlist(&playlist.id).unwrap().track_ids, vec![kept]);
        assert!(!services.favorites.is_favorite(&doomed));
    }

    #[tokio::test]
    async fn test_unknown_track_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let services = Services::start(
            Config::with_root(dir.path()),
            Box::new(SilentEngine::new()),
            Handle::current(),
        )
        .unwrap();

        assert!(matches!(
            services.delete_track("missing"),
            Err(crate::error::CoreError::NotFound(_))
        ));
    }
}
