// Lyrebird Library - core of a local music player
// Library scanning, playlists, favorites, the play queue, sleep timer and listening affinity
// Nothing here renders anything; a UI subscribes to events and reads snapshots

pub mod audio;       // tracks, scanning, metadata, playlists
pub mod behavior;    // play/skip counters and affinity scores
pub mod config;      // settings and preferences
pub mod error;       // error taxonomy shared by every store
pub mod events;      // change notifications
pub mod favorites;   // favorite track ids
pub mod library;     // the scanned track set
pub mod playback;    // queue state machine + engines
pub mod services;    // startup composition
pub mod sleep_timer; // pause-after countdown

// Export the stuff other modules actually use
pub use audio::{format_duration, MusicScanner, Playlist, PlaylistStore, Track};
pub use behavior::{AnalyticsEngine, PlaybackEvent, SkipReason, TrackAnalytics, TrackStats};
pub use config::Config;
pub use error::{CoreError, Result};
pub use events::{CoreEvent, EventBus};
pub use favorites::FavoritesStore;
pub use library::{LibraryIndex, LibrarySnapshot};
pub use playback::{PlaybackQueue, PlaybackSnapshot, RepeatMode, TransportState};
pub use services::Services;
pub use sleep_timer::SleepTimer;
