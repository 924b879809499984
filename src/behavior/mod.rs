// Listening behaviour - play/skip counters and the affinity score built on them
// The playback queue reports what happened; this module decides what it means

pub mod database; // SQLite storage for per-track counters
pub mod tracker; // the analytics engine the rest of the app talks to
pub mod weighting; // affinity score formula

pub use database::AnalyticsDatabase;
pub use tracker::AnalyticsEngine;
pub use weighting::AffinityWeights;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-track counters. Both counts only ever go up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAnalytics {
    pub track_id: String,
    pub play_count: u64,
    pub skip_count: u64,
    pub updated_at: DateTime<Utc>,
}

/// The counter pair handed to views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackStats {
    pub play_count: u64,
    pub skip_count: u64,
}

impl From<&TrackAnalytics> for TrackStats {
    fn from(record: &TrackAnalytics) -> Self {
        Self {
            play_count: record.play_count,
            skip_count: record.skip_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    UserSkip,
    Error, // the engine could not play the file
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlaybackEvent {
    TrackCompleted {
        track_id: String,
        timestamp: DateTime<Utc>,
    },
    TrackSkipped {
        track_id: String,
        position: f64, // seconds
        reason: SkipReason,
        timestamp: DateTime<Utc>,
    },
}

impl PlaybackEvent {
    pub fn completed(track_id: &str) -> Self {
        PlaybackEvent::TrackCompleted {
            track_id: track_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn skipped(track_id: &str, position: f64, reason: SkipReason) -> Self {
        PlaybackEvent::TrackSkipped {
            track_id: track_id.to_string(),
            position,
            reason,
            timestamp: Utc::now(),
        }
    }

    pub fn track_id(&self) -> &str {
        match self {
            PlaybackEvent::TrackCompleted { track_id, .. } => track_id,
            PlaybackEvent::TrackSkipped { track_id, .. } => track_id,
        }
    }
}

/// Where the playback queue sends completion and skip signals.
pub trait PlaybackEventSink: Send + Sync {
    fn handle_event(&self, event: PlaybackEvent);
}
