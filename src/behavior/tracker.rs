use super::database::{AnalyticsDatabase, Counter};
use super::{AffinityWeights, PlaybackEvent, PlaybackEventSink, TrackAnalytics, TrackStats};
use crate::audio::Track;
use crate::error::{CoreError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Records plays and skips and turns them into affinity scores.
///
/// All writes go through one connection behind a mutex, so concurrent
/// callers are serialised and every call is exactly one increment.
pub struct AnalyticsEngine {
    database: Mutex<AnalyticsDatabase>,
    weights: AffinityWeights,
}

impl AnalyticsEngine {
    pub fn new(database: AnalyticsDatabase, weights: AffinityWeights) -> Self {
        Self {
            database: Mutex::new(database),
            weights,
        }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(AnalyticsDatabase::in_memory()?, AffinityWeights::default()))
    }

    pub fn weights(&self) -> AffinityWeights {
        self.weights
    }

    pub fn record_play(&self, track_id: &str) -> Result<TrackAnalytics> {
        self.record(track_id, Counter::Play)
    }

    pub fn record_skip(&self, track_id: &str) -> Result<TrackAnalytics> {
        self.record(track_id, Counter::Skip)
    }

    fn record(&self, track_id: &str, counter: Counter) -> Result<TrackAnalytics> {
        if track_id.trim().is_empty() {
            return Err(CoreError::invalid("track id must not be empty"));
        }

        let record = self.lock().increment(track_id, counter, Utc::now())?;
        debug!(
            "Track {}: {} plays, {} skips",
            track_id, record.play_count, record.skip_count
        );
        Ok(record)
    }

    pub fn analytics(&self, track_id: &str) -> Option<TrackAnalytics> {
        match self.lock().get(track_id) {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to read analytics for {}: {}", track_id, e);
                None
            }
        }
    }

    /// Affinity score; tracks without history get the neutral score.
    pub fn score(&self, track_id: &str) -> f64 {
        let stats = self
            .analytics(track_id)
            .map(|record| TrackStats::from(&record))
            .unwrap_or_default();
        self.weights.score(stats)
    }

    /// Counters for every requested id. Ids never seen get zeroed stats,
    /// so the map always has one entry per distinct id.
    pub fn analytics_for(&self, track_ids: &[&str]) -> HashMap<String, TrackStats> {
        let records = self.fetch(track_ids);
        track_ids
            .iter()
            .map(|&id| {
                let stats = records.get(id).map(TrackStats::from).unwrap_or_default();
                (id.to_string(), stats)
            })
            .collect()
    }

    /// Highest score first. Equal scores keep their input order.
    pub fn sort_by_affinity(&self, tracks: &[Arc<Track>]) -> Vec<Arc<Track>> {
        let ids: Vec<&str> = tracks.iter().map(|t| t.id.as_str()).collect();
        let stats = self.analytics_for(&ids);

        let mut scored: Vec<(f64, Arc<Track>)> = tracks
            .iter()
            .map(|track| {
                let score = self
                    .weights
                    .score(stats.get(&track.id).copied().unwrap_or_default());
                (score, Arc::clone(track))
            })
            .collect();

        // sort_by is stable, so ties stay in input order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().map(|(_, track)| track).collect()
    }

    /// Every record, most recently updated first.
    pub fn all_records(&self) -> Vec<TrackAnalytics> {
        match self.lock().all() {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to read analytics: {}", e);
                Vec::new()
            }
        }
    }

    fn fetch(&self, track_ids: &[&str]) -> HashMap<String, TrackAnalytics> {
        match self.lock().get_many(track_ids) {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to read analytics: {}", e);
                HashMap::new()
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, AnalyticsDatabase> {
        self.database
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PlaybackEventSink for AnalyticsEngine {
    fn handle_event(&self, event: PlaybackEvent) {
        let result = match &event {
            PlaybackEvent::TrackCompleted { track_id, .. } => self.record_play(track_id),
            PlaybackEvent::TrackSkipped { track_id, .. } => self.record_skip(track_id),
        };

        if let Err(e) = result {
            warn!("Dropped analytics event for {}: {}", event.track_id(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::SkipReason;
    use std::path::PathBuf;
    use std::thread;

    fn track(id: &str) -> Arc<Track> {
        Arc::new(Track::new(id, PathBuf::from(format!("{}.mp3", id))))
    }

    #[test]
    fn test_play_raises_and_skip_lowers_score() {
        let engine = AnalyticsEngine::in_memory().unwrap();
        let neutral = engine.score("t");

        engine.record_play("t").unwrap();
        let after_play = engine.score("t");
        assert!(after_play > neutral);

        engine.record_skip("t").unwrap();
        assert!(engine.score("t") < after_play);
    }

    #[test]
    fn test_empty_id_is_rejected() {
        let engine = AnalyticsEngine::in_memory().unwrap();
        assert!(matches!(engine.record_play(" "), Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn test_sort_is_stable_and_deterministic() {
        let engine = AnalyticsEngine::in_memory().unwrap();
        let tracks = vec![track("fresh"), track("skipped"), track("loved"), track("new")];
        engine.record_play("loved").unwrap();
        engine.record_skip("skipped").unwrap();

        let first: Vec<String> = engine.sort_by_affinity(&tracks).iter().map(|t| t.id.clone()).collect();
        let second: Vec<String> = engine.sort_by_affinity(&tracks).iter().map(|t| t.id.clone()).collect();

        assert_eq!(first, vec!["loved", "fresh", "new", "skipped"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_analytics_for_zero_fills_unknown_ids() {
        let engine = AnalyticsEngine::in_memory().unwrap();
        engine.record_play("a").unwrap();
        engine.record_play("a").unwrap();
        engine.record_skip("a").unwrap();

        let stats = engine.analytics_for(&["a", "b"]);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["a"], TrackStats { play_count: 2, skip_count: 1 });
        assert_eq!(stats["b"], TrackStats::default());
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let engine = Arc::new(AnalyticsEngine::in_memory().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..25 {
                        engine.record_play("shared").unwrap();
                        engine.record_skip(&format!("own{}", i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.analytics("shared").unwrap().play_count, 100);
        assert_eq!(engine.analytics("own0").unwrap().skip_count, 25);
    }

    #[test]
    fn test_events_map_to_counters() {
        let engine = AnalyticsEngine::in_memory().unwrap();
        engine.handle_event(PlaybackEvent::completed("a"));
        engine.handle_event(PlaybackEvent::skipped("a", 12.0, SkipReason::UserSkip));
        engine.handle_event(PlaybackEvent::skipped("a", 0.0, SkipReason::Error));

        let record = engine.analytics("a").unwrap();
        assert_eq!(record.play_count, 1);
        assert_eq!(record.skip_count, 2);
    }
}
