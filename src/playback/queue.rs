use super::engine::PlaybackEngine;
use crate::audio::Track;
use crate::behavior::{PlaybackEvent, PlaybackEventSink, SkipReason};
use crate::error::{CoreError, Result};
use crate::events::{CoreEvent, EventBus};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RepeatMode {
    #[default]
    None,
    Queue,
    Track,
}

impl RepeatMode {
    pub fn next(self) -> Self {
        match self {
            RepeatMode::None => RepeatMode::Queue,
            RepeatMode::Queue => RepeatMode::Track,
            RepeatMode::Track => RepeatMode::None,
        }
    }
}

/// Read-only view of the queue for the UI layer.
#[derive(Debug, Clone)]
pub struct PlaybackSnapshot {
    pub current_track: Option<Arc<Track>>,
    pub transport: TransportState,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    /// Tracks in playback order (shuffled when shuffle is on).
    pub queue: Vec<Arc<Track>>,
    pub repeat_mode: RepeatMode,
    pub shuffle_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    UserSkip,
    Completed,
    Failed,
}

struct QueueState {
    engine: Box<dyn PlaybackEngine>,
    tracks: Vec<Arc<Track>>, // as handed to play_tracks
    order: Vec<usize>,       // playback order, indexes into `tracks`
    index: Option<usize>,    // position in `order`
    repeat: RepeatMode,
    shuffle: bool,
    transport: TransportState,
    position: f64,
}

impl QueueState {
    fn current_track(&self) -> Option<Arc<Track>> {
        self.index
            .and_then(|i| self.order.get(i))
            .and_then(|&t| self.tracks.get(t))
            .cloned()
    }

    fn track_at(&self, index: usize) -> Option<Arc<Track>> {
        self.order.get(index).and_then(|&t| self.tracks.get(t)).cloned()
    }

    fn duration(&self) -> f64 {
        self.current_track().map(|t| t.duration_secs()).unwrap_or(0.0)
    }

    /// Where the queue goes from here. Pure; the real transition and the
    /// skip preview both go through this.
    fn next_index(&self, advance: Advance) -> Option<usize> {
        let current = self.index?;
        let len = self.order.len();

        if advance == Advance::Completed && self.repeat == RepeatMode::Track {
            return Some(current);
        }
        if current + 1 < len {
            return Some(current + 1);
        }

        match (self.repeat, advance) {
            (RepeatMode::None, _) => None,
            (RepeatMode::Queue, _) => Some(0),
            // Retrying an unplayable file forever helps nobody
            (RepeatMode::Track, Advance::Failed) => Some(0),
            (RepeatMode::Track, _) => Some(current),
        }
    }

    fn previous_index(&self) -> Option<usize> {
        let current = self.index?;
        if current > 0 {
            return Some(current - 1);
        }
        match self.repeat {
            RepeatMode::Queue => Some(self.order.len().saturating_sub(1)),
            RepeatMode::None | RepeatMode::Track => Some(current),
        }
    }

    fn stop(&mut self) {
        self.engine.stop();
        self.transport = TransportState::Stopped;
        self.position = 0.0;
    }

    /// Start the track at `index`. A track the engine refuses is reported as
    /// an error skip and the queue moves on, giving every entry one chance.
    fn start_at(&mut self, index: usize, sink: &dyn PlaybackEventSink) {
        self.index = Some(index);
        for _ in 0..self.order.len() {
            let Some(track) = self.current_track() else {
                break;
            };
            self.position = 0.0;

            match self.engine.play(&track) {
                Ok(()) => {
                    self.transport = TransportState::Playing;
                    info!("Now playing: {} - {}", track.artist, track.title);
                    return;
                }
                Err(e) => {
                    warn!("Skipping unplayable track {}: {}", track.file_path.display(), e);
                    sink.handle_event(PlaybackEvent::skipped(&track.id, 0.0, SkipReason::Error));
                    match self.next_index(Advance::Failed) {
                        Some(next) => self.index = Some(next),
                        None => break,
                    }
                }
            }
        }

        self.stop();
    }

    fn advance(&mut self, advance: Advance, sink: &dyn PlaybackEventSink) {
        match self.next_index(advance) {
            Some(next) => self.start_at(next, sink),
            None => {
                debug!("Reached end of queue");
                self.stop();
            }
        }
    }
}

/// The play queue state machine: Stopped -> Playing <-> Paused -> Stopped.
///
/// Every transition runs under one lock, so two concurrent `play_next` calls
/// advance the index twice instead of racing on a stale read. Change
/// notifications go out after the lock is released.
pub struct PlaybackQueue {
    state: Mutex<QueueState>,
    analytics: Arc<dyn PlaybackEventSink>,
    events: Arc<EventBus>,
    restart_threshold: f64,
}

impl PlaybackQueue {
    pub fn new(
        engine: Box<dyn PlaybackEngine>,
        analytics: Arc<dyn PlaybackEventSink>,
        events: Arc<EventBus>,
        restart_threshold: f64,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState {
                engine,
                tracks: Vec::new(),
                order: Vec::new(),
                index: None,
                repeat: RepeatMode::None,
                shuffle: false,
                transport: TransportState::Stopped,
                position: 0.0,
            }),
            analytics,
            events,
            restart_threshold: restart_threshold.max(0.0),
        }
    }

    /// Replace the queue and start at `start_index` (clamped).
    pub fn play_tracks(&self, tracks: Vec<Arc<Track>>, start_index: usize) -> Result<()> {
        if tracks.is_empty() {
            return Err(CoreError::invalid("cannot play an empty track list"));
        }

        {
            let mut state = self.lock();
            let start = start_index.min(tracks.len() - 1);

            state.order = (0..tracks.len()).collect();
            let first = if state.shuffle {
                // Keep the chosen track first, shuffle the rest behind it
                state.order.swap(0, start);
                state.order[1..].shuffle(&mut rand::thread_rng());
                0
            } else {
                start
            };
            state.tracks = tracks;
            state.engine.stop();

            debug!("Queue replaced with {} tracks", state.tracks.len());
            state.start_at(first, self.analytics.as_ref());
        }

        self.events.emit(CoreEvent::PlaybackStateChanged);
        Ok(())
    }

    /// Play a single track as a one-entry queue.
    pub fn play_track(&self, track: Arc<Track>) -> Result<()> {
        self.play_tracks(vec![track], 0)
    }

    /// Play `track` with `context` (a playlist, the library) as the queue.
    /// A track missing from the context plays on its own.
    pub fn play_track_in_context(&self, track: Arc<Track>, context: Vec<Arc<Track>>) -> Result<()> {
        match context.iter().position(|t| t.id == track.id) {
            Some(index) => self.play_tracks(context, index),
            None => {
                debug!("Track {} not in context, playing alone", track.id);
                self.play_track(track)
            }
        }
    }

    /// Playing <-> Paused. Returns the new transport state.
    pub fn toggle_play_pause(&self) -> TransportState {
        let transport = {
            let mut state = self.lock();
            match state.transport {
                TransportState::Playing => {
                    state.engine.pause();
                    state.position = state.engine.position();
                    state.transport = TransportState::Paused;
                }
                TransportState::Paused => {
                    state.engine.resume();
                    state.transport = TransportState::Playing;
                }
                TransportState::Stopped => return TransportState::Stopped,
            }
            state.transport
        };

        self.events.emit(CoreEvent::PlaybackStateChanged);
        transport
    }

    /// Pause if playing. Returns whether anything changed.
    pub fn pause(&self) -> bool {
        {
            let mut state = self.lock();
            if state.transport != TransportState::Playing {
                return false;
            }
            state.engine.pause();
            state.position = state.engine.position();
            state.transport = TransportState::Paused;
        }

        self.events.emit(CoreEvent::PlaybackStateChanged);
        true
    }

    /// Empty the queue and stop.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.stop();
            state.tracks.clear();
            state.order.clear();
            state.index = None;
        }
        self.events.emit(CoreEvent::PlaybackStateChanged);
    }

    /// User skip. Records a skip for the track being left unless nothing
    /// was playing. Returns the new current track.
    pub fn play_next(&self) -> Option<Arc<Track>> {
        let current = {
            let mut state = self.lock();
            let leaving = state.current_track()?;

            if state.transport != TransportState::Stopped {
                let position = state.engine.position();
                self.analytics
                    .handle_event(PlaybackEvent::skipped(&leaving.id, position, SkipReason::UserSkip));
            }

            state.advance(Advance::UserSkip, self.analytics.as_ref());
            state.current_track()
        };

        self.events.emit(CoreEvent::PlaybackStateChanged);
        current
    }

    /// Natural end of the current track: records a play and advances.
    pub fn handle_track_finished(&self) {
        let changed = {
            let mut state = self.lock();
            self.complete_current(&mut state)
        };
        if changed {
            self.events.emit(CoreEvent::PlaybackStateChanged);
        }
    }

    fn complete_current(&self, state: &mut QueueState) -> bool {
        if state.transport != TransportState::Playing {
            return false;
        }
        let Some(track) = state.current_track() else {
            return false;
        };

        self.analytics.handle_event(PlaybackEvent::completed(&track.id));
        state.advance(Advance::Completed, self.analytics.as_ref());
        true
    }

    /// Poll the engine: refresh the position, or run the completion
    /// transition once the track has ended.
    pub fn tick(&self) {
        let event = {
            let mut state = self.lock();
            if state.transport != TransportState::Playing {
                return;
            }

            if state.engine.is_finished() {
                self.complete_current(&mut state);
                CoreEvent::PlaybackStateChanged
            } else {
                let duration = state.duration();
                let mut position = state.engine.position().max(0.0);
                if duration > 0.0 {
                    position = position.min(duration);
                }
                state.position = position;
                CoreEvent::PlaybackProgressChanged { position, duration }
            }
        };

        self.events.emit(event);
    }

    /// Restart the current track if it is past the restart threshold,
    /// otherwise go back one entry. Records nothing.
    pub fn play_previous(&self) -> Option<Arc<Track>> {
        let current = {
            let mut state = self.lock();
            let current = state.index?;
            let position = match state.transport {
                TransportState::Playing => state.engine.position(),
                _ => state.position,
            };

            match state.previous_index() {
                Some(previous) if previous != current && position <= self.restart_threshold => {
                    state.start_at(previous, self.analytics.as_ref());
                }
                _ => {
                    if let Err(e) = state.engine.seek(0.0) {
                        warn!("Failed to restart track: {}", e);
                    }
                    state.position = 0.0;
                }
            }
            state.current_track()
        };

        self.events.emit(CoreEvent::PlaybackStateChanged);
        current
    }

    /// Seek within the current track, clamped to `[0, duration]`.
    /// Unknown durations only clamp at zero.
    pub fn seek(&self, time: f64) -> Result<f64> {
        let (position, duration) = {
            let mut state = self.lock();
            if state.current_track().is_none() {
                return Err(CoreError::invalid("nothing to seek in"));
            }

            let duration = state.duration();
            let mut position = if time.is_finite() { time.max(0.0) } else { 0.0 };
            if duration > 0.0 {
                position = position.min(duration);
            }

            state.engine.seek(position)?;
            state.position = position;
            (position, duration)
        };

        self.events
            .emit(CoreEvent::PlaybackProgressChanged { position, duration });
        Ok(position)
    }

    /// Turning shuffle on reshuffles what has not played yet; turning it off
    /// goes back to the original order from the current track forward.
    pub fn set_shuffle_enabled(&self, enabled: bool) {
        {
            let mut state = self.lock();
            if state.shuffle == enabled {
                return;
            }
            state.shuffle = enabled;

            if let Some(index) = state.index {
                if enabled {
                    state.order[index + 1..].shuffle(&mut rand::thread_rng());
                } else {
                    let original = state.order[index];
                    state.order = (0..state.tracks.len()).collect();
                    state.index = Some(original);
                }
            }
            debug!("Shuffle {}", if enabled { "on" } else { "off" });
        }

        self.events.emit(CoreEvent::PlaybackStateChanged);
    }

    pub fn toggle_shuffle(&self) -> bool {
        let enabled = !self.lock().shuffle;
        self.set_shuffle_enabled(enabled);
        enabled
    }

    pub fn cycle_repeat_mode(&self) -> RepeatMode {
        let mode = {
            let mut state = self.lock();
            state.repeat = state.repeat.next();
            state.repeat
        };
        debug!("Repeat mode: {:?}", mode);
        self.events.emit(CoreEvent::PlaybackStateChanged);
        mode
    }

    /// The track `play_next` would move to. No side effects.
    pub fn predicted_next_track_for_skip(&self) -> Option<Arc<Track>> {
        let state = self.lock();
        state
            .next_index(Advance::UserSkip)
            .and_then(|next| state.track_at(next))
    }

    pub fn current_track(&self) -> Option<Arc<Track>> {
        self.lock().current_track()
    }

    pub fn transport(&self) -> TransportState {
        self.lock().transport
    }

    pub fn is_playing(&self) -> bool {
        self.transport() == TransportState::Playing
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.lock().repeat
    }

    pub fn is_shuffle_enabled(&self) -> bool {
        self.lock().shuffle
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.lock();
        let current_time = match state.transport {
            TransportState::Playing => state.engine.position(),
            _ => state.position,
        };

        PlaybackSnapshot {
            current_track: state.current_track(),
            transport: state.transport,
            is_playing: state.transport == TransportState::Playing,
            current_time,
            duration: state.duration(),
            queue: (0..state.order.len()).filter_map(|i| state.track_at(i)).collect(),
            repeat_mode: state.repeat,
            shuffle_enabled: state.shuffle,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::time::Duration;

    #[derive(Default)]
    struct EngineProbe {
        played: Vec<String>,
        position: f64,
        finished: bool,
        broken: HashSet<String>,
    }

    /// Engine whose state the test drives by hand.
    struct FakeEngine(Arc<Mutex<EngineProbe>>);

    impl PlaybackEngine for FakeEngine {
        fn play(&mut self, track: &Track) -> Result<()> {
            let mut probe = self.0.lock().unwrap();
            if probe.broken.contains(&track.id) {
                return Err(CoreError::Engine("unreadable".to_string()));
            }
            probe.played.push(track.id.clone());
            probe.position = 0.0;
            probe.finished = false;
            Ok(())
        }
        fn pause(&mut self) {}
        fn resume(&mut self) {}
        fn stop(&mut self) {}
        fn seek(&mut self, position: f64) -> Result<()> {
            self.0.lock().unwrap().position = position;
            Ok(())
        }
        fn position(&self) -> f64 {
            self.0.lock().unwrap().position
        }
        fn is_finished(&self) -> bool {
            self.0.lock().unwrap().finished
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<PlaybackEvent>>);

    impl RecordingSink {
        fn plays(&self, id: &str) -> usize {
            self.count(id, |e| matches!(e, PlaybackEvent::TrackCompleted { .. }))
        }
        fn skips(&self, id: &str) -> usize {
            self.count(id, |e| matches!(e, PlaybackEvent::TrackSkipped { .. }))
        }
        fn count(&self, id: &str, kind: impl Fn(&PlaybackEvent) -> bool) -> usize {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.track_id() == id && kind(e))
                .count()
        }
    }

    impl PlaybackEventSink for RecordingSink {
        fn handle_event(&self, event: PlaybackEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    struct Harness {
        queue: PlaybackQueue,
        probe: Arc<Mutex<EngineProbe>>,
        sink: Arc<RecordingSink>,
    }

    fn harness() -> Harness {
        let probe = Arc::new(Mutex::new(EngineProbe::default()));
        let sink = Arc::new(RecordingSink::default());
        let queue = PlaybackQueue::new(
            Box::new(FakeEngine(Arc::clone(&probe))),
            sink.clone(),
            Arc::new(EventBus::new()),
            3.0,
        );
        Harness { queue, probe, sink }
    }

    fn tracks(ids: &[&str]) -> Vec<Arc<Track>> {
        ids.iter()
            .map(|id| {
                Arc::new(
                    Track::new(*id, PathBuf::from(format!("{}.mp3", id)))
                        .with_duration(Duration::from_secs(180)),
                )
            })
            .collect()
    }

    fn current_id(queue: &PlaybackQueue) -> Option<String> {
        queue.current_track().map(|t| t.id.clone())
    }

    #[test]
    fn test_empty_track_list_is_rejected() {
        let h = harness();
        assert!(matches!(h.queue.play_tracks(Vec::new(), 0), Err(CoreError::InvalidInput(_))));
        assert_eq!(h.queue.transport(), TransportState::Stopped);
    }

    #[test]
    fn test_start_index_is_clamped() {
        let h = harness();
        h.queue.play_tracks(tracks(&["a", "b"]), 9).unwrap();
        assert_eq!(current_id(&h.queue).as_deref(), Some("b"));
    }

    #[test]
    fn test_next_walks_queue_then_stops() {
        let h = harness();
        h.queue.play_tracks(tracks(&["a", "b", "c"]), 0).unwrap();

        h.queue.play_next();
        assert_eq!(h.queue.transport(), TransportState::Playing);
        h.queue.play_next();
        assert_eq!(current_id(&h.queue).as_deref(), Some("c"));
        assert_eq!(h.queue.transport(), TransportState::Playing);

        h.queue.play_next();
        assert_eq!(h.queue.transport(), TransportState::Stopped);
        assert_eq!(current_id(&h.queue).as_deref(), Some("c"));
    }

    #[test]
    fn test_repeat_queue_wraps() {
        let h = harness();
        h.queue.play_tracks(tracks(&["a", "b", "c"]), 0).unwrap();
        assert_eq!(h.queue.cycle_repeat_mode(), RepeatMode::Queue);

        h.queue.play_next();
        h.queue.play_next();
        h.queue.play_next();
        assert_eq!(current_id(&h.queue).as_deref(), Some("a"));
        assert_eq!(h.queue.transport(), TransportState::Playing);
    }

    #[test]
    fn test_repeat_cycle_returns_to_none() {
        let h = harness();
        assert_eq!(h.queue.cycle_repeat_mode(), RepeatMode::Queue);
        assert_eq!(h.queue.cycle_repeat_mode(), RepeatMode::Track);
        assert_eq!(h.queue.cycle_repeat_mode(), RepeatMode::None);
    }

    #[test]
    fn test_skip_records_one_skip_and_no_play() {
        let h = harness();
        h.queue.play_tracks(tracks(&["a", "b"]), 0).unwrap();
        h.probe.lock().unwrap().position = 42.0;

        h.queue.play_next();

        assert_eq!(h.sink.skips("a"), 1);
        assert_eq!(h.sink.plays("a"), 0);
        let events = h.sink.0.lock().unwrap();
        assert!(matches!(
            &events[0],
            PlaybackEvent::TrackSkipped { position, reason: SkipReason::UserSkip, .. } if *position == 42.0
        ));
    }

    #[test]
    fn test_natural_end_records_one_play_and_no_skip() {
        let h = harness();
        h.queue.play_tracks(tracks(&["a", "b"]), 0).unwrap();
        h.probe.lock().unwrap().finished = true;

        h.queue.tick();

        assert_eq!(h.sink.plays("a"), 1);
        assert_eq!(h.sink.skips("a"), 0);
        assert_eq!(current_id(&h.queue).as_deref(), Some("b"));
    }

    #[test]
    fn test_tick_reports_progress() {
        let h = harness();
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let queue = PlaybackQueue::new(
            Box::new(FakeEngine(Arc::clone(&h.probe))),
            h.sink.clone(),
            bus,
            3.0,
        );
        queue.play_tracks(tracks(&["a"]), 0).unwrap();
        h.probe.lock().unwrap().position = 12.5;

        queue.tick();

        assert_eq!(rx.try_recv().ok(), Some(CoreEvent::PlaybackStateChanged));
        assert_eq!(
            rx.try_recv().ok(),
            Some(CoreEvent::PlaybackProgressChanged { position: 12.5, duration: 180.0 })
        );
    }

    #[test]
    fn test_repeat_track_replays_on_completion_only() {
        let h = harness();
        h.queue.play_tracks(tracks(&["a", "b"]), 0).unwrap();
        h.queue.cycle_repeat_mode();
        h.queue.cycle_repeat_mode();

        h.queue.handle_track_finished();
        assert_eq!(current_id(&h.queue).as_deref(), Some("a"));
        assert_eq!(h.probe.lock().unwrap().played, vec!["a", "a"]);

        h.queue.play_next();
        assert_eq!(current_id(&h.queue).as_deref(), Some("b"));
        h.queue.play_next();
        assert_eq!(current_id(&h.queue).as_deref(), Some("b"));
    }

    #[test]
    fn test_toggle_is_noop_when_stopped() {
        let h = harness();
        assert_eq!(h.queue.toggle_play_pause(), TransportState::Stopped);

        h.queue.play_tracks(tracks(&["a"]), 0).unwrap();
        assert_eq!(h.queue.toggle_play_pause(), TransportState::Paused);
        assert_eq!(h.queue.toggle_play_pause(), TransportState::Playing);
    }

    #[test]
    fn test_previous_restarts_past_threshold() {
        let h = harness();
        h.queue.play_tracks(tracks(&["a", "b"]), 1).unwrap();
        h.probe.lock().unwrap().position = 30.0;

        h.queue.play_previous();
        assert_eq!(current_id(&h.queue).as_deref(), Some("b"));
        assert_eq!(h.probe.lock().unwrap().position, 0.0);

        h.queue.play_previous();
        assert_eq!(current_id(&h.queue).as_deref(), Some("a"));
        assert!(h.sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_previous_wraps_with_repeat_queue() {
        let h = harness();
        h.queue.play_tracks(tracks(&["a", "b", "c"]), 0).unwrap();
        h.queue.cycle_repeat_mode();

        h.queue.play_previous();
        assert_eq!(current_id(&h.queue).as_deref(), Some("c"));
    }

    #[test]
    fn test_seek_is_clamped() {
        let h = harness();
        h.queue.play_tracks(tracks(&["a"]), 0).unwrap();

        assert_eq!(h.queue.seek(-5.0).unwrap(), 0.0);
        assert_eq!(h.queue.seek(1000.0).unwrap(), 180.0);
        assert_eq!(h.queue.seek(60.0).unwrap(), 60.0);
        assert_eq!(h.queue.transport(), TransportState::Playing);
    }

    #[test]
    fn test_enabling_shuffle_keeps_current_track() {
        let h = harness();
        let ids: Vec<String> = (0..20).map(|i| format!("t{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        h.queue.play_tracks(tracks(&id_refs), 5).unwrap();

        h.queue.set_shuffle_enabled(true);
        assert_eq!(current_id(&h.queue).as_deref(), Some("t5"));

        let snapshot = h.queue.snapshot();
        let played: Vec<&str> = snapshot.queue[..6].iter().map(|t| t.id.as_str()).collect();
        assert_eq!(played, vec!["t0", "t1", "t2", "t3", "t4", "t5"]);

        let mut rest: Vec<String> = snapshot.queue[6..].iter().map(|t| t.id.clone()).collect();
        rest.sort_by_key(|id| id[1..].parse::<usize>().unwrap());
        assert_eq!(rest, ids[6..].to_vec());
    }

    #[test]
    fn test_disabling_shuffle_restores_original_order() {
        let h = harness();
        h.queue.set_shuffle_enabled(true);
        h.queue.play_tracks(tracks(&["a", "b", "c", "d"]), 2).unwrap();
        assert_eq!(current_id(&h.queue).as_deref(), Some("c"));

        assert!(!h.queue.toggle_shuffle());
        assert_eq!(current_id(&h.queue).as_deref(), Some("c"));
        assert_eq!(h.queue.predicted_next_track_for_skip().map(|t| t.id.clone()).as_deref(), Some("d"));

        let order: Vec<String> = h.queue.snapshot().queue.iter().map(|t| t.id.clone()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_prediction_matches_transition_without_side_effects() {
        let h = harness();
        h.queue.set_shuffle_enabled(true);
        h.queue.play_tracks(tracks(&["a", "b", "c", "d", "e"]), 0).unwrap();
        h.queue.cycle_repeat_mode();

        for _ in 0..7 {
            let predicted = h.queue.predicted_next_track_for_skip().map(|t| t.id.clone());
            assert_eq!(h.queue.predicted_next_track_for_skip().map(|t| t.id.clone()), predicted);
            assert_eq!(h.sink.0.lock().unwrap().len(), 0);

            let before = h.sink.0.lock().unwrap().len();
            let actual = h.queue.play_next().map(|t| t.id.clone());
            assert_eq!(actual, predicted);
            assert_eq!(h.sink.0.lock().unwrap().len(), before + 1);
            h.sink.0.lock().unwrap().clear();
        }
    }

    #[test]
    fn test_prediction_is_none_at_end_without_repeat() {
        let h = harness();
        h.queue.play_tracks(tracks(&["a", "b"]), 1).unwrap();
        assert!(h.queue.predicted_next_track_for_skip().is_none());
    }

    #[test]
    fn test_unplayable_track_is_skipped_with_error() {
        let h = harness();
        h.probe.lock().unwrap().broken.insert("b".to_string());
        h.queue.play_tracks(tracks(&["a", "b", "c"]), 0).unwrap();

        h.queue.play_next();

        assert_eq!(current_id(&h.queue).as_deref(), Some("c"));
        assert_eq!(h.sink.skips("b"), 1);
        let events = h.sink.0.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            PlaybackEvent::TrackSkipped { track_id, reason: SkipReason::Error, .. } if track_id == "b"
        )));
    }

    #[test]
    fn test_all_unplayable_stops_instead_of_looping() {
        let h = harness();
        {
            let mut probe = h.probe.lock().unwrap();
            probe.broken.insert("a".to_string());
            probe.broken.insert("b".to_string());
        }
        h.queue.cycle_repeat_mode();
        h.queue.play_tracks(tracks(&["a", "b"]), 0).unwrap();

        assert_eq!(h.queue.transport(), TransportState::Stopped);
        assert_eq!(h.sink.skips("a") + h.sink.skips("b"), 2);
    }

    #[test]
    fn test_concurrent_next_calls_each_advance_once() {
        let h = harness();
        let ids: Vec<String> = (0..10).map(|i| format!("t{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        h.queue.play_tracks(tracks(&id_refs), 0).unwrap();

        let queue = Arc::new(h.queue);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    queue.play_next();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(current_id(&queue).as_deref(), Some("t4"));
        assert_eq!(h.probe.lock().unwrap().played.len(), 5);
    }

    #[test]
    fn test_play_track_in_context_uses_context_queue() {
        let h = harness();
        let context = tracks(&["a", "b", "c"]);
        h.queue
            .play_track_in_context(Arc::clone(&context[1]), context.clone())
            .unwrap();
        assert_eq!(h.queue.snapshot().queue.len(), 3);
        assert_eq!(current_id(&h.queue).as_deref(), Some("b"));

        h.queue.play_track(Arc::clone(&context[2])).unwrap();
        assert_eq!(h.queue.snapshot().queue.len(), 1);
    }
}
