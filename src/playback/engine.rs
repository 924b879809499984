use crate::audio::Track;
use crate::error::Result;
use std::time::Instant;

/// The audio engine behind the queue. Decoding and output live on the other side.
///
/// The queue owns its engine and only calls it while holding its own lock,
/// so implementations never see two commands at once.
pub trait PlaybackEngine: Send {
    /// Start `track` from the beginning, replacing whatever was playing.
    fn play(&mut self, track: &Track) -> Result<()>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    fn seek(&mut self, position: f64) -> Result<()>;
    /// Seconds into the current track.
    fn position(&self) -> f64;
    /// True once the current track has played to its end.
    fn is_finished(&self) -> bool;
}

/// Engine without audio output. Advances a clock so position and end-of-track
/// behave as if the track were playing.
#[derive(Debug, Default)]
pub struct SilentEngine {
    duration: f64,
    offset: f64,
    started_at: Option<Instant>,
    loaded: bool,
}

impl SilentEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackEngine for SilentEngine {
    fn play(&mut self, track: &Track) -> Result<()> {
        self.duration = track.duration_secs();
        self.offset = 0.0;
        self.started_at = Some(Instant::now());
        self.loaded = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.offset = self.position();
        self.started_at = None;
    }

    fn resume(&mut self) {
        if self.loaded && self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    fn stop(&mut self) {
        *self = Self::default();
    }

    fn seek(&mut self, position: f64) -> Result<()> {
        self.offset = position.max(0.0);
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
        Ok(())
    }

    fn position(&self) -> f64 {
        let running = self
            .started_at
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let position = self.offset + running;
        if self.duration > 0.0 {
            position.min(self.duration)
        } else {
            position
        }
    }

    fn is_finished(&self) -> bool {
        self.loaded && self.duration > 0.0 && self.position() >= self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_silent_engine_seek_and_pause() {
        let track = Track::new("t", PathBuf::from("t.mp3")).with_duration(Duration::from_secs(100));
        let mut engine = SilentEngine::new();
        engine.play(&track).unwrap();
        engine.pause();
        engine.seek(40.0).unwrap();

        assert!((engine.position() - 40.0).abs() < 0.01);
        assert!(!engine.is_finished());

        engine.seek(500.0).unwrap();
        assert_eq!(engine.position(), 100.0);
        assert!(engine.is_finished());
    }

    #[test]
    fn test_stopped_engine_is_not_finished() {
        let mut engine = SilentEngine::new();
        engine.stop();
        assert!(!engine.is_finished());
        assert_eq!(engine.position(), 0.0);
    }
}
