use crate::error::{CoreError, Result};
use crate::events::{CoreEvent, EventBus};
use crate::playback::PlaybackQueue;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Whatever the timer puts to sleep when it runs out.
pub trait SleepTarget: Send + Sync {
    fn sleep_timer_fired(&self);
}

impl SleepTarget for PlaybackQueue {
    fn sleep_timer_fired(&self) {
        if self.pause() {
            info!("Sleep timer paused playback");
        }
    }
}

#[derive(Default)]
struct TimerState {
    deadline: Option<Instant>,
    fire_date: Option<DateTime<Utc>>,
    // Bumped by every start and cancel; a countdown only fires for its own generation
    generation: u64,
    countdown: Option<JoinHandle<()>>,
}

/// One-shot countdown that pauses playback when it expires.
///
/// Remaining time is always derived from the deadline. Expiry and `cancel`
/// both settle under the same lock, so the target is paused at most once
/// per `start`.
pub struct SleepTimer {
    state: Arc<Mutex<TimerState>>,
    target: Arc<dyn SleepTarget>,
    events: Arc<EventBus>,
    runtime: Handle,
}

impl SleepTimer {
    pub fn new(runtime: Handle, target: Arc<dyn SleepTarget>, events: Arc<EventBus>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState::default())),
            target,
            events,
            runtime,
        }
    }

    /// Start (or restart) the countdown.
    pub fn start(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return Err(CoreError::invalid("sleep timer duration must be positive"));
        }
        let too_long = || CoreError::invalid("sleep timer duration is too long");
        let fire_date = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|wall_clock| Utc::now().checked_add_signed(wall_clock))
            .ok_or_else(too_long)?;
        let deadline = Instant::now().checked_add(duration).ok_or_else(too_long)?;

        {
            let mut state = lock(&self.state);
            if let Some(previous) = state.countdown.take() {
                previous.abort();
            }

            state.generation += 1;
            let generation = state.generation;
            state.deadline = Some(deadline);
            state.fire_date = Some(fire_date);

            let timer_state = Arc::clone(&self.state);
            let target = Arc::clone(&self.target);
            let events = Arc::clone(&self.events);
            state.countdown = Some(self.runtime.spawn(async move {
                tokio::time::sleep_until(deadline).await;
                fire(&timer_state, generation, target.as_ref(), &events);
            }));
        }

        info!("Sleep timer set for {}s", duration.as_secs());
        self.events.emit(CoreEvent::SleepTimerChanged { active: true });
        Ok(())
    }

    /// Returns false when no timer was running.
    pub fn cancel(&self) -> bool {
        {
            let mut state = lock(&self.state);
            if state.deadline.is_none() {
                return false;
            }
            state.generation += 1;
            state.deadline = None;
            state.fire_date = None;
            if let Some(countdown) = state.countdown.take() {
                countdown.abort();
            }
        }

        debug!("Sleep timer cancelled");
        self.events.emit(CoreEvent::SleepTimerChanged { active: false });
        true
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).deadline.is_some()
    }

    /// Zero when inactive.
    pub fn remaining_time(&self) -> Duration {
        lock(&self.state)
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn fire_date(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).fire_date
    }
}

impl Drop for SleepTimer {
    fn drop(&mut self) {
        if let Some(countdown) = lock(&self.state).countdown.take() {
            countdown.abort();
        }
    }
}

fn fire(state: &Mutex<TimerState>, generation: u64, target: &dyn SleepTarget, events: &EventBus) {
    {
        let mut state = lock(state);
        if state.generation != generation || state.deadline.is_none() {
            debug!("Stale sleep timer countdown ignored");
            return;
        }
        state.deadline = None;
        state.fire_date = None;
        state.countdown = None;
    }

    info!("Sleep timer expired");
    target.sleep_timer_fired();
    events.emit(CoreEvent::SleepTimerChanged { active: false });
}

fn lock(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
