// Playback - the queue state machine and the engines it drives
// The queue decides what plays; engines only make sound

pub mod engine; // PlaybackEngine trait + headless SilentEngine
pub mod queue; // PlaybackQueue state machine
#[cfg(feature = "audio")]
pub mod rodio_engine; // real output through rodio

pub use engine::{PlaybackEngine, SilentEngine};
pub use queue::{PlaybackQueue, PlaybackSnapshot, RepeatMode, TransportState};
#[cfg(feature = "audio")]
pub use rodio_engine::RodioEngine;
