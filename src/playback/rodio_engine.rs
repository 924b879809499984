use super::engine::PlaybackEngine;
use crate::audio::Track;
use crate::error::{CoreError, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::fs::File;
use std::io::BufReader;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Real audio output through rodio.
///
/// `OutputStream` cannot leave the thread that opened it, so a small thread
/// owns it for the engine's lifetime; the engine itself only keeps the
/// sendable handle and sink.
pub struct RodioEngine {
    stream_handle: OutputStreamHandle,
    sink: Option<Sink>,
    volume: f32,
    // Dropping this sender lets the stream thread exit
    _stream_guard: mpsc::Sender<()>,
}

impl RodioEngine {
    pub fn new(volume: f32) -> Result<Self> {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (guard_tx, guard_rx) = mpsc::channel::<()>();

        thread::Builder::new()
            .name("lyrebird-audio".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = handle_tx.send(Ok(handle));
                    // Blocks until the engine is dropped
                    let _ = guard_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(e.to_string()));
                }
            })?;

        let stream_handle = handle_rx
            .recv()
            .map_err(|e| CoreError::Engine(format!("audio thread exited: {}", e)))?
            .map_err(|e| CoreError::Engine(format!("no audio output device: {}", e)))?;

        info!("Audio output opened");
        Ok(Self {
            stream_handle,
            sink: None,
            volume: volume.clamp(0.0, 1.0),
            _stream_guard: guard_tx,
        })
    }
}

impl PlaybackEngine for RodioEngine {
    fn play(&mut self, track: &Track) -> Result<()> {
        self.stop();

        let file = File::open(&track.file_path)
            .map_err(|e| CoreError::Engine(format!("failed to open {}: {}", track.file_path.display(), e)))?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| {
            CoreError::Engine(format!(
                "failed to decode '{}': {}. The file may be corrupted or use an unsupported format.",
                track.file_path.display(),
                e
            ))
        })?;

        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| CoreError::Engine(format!("failed to create sink: {}", e)))?;
        sink.set_volume(self.volume);
        sink.append(source);

        debug!("Playing {}", track.file_path.display());
        self.sink = Some(sink);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn resume(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    fn seek(&mut self, position: f64) -> Result<()> {
        match &self.sink {
            Some(sink) => sink
                .try_seek(Duration::from_secs_f64(position.max(0.0)))
                .map_err(|e| CoreError::Engine(format!("seek failed: {}", e))),
            None => Ok(()),
        }
    }

    fn position(&self) -> f64 {
        self.sink
            .as_ref()
            .map(|sink| sink.get_pos().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().map(|sink| sink.empty()).unwrap_or(false)
    }
}
