use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use companion_native_utils::audio::decode_planar;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::LiveError;

pub type PlaybackId = u64;

/// Decoded planar audio ready to be scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Decodes a base64 PCM16 chunk, de-interleaving `channels` channels.
    pub fn decode(chunk: &str, sample_rate: u32, channels: usize) -> Result<Self, LiveError> {
        Ok(Self {
            sample_rate,
            channels: decode_planar(chunk, channels)?,
        })
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration(&self) -> Duration {
        frames_duration(self.frames() as u64, self.sample_rate)
    }
}

/// Time taken by `frames` frames at `sample_rate`, to the nearest nanosecond.
pub fn frames_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let rate = sample_rate as u128;
    let nanos = (frames as u128 * 1_000_000_000 + rate / 2) / rate;
    Duration::from_nanos(nanos as u64)
}

/// An audio output context with its own clock.
///
/// Buffers started on it play independently; a buffer that plays to the end
/// reports its id on the `ended` sender given to [`AudioOutputFactory::open`].
/// A stopped buffer reports nothing.
pub trait AudioOutput: Send + Sync {
    fn current_time(&self) -> Duration;
    fn start(&self, id: PlaybackId, buffer: AudioBuffer, at: Duration);
    fn stop(&self, id: PlaybackId);
    /// Releases the context. Later calls are ignored.
    fn close(&self);
}

#[async_trait]
pub trait AudioOutputFactory: Send + Sync {
    /// Opens the output device. Waiting for the device must not block the runtime.
    async fn open(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Arc<dyn AudioOutput>, LiveError>;
}

/// Gapless, cancelable playback of inbound audio chunks.
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    sample_rate: u32,
    channels: usize,
    // The cursor is `anchor` plus the frames queued since, so it never drifts.
    anchor: Duration,
    queued_frames: u64,
    active: HashSet<PlaybackId>,
    next_id: PlaybackId,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, sample_rate: u32, channels: usize) -> Self {
        let anchor = output.current_time();
        Self {
            output,
            sample_rate,
            channels: channels.max(1),
            anchor,
            queued_frames: 0,
            active: HashSet::new(),
            next_id: 1,
        }
    }

    /// Schedules a chunk right after the previously scheduled one, or now if
    /// the queue has run dry. Malformed or empty chunks are dropped.
    pub fn enqueue(&mut self, chunk: &str) -> Option<PlaybackId> {
        let buffer = match AudioBuffer::decode(chunk, self.sample_rate, self.channels) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Dropping audio chunk: {}", e);
                return None;
            }
        };
        if buffer.frames() == 0 {
            return None;
        }

        let now = self.output.current_time();
        if self.cursor() < now {
            self.restart_at(now);
        }
        let start = self.cursor();
        let duration = buffer.duration();
        let frames = buffer.frames() as u64;
        let id = self.next_id;
        self.next_id += 1;

        self.output.start(id, buffer, start);
        self.active.insert(id);
        self.queued_frames += frames;
        debug!(
            "Scheduled buffer {} at {:?} for {:?} ({} active)",
            id,
            start,
            duration,
            self.active.len()
        );
        Some(id)
    }

    /// Records a natural completion. Returns true when it left nothing playing.
    pub fn on_buffer_ended(&mut self, id: PlaybackId) -> bool {
        self.active.remove(&id) && self.active.is_empty()
    }

    /// Barge-in: stops everything and resets the cursor to now.
    /// Returns the number of buffers stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.stop_active();
        self.restart_at(self.output.current_time());
        stopped
    }

    fn restart_at(&mut self, at: Duration) {
        self.anchor = at;
        self.queued_frames = 0;
    }

    /// Stops and forgets every active buffer. Used during teardown.
    pub fn stop_all(&mut self) -> usize {
        self.stop_active()
    }

    fn stop_active(&mut self) -> usize {
        let stopped = self.active.len();
        for id in self.active.drain() {
            self.output.stop(id);
        }
        stopped
    }

    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Where the next chunk starts playing.
    pub fn cursor(&self) -> Duration {
        self.anchor + frames_duration(self.queued_frames, self.sample_rate)
    }
}
