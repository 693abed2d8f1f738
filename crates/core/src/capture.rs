use std::sync::Arc;

use async_trait::async_trait;
use companion_native_utils::audio::encode_pcm16;
use gemini_live_types::{Blob, ClientMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::LiveChannel;
use crate::error::LiveError;

/// An open microphone track. Stopping it releases the device.
pub trait MediaTrack: Send + Sync {
    fn stop(&mut self);
}

/// A live microphone stream: fixed-size mono float frames at the requested rate.
pub struct MicStream {
    pub frames: mpsc::Receiver<Vec<f32>>,
    pub track: Box<dyn MediaTrack>,
}

#[async_trait]
pub trait Microphone: Send + Sync {
    /// Opens the microphone. Refused access or a missing device is
    /// [`LiveError::Permission`].
    async fn open(&self, sample_rate: u32, frame_size: usize) -> Result<MicStream, LiveError>;
}

/// Encodes one captured frame as a 16 kHz PCM16 media chunk.
pub fn encode_frame(frame: &[f32]) -> Blob {
    Blob::pcm16k(encode_pcm16(frame))
}

/// Turns microphone frames into media chunks on the live channel.
///
/// The pipeline owns the track until [`release_tracks`](Self::release_tracks)
/// and the forwarding node until [`disconnect`](Self::disconnect).
pub struct CapturePipeline {
    frames: Option<mpsc::Receiver<Vec<f32>>>,
    track: Option<Box<dyn MediaTrack>>,
    node: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub fn new(stream: MicStream) -> Self {
        Self {
            frames: Some(stream.frames),
            track: Some(stream.track),
            node: None,
        }
    }

    /// Starts forwarding. Each frame is encoded and sent on its own, in
    /// capture order. Returns false if the pipeline already started or was stopped.
    pub fn start(&mut self, channel: Arc<dyn LiveChannel>) -> bool {
        let Some(mut frames) = self.frames.take() else {
            return false;
        };
        info!("Starting audio capture");
        self.node = Some(tokio::spawn(async move {
            let mut sent = 0u64;
            while let Some(frame) = frames.recv().await {
                let message = ClientMessage::media(encode_frame(&frame));
                match channel.send(message).await {
                    Ok(()) => sent += 1,
                    Err(LiveError::NotConnected) => break,
                    Err(e) => warn!("Dropping microphone frame: {}", e),
                }
            }
            debug!("Capture node finished after {} frames", sent);
        }));
        true
    }

    pub fn is_running(&self) -> bool {
        self.node.as_ref().is_some_and(|node| !node.is_finished())
    }

    /// Detaches the forwarding node and waits until it has dropped the
    /// frame receiver. No frame is sent afterwards.
    pub async fn disconnect(&mut self) {
        if let Some(node) = self.node.take() {
            node.abort();
            let _ = node.await;
        }
        self.frames = None;
    }

    fn abort_node(&mut self) {
        if let Some(node) = self.node.take() {
            node.abort();
        }
        self.frames = None;
    }

    pub fn release_tracks(&mut self) {
        if let Some(mut track) = self.track.take() {
            track.stop();
            info!("Microphone released");
        }
    }

    pub fn has_track(&self) -> bool {
        self.track.is_some()
    }

    /// Synchronous release for error paths and drop; the node is aborted
    /// without waiting for it.
    pub fn stop(&mut self) {
        self.abort_node();
        self.release_tracks();
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
