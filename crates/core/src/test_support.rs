//! Device-free, network-free collaborators for exercising sessions in tests.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use companion_native_utils::audio::encode_i16;
use gemini_live_types::{ClientMessage, ServerMessage, Setup};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::capture::{MediaTrack, MicStream, Microphone};
use crate::channel::{ChannelEvent, Connection, LiveChannel, LiveConnector};
use crate::error::LiveError;
use crate::events::{SessionEvent, Status};
use crate::playback::{AudioBuffer, AudioOutput, AudioOutputFactory, PlaybackId};

pub const WAIT: Duration = Duration::from_secs(2);

/// Base64 PCM16 for the given samples.
pub fn pcm_chunk(samples: &[i16]) -> String {
    encode_i16(samples)
}

pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_status(rx: &mut watch::Receiver<Status>, expected: Status) {
    let reached = tokio::time::timeout(WAIT, rx.wait_for(|s| *s == expected)).await;
    assert!(
        matches!(reached, Ok(Ok(_))),
        "status never became {expected}"
    );
}

pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Shared record of release calls, in the order the fakes saw them.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<&'static str>>>);

impl Journal {
    pub fn record(&self, entry: &'static str) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct FakeChannel {
    sent: Mutex<Vec<ClientMessage>>,
    closed: AtomicBool,
    hang_on_close: bool,
    journal: Journal,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn wait_for_sent(&self, count: usize) {
        eventually(|| self.sent.lock().unwrap().len() >= count).await;
    }
}

#[async_trait]
impl LiveChannel for FakeChannel {
    async fn send(&self, message: ClientMessage) -> Result<(), LiveError> {
        if self.is_closed() {
            return Err(LiveError::NotConnected);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.journal.record("channel.close");
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
    }
}

/// One channel handed out by [`FakeConnector`], with the sender that drives it.
#[derive(Clone)]
pub struct FakeSession {
    pub setup: Setup,
    pub channel: Arc<FakeChannel>,
    events: mpsc::Sender<ChannelEvent>,
}

impl FakeSession {
    pub async fn opened(&self) {
        self.events.send(ChannelEvent::Opened).await.unwrap();
    }

    pub async fn message(&self, message: serde_json::Value) {
        let message: ServerMessage = serde_json::from_value(message).unwrap();
        self.events
            .send(ChannelEvent::Message(message))
            .await
            .unwrap();
    }

    pub async fn fail(&self, error: LiveError) {
        self.events.send(ChannelEvent::Failed(error)).await.unwrap();
    }

    pub async fn closed(&self, reason: &str) {
        self.events
            .send(ChannelEvent::Closed {
                reason: reason.to_string(),
            })
            .await
            .unwrap();
    }
}

#[derive(Default)]
pub struct FakeConnector {
    sessions: Mutex<Vec<FakeSession>>,
    fail_with: Option<LiveError>,
    hang_on_close: bool,
    journal: Journal,
}

impl FakeConnector {
    pub fn failing(error: LiveError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::default()
        }
    }

    /// Hands out channels whose `close` never returns.
    pub fn hanging_on_close() -> Self {
        Self {
            hang_on_close: true,
            ..Self::default()
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn connects(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn last(&self) -> FakeSession {
        self.sessions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session was opened")
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, setup: Setup) -> Result<Connection, LiveError> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        let channel = Arc::new(FakeChannel {
            hang_on_close: self.hang_on_close,
            journal: self.journal.clone(),
            ..FakeChannel::default()
        });
        let (events, rx) = mpsc::channel(64);
        self.sessions.lock().unwrap().push(FakeSession {
            setup,
            channel: channel.clone(),
            events,
        });
        Ok(Connection {
            channel,
            events: rx,
        })
    }
}

struct FakeTrack {
    open: Arc<AtomicUsize>,
    stopped: bool,
    frames: mpsc::Sender<Vec<f32>>,
    journal: Journal,
}

impl MediaTrack for FakeTrack {
    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            // The capture node owns the frame receiver; it is gone once disconnected.
            if self.frames.is_closed() {
                self.journal.record("capture.disconnect");
            }
            self.journal.record("track.stop");
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Microphone that either refuses access or yields frames pushed with [`feed`](Self::feed).
#[derive(Default)]
pub struct FakeMicrophone {
    deny: bool,
    frames: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    open_tracks: Arc<AtomicUsize>,
    journal: Journal,
}

impl FakeMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub async fn feed(&self, frame: Vec<f32>) {
        let frames = self.frames.lock().unwrap().clone();
        if let Some(frames) = frames {
            let _ = frames.send(frame).await;
        }
    }

    pub fn tracks_open(&self) -> usize {
        self.open_tracks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Microphone for FakeMicrophone {
    async fn open(&self, _sample_rate: u32, _frame_size: usize) -> Result<MicStream, LiveError> {
        if self.deny {
            return Err(LiveError::Permission("Permission denied".to_string()));
        }
        let (tx, frames) = mpsc::channel(16);
        *self.frames.lock().unwrap() = Some(tx.clone());
        self.open_tracks.fetch_add(1, Ordering::SeqCst);
        Ok(MicStream {
            frames,
            track: Box::new(FakeTrack {
                open: self.open_tracks.clone(),
                stopped: false,
                frames: tx,
                journal: self.journal.clone(),
            }),
        })
    }
}

/// Audio output with a manually driven clock.
#[derive(Default)]
pub struct FakeOutput {
    now: Mutex<Duration>,
    started: Mutex<Vec<(PlaybackId, Duration)>>,
    stopped: Mutex<Vec<PlaybackId>>,
    closed: AtomicBool,
    ended: Mutex<Option<mpsc::UnboundedSender<PlaybackId>>>,
    journal: Journal,
}

impl FakeOutput {
    pub fn set_time(&self, now: Duration) {
        *self.now.lock().unwrap() = now;
    }

    pub fn started(&self) -> Vec<(PlaybackId, Duration)> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn wait_for_started(&self, count: usize) {
        eventually(|| self.started.lock().unwrap().len() >= count).await;
    }

    /// Plays `id` to its natural end.
    pub fn finish(&self, id: PlaybackId) {
        if let Some(ended) = self.ended.lock().unwrap().as_ref() {
            let _ = ended.send(id);
        }
    }
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn start(&self, id: PlaybackId, _buffer: AudioBuffer, at: Duration) {
        self.started.lock().unwrap().push((id, at));
    }

    fn stop(&self, id: PlaybackId) {
        self.stopped.lock().unwrap().push(id);
        self.journal.record("output.stop");
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.journal.record("output.close");
    }
}

#[derive(Default)]
pub struct FakeOutputFactory {
    output: Arc<FakeOutput>,
    opens: AtomicUsize,
}

impl FakeOutputFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            output: Arc::new(FakeOutput {
                journal,
                ..FakeOutput::default()
            }),
            ..Self::default()
        }
    }

    pub fn output(&self) -> Arc<FakeOutput> {
        self.output.clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutputFactory for FakeOutputFactory {
    async fn open(
        &self,
        _sample_rate: u32,
        ended: mpsc::UnboundedSender<PlaybackId>,
    ) -> Result<Arc<dyn AudioOutput>, LiveError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.output.closed.store(false, Ordering::SeqCst);
        *self.output.ended.lock().unwrap() = Some(ended);
        Ok(self.output.clone())
    }
}
