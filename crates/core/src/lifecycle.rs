use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use companion_native_utils::audio::{INPUT_FRAME_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use gemini_live_types::{Blob, ClientMessage, ServerMessage};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::RetryPolicy;
use crate::capture::{CapturePipeline, Microphone};
use crate::channel::{ChannelEvent, LiveChannel, LiveConnector};
use crate::dispatcher::{ToolDispatcher, ToolReply};
use crate::error::LiveError;
use crate::events::{EventSink, SessionEvent, Status};
use crate::personality::{Personality, PersonalityUpdate, session_setup};
use crate::playback::{AudioOutput, AudioOutputFactory, PlaybackId, PlaybackScheduler};
use crate::remote::{Geolocator, RemoteTools};

pub const DEFAULT_LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

// Teardown moves on without the channel after this long.
const CHANNEL_CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything outside the orchestrator that a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn LiveConnector>,
    pub microphone: Arc<dyn Microphone>,
    pub output: Arc<dyn AudioOutputFactory>,
    pub remote: Arc<dyn RemoteTools>,
    pub geolocator: Option<Arc<dyn Geolocator>>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model: String,
    pub retry: RetryPolicy,
    /// Samples per outbound microphone frame.
    pub frame_size: usize,
    pub output_channels: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.to_string(),
            retry: RetryPolicy::default(),
            frame_size: INPUT_FRAME_SIZE,
            output_channels: 1,
        }
    }
}

struct StatusCell {
    tx: watch::Sender<Status>,
    events: EventSink,
}

impl StatusCell {
    fn get(&self) -> Status {
        *self.tx.borrow()
    }

    fn set(&self, status: Status) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!("Session status: {}", status);
            let _ = self.events.send(SessionEvent::StatusChanged(status));
        }
    }
}

enum Command {
    Input(Blob),
    Stop(oneshot::Sender<()>),
}

struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Owns at most one live session at a time and drives its lifecycle.
pub struct Orchestrator {
    collaborators: Collaborators,
    config: OrchestratorConfig,
    personality: Personality,
    status: Arc<StatusCell>,
    events: EventSink,
    session: Option<SessionHandle>,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        config: OrchestratorConfig,
        personality: Personality,
        events: EventSink,
    ) -> Self {
        let (tx, _) = watch::channel(Status::Idle);
        Self {
            collaborators,
            config,
            personality,
            status: Arc::new(StatusCell {
                tx,
                events: events.clone(),
            }),
            events,
            session: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status.tx.subscribe()
    }

    pub fn personality(&self) -> &Personality {
        &self.personality
    }

    /// True while a session task is running, including while it connects.
    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.task.is_finished())
    }

    /// Acquires the microphone and the audio output, then opens the channel.
    ///
    /// On failure nothing stays allocated and the status is `error`. A
    /// rejected credential is also reported with [`SessionEvent::ApiKeyInvalid`].
    pub async fn start_session(&mut self) -> Result<(), LiveError> {
        if self.is_active() {
            return Err(LiveError::AlreadyActive);
        }
        if let Some(finished) = self.session.take() {
            let _ = finished.task.await;
        }

        self.status.set(Status::Connecting);
        match self.open_session().await {
            Ok(handle) => {
                self.session = Some(handle);
                Ok(())
            }
            Err(e) => {
                error!("Could not start session: {}", e);
                if matches!(e, LiveError::InvalidCredential(_)) {
                    let _ = self.events.send(SessionEvent::ApiKeyInvalid);
                }
                self.status.set(Status::Error);
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> Result<SessionHandle, LiveError> {
        let collaborators = &self.collaborators;
        let stream = collaborators
            .microphone
            .open(INPUT_SAMPLE_RATE, self.config.frame_size)
            .await?;
        let mut capture = CapturePipeline::new(stream);

        let (ended_tx, playback_ended) = mpsc::unbounded_channel();
        let output = match collaborators.output.open(OUTPUT_SAMPLE_RATE, ended_tx).await {
            Ok(output) => output,
            Err(e) => {
                capture.stop();
                return Err(e);
            }
        };

        let setup = session_setup(&self.personality, &self.config.model);
        let connection = match collaborators.connector.connect(setup).await {
            Ok(connection) => connection,
            Err(e) => {
                capture.stop();
                output.close();
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let (replies_tx, tool_replies) = mpsc::unbounded_channel();
        let dispatcher = ToolDispatcher::new(
            collaborators.remote.clone(),
            collaborators.geolocator.clone(),
            self.config.retry.clone(),
            self.events.clone(),
            replies_tx,
            cancel.clone(),
        );
        let session = Session {
            channel: connection.channel,
            channel_events: connection.events,
            capture,
            playback: PlaybackScheduler::new(
                output.clone(),
                OUTPUT_SAMPLE_RATE,
                self.config.output_channels,
            ),
            output,
            playback_ended,
            dispatcher,
            tool_replies,
            cancel,
            phase: Phase::Connecting,
            speaking: false,
            heard: String::new(),
            pending_input: VecDeque::new(),
            remote_in_flight: 0,
            status: self.status.clone(),
            events: self.events.clone(),
            torn_down: false,
        };

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(session.run(commands_rx));
        Ok(SessionHandle { commands, task })
    }

    /// Tears the session down and returns to `idle`. Safe to call at any time.
    pub async fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            let (ack_tx, ack_rx) = oneshot::channel();
            if session.commands.send(Command::Stop(ack_tx)).is_ok() {
                let _ = ack_rx.await;
            }
            if let Err(e) = session.task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
        self.status.set(Status::Idle);
    }

    /// Forwards out-of-band media into the live channel. Sends made while the
    /// channel is still connecting are queued until it opens.
    pub fn send_realtime_input(&self, blob: Blob) -> Result<(), LiveError> {
        match &self.session {
            Some(session) if !session.task.is_finished() => session
                .commands
                .send(Command::Input(blob))
                .map_err(|_| LiveError::NotConnected),
            _ => Err(LiveError::NotConnected),
        }
    }

    /// Replaces the personality and restarts the session with it.
    pub async fn set_personality(&mut self, personality: Personality) -> Result<(), LiveError> {
        if personality == self.personality {
            return Ok(());
        }
        info!("Personality changed, restarting session");
        self.personality = personality;
        if self.is_active() {
            self.stop_session().await;
        }
        self.start_session().await
    }

    pub async fn apply_personality_update(
        &mut self,
        update: &PersonalityUpdate,
    ) -> Result<(), LiveError> {
        let next = self.personality.updated(update);
        self.set_personality(next).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Listening,
    Searching,
    Reading,
}

enum Flow {
    Continue,
    Exit,
}

/// State owned by the session task. Only this task touches the cursor and
/// the active playback set.
struct Session {
    channel: Arc<dyn LiveChannel>,
    channel_events: mpsc::Receiver<ChannelEvent>,
    capture: CapturePipeline,
    playback: PlaybackScheduler,
    output: Arc<dyn AudioOutput>,
    playback_ended: mpsc::UnboundedReceiver<PlaybackId>,
    dispatcher: ToolDispatcher,
    tool_replies: mpsc::UnboundedReceiver<ToolReply>,
    cancel: CancellationToken,
    phase: Phase,
    speaking: bool,
    /// Input transcription of the current user turn.
    heard: String,
    pending_input: VecDeque<Blob>,
    remote_in_flight: usize,
    status: Arc<StatusCell>,
    events: EventSink,
    torn_down: bool,
}

impl Session {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.publish_status();
        loop {
            // Inbound traffic that is already queued goes before commands.
            let flow = tokio::select! {
                biased;
                event = self.channel_events.recv() => self.on_channel_event(event).await,
                Some(reply) = self.tool_replies.recv() => self.on_tool_reply(reply).await,
                Some(id) = self.playback_ended.recv() => self.on_playback_ended(id),
                command = commands.recv() => self.on_command(command).await,
            };
            if let Flow::Exit = flow {
                break;
            }
        }
        debug!("Session task finished");
    }

    async fn on_command(&mut self, command: Option<Command>) -> Flow {
        match command {
            Some(Command::Input(blob)) => {
                self.send_input(blob).await;
                Flow::Continue
            }
            Some(Command::Stop(ack)) => {
                info!("Stopping session");
                self.teardown().await;
                let _ = ack.send(());
                Flow::Exit
            }
            None => {
                self.teardown().await;
                Flow::Exit
            }
        }
    }

    async fn on_channel_event(&mut self, event: Option<ChannelEvent>) -> Flow {
        match event {
            Some(ChannelEvent::Opened) => {
                self.on_open().await;
                Flow::Continue
            }
            Some(ChannelEvent::Message(message)) => {
                self.on_message(message).await;
                Flow::Continue
            }
            Some(ChannelEvent::Failed(e)) => {
                error!("Live channel failed: {}", e);
                if matches!(e, LiveError::InvalidCredential(_)) {
                    let _ = self.events.send(SessionEvent::ApiKeyInvalid);
                }
                self.teardown().await;
                self.status.set(Status::Error);
                Flow::Exit
            }
            Some(ChannelEvent::Closed { reason }) => {
                info!("Live channel closed: {}", reason);
                self.teardown().await;
                self.status.set(Status::Idle);
                Flow::Exit
            }
            None => {
                info!("Live channel dropped");
                self.teardown().await;
                self.status.set(Status::Idle);
                Flow::Exit
            }
        }
    }

    async fn on_open(&mut self) {
        if self.phase != Phase::Connecting {
            return;
        }
        info!("Live channel open");
        self.phase = Phase::Listening;
        self.capture.start(self.channel.clone());
        while let Some(blob) = self.pending_input.pop_front() {
            self.forward(blob).await;
        }
        self.publish_status();
    }

    async fn send_input(&mut self, blob: Blob) {
        if self.phase == Phase::Connecting {
            debug!("Queueing {} input until the channel opens", blob.mime_type);
            self.pending_input.push_back(blob);
        } else {
            self.forward(blob).await;
        }
    }

    async fn forward(&self, blob: Blob) {
        if let Err(e) = self.channel.send(ClientMessage::media(blob)).await {
            warn!("Failed to send realtime input: {}", e);
        }
    }

    async fn on_message(&mut self, message: ServerMessage) {
        if message.setup_complete.is_some() {
            self.on_open().await;
        }
        if self.phase == Phase::Reading {
            self.phase = Phase::Listening;
        }
        if let Some(go_away) = &message.go_away {
            warn!(
                "Server will close the session soon (time left: {})",
                go_away.time_left.as_deref().unwrap_or("unknown")
            );
        }

        if let Some(content) = &message.server_content {
            if let Some(heard) = &content.input_transcription {
                self.heard.push_str(&heard.text);
            }
            if let Some(said) = &content.output_transcription {
                debug!("Assistant said: {}", said.text);
            }
            if content.model_turn.is_some() || content.turn_complete == Some(true) {
                self.flush_transcription();
            }
        }

        if let Some(chunk) = message.audio_data() {
            self.playback.enqueue(chunk);
        }
        if message.is_interrupted() {
            let stopped = self.playback.interrupt();
            info!("Assistant interrupted, stopped {} buffers", stopped);
        }

        if let Some(tool_call) = message.tool_call {
            let spawned = self.dispatcher.dispatch(tool_call.function_calls);
            if spawned > 0 {
                self.remote_in_flight += spawned;
                self.phase = Phase::Searching;
            }
        }

        self.sync_speaking();
        self.publish_status();
    }

    fn flush_transcription(&mut self) {
        let text = self.heard.trim();
        if !text.is_empty() {
            let _ = self
                .events
                .send(SessionEvent::Transcription(text.to_string()));
        }
        self.heard.clear();
    }

    fn on_playback_ended(&mut self, id: PlaybackId) -> Flow {
        if self.playback.on_buffer_ended(id) {
            debug!("Playback queue drained");
        }
        self.sync_speaking();
        self.publish_status();
        Flow::Continue
    }

    async fn on_tool_reply(&mut self, reply: ToolReply) -> Flow {
        match reply {
            ToolReply::Response { response, remote } => {
                debug!("Answering tool call {} ({})", response.name, response.id);
                let message = ClientMessage::function_responses(vec![response]);
                if let Err(e) = self.channel.send(message).await {
                    warn!("Failed to send tool response: {}", e);
                }
                if remote {
                    self.remote_in_flight = self.remote_in_flight.saturating_sub(1);
                    if self.remote_in_flight == 0 && self.phase == Phase::Searching {
                        self.phase = Phase::Reading;
                    }
                }
                self.publish_status();
                Flow::Continue
            }
            ToolReply::Fatal { id, error } => {
                error!("Ending session, tool call {} hit: {}", id, error);
                let _ = self.events.send(SessionEvent::ApiKeyInvalid);
                self.teardown().await;
                self.status.set(Status::Error);
                Flow::Exit
            }
        }
    }

    fn sync_speaking(&mut self) {
        let speaking = self.playback.is_speaking();
        if speaking != self.speaking {
            self.speaking = speaking;
            let _ = self.events.send(SessionEvent::SpeakingChanged(speaking));
        }
    }

    fn publish_status(&self) {
        let status = match self.phase {
            Phase::Connecting => Status::Connecting,
            Phase::Searching => Status::Searching,
            Phase::Reading => Status::Reading,
            Phase::Listening if self.speaking => Status::Speaking,
            Phase::Listening => Status::Listening,
        };
        self.status.set(status);
    }

    /// Releases everything in a fixed order: channel, capture node,
    /// microphone track, playback buffers, audio output.
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if tokio::time::timeout(CHANNEL_CLOSE_TIMEOUT, self.channel.close())
            .await
            .is_err()
        {
            warn!("Live channel did not close within {:?}", CHANNEL_CLOSE_TIMEOUT);
        }
        self.capture.disconnect().await;
        self.capture.release_tracks();
        let stopped = self.playback.stop_all();
        self.output.close();

        self.cancel.cancel();
        self.pending_input.clear();
        self.sync_speaking();
        info!("Session torn down ({} buffers stopped)", stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Expression;
    use crate::remote::{MockRemoteTools, SearchSummary};
    use crate::test_support::{
        FakeConnector, FakeMicrophone, FakeOutputFactory, Journal, drain_events, eventually,
        pcm_chunk, wait_for_status,
    };
    use serde_json::json;

    struct Rig {
        orchestrator: Orchestrator,
        connector: Arc<FakeConnector>,
        microphone: Arc<FakeMicrophone>,
        output: Arc<FakeOutputFactory>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        status: watch::Receiver<Status>,
        journal: Journal,
    }

    const RELEASE_ORDER: [&str; 5] = [
        "channel.close",
        "capture.disconnect",
        "track.stop",
        "output.stop",
        "output.close",
    ];

    fn rig_with(
        microphone: FakeMicrophone,
        connector: FakeConnector,
        remote: MockRemoteTools,
    ) -> Rig {
        let journal = Journal::default();
        let connector = Arc::new(connector.with_journal(journal.clone()));
        let microphone = Arc::new(microphone.with_journal(journal.clone()));
        let output = Arc::new(FakeOutputFactory::with_journal(journal.clone()));
        let (events_tx, events) = mpsc::unbounded_channel();
        let collaborators = Collaborators {
            connector: connector.clone(),
            microphone: microphone.clone(),
            output: output.clone(),
            remote: Arc::new(remote),
            geolocator: None,
        };
        let orchestrator = Orchestrator::new(
            collaborators,
            OrchestratorConfig::default(),
            Personality::default(),
            events_tx,
        );
        let status = orchestrator.subscribe_status();
        Rig {
            orchestrator,
            connector,
            microphone,
            output,
            events,
            status,
            journal,
        }
    }

    fn rig() -> Rig {
        rig_with(
            FakeMicrophone::new(),
            FakeConnector::default(),
            MockRemoteTools::new(),
        )
    }

    async fn open_session(rig: &mut Rig) {
        rig.orchestrator.start_session().await.unwrap();
        rig.connector.last().opened().await;
        wait_for_status(&mut rig.status, Status::Listening).await;
    }

    // Opens a session with one chunk of model audio still playing.
    async fn speaking_session(rig: &mut Rig) {
        open_session(rig).await;
        rig.connector
            .last()
            .message(json!({"serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": pcm_chunk(&[0; 2400])}}
            ]}}}))
            .await;
        wait_for_status(&mut rig.status, Status::Speaking).await;
        assert!(rig.journal.entries().is_empty());
    }

    fn statuses(events: &[SessionEvent]) -> Vec<Status> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StatusChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn permission_denied_allocates_nothing() {
        let mut rig = rig_with(
            FakeMicrophone::denying(),
            FakeConnector::default(),
            MockRemoteTools::new(),
        );

        let result = rig.orchestrator.start_session().await;

        assert!(matches!(result, Err(LiveError::Permission(_))));
        assert_eq!(rig.orchestrator.status(), Status::Error);
        assert!(!rig.orchestrator.is_active());
        assert_eq!(rig.connector.connects(), 0);
        assert_eq!(rig.output.opens(), 0);
        assert_eq!(rig.microphone.tracks_open(), 0);
        assert_eq!(
            statuses(&drain_events(&mut rig.events)),
            [Status::Connecting, Status::Error]
        );

        rig.orchestrator.stop_session().await;
        assert_eq!(rig.orchestrator.status(), Status::Idle);
    }

    #[tokio::test]
    async fn rejected_credential_on_connect_is_reported_once() {
        let mut rig = rig_with(
            FakeMicrophone::new(),
            FakeConnector::failing(LiveError::InvalidCredential("API key not valid".into())),
            MockRemoteTools::new(),
        );

        let result = rig.orchestrator.start_session().await;

        assert!(matches!(result, Err(LiveError::InvalidCredential(_))));
        assert_eq!(rig.orchestrator.status(), Status::Error);
        assert_eq!(rig.microphone.tracks_open(), 0);
        assert!(rig.output.output().is_closed());
        let invalid = drain_events(&mut rig.events)
            .into_iter()
            .filter(|e| *e == SessionEvent::ApiKeyInvalid)
            .count();
        assert_eq!(invalid, 1);
    }

    #[tokio::test]
    async fn stop_twice_is_a_no_op() {
        let mut rig = rig();
        open_session(&mut rig).await;

        rig.orchestrator.stop_session().await;
        let session = rig.connector.last();
        assert_eq!(rig.orchestrator.status(), Status::Idle);
        assert!(session.channel.is_closed());
        assert_eq!(rig.microphone.tracks_open(), 0);
        assert!(rig.output.output().is_closed());
        drain_events(&mut rig.events);

        rig.orchestrator.stop_session().await;
        assert_eq!(rig.orchestrator.status(), Status::Idle);
        assert!(drain_events(&mut rig.events).is_empty());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut rig = rig();
        open_session(&mut rig).await;

        assert_eq!(
            rig.orchestrator.start_session().await,
            Err(LiveError::AlreadyActive)
        );
        assert_eq!(rig.connector.connects(), 1);
        rig.orchestrator.stop_session().await;
    }

    #[tokio::test]
    async fn microphone_frames_reach_the_channel() {
        let mut rig = rig();
        open_session(&mut rig).await;

        rig.microphone.feed(vec![0.5; 8]).await;
        let channel = rig.connector.last().channel;
        channel.wait_for_sent(1).await;
        assert!(matches!(
            &channel.sent()[0],
            ClientMessage::RealtimeInput(input) if input.media_chunks[0].mime_type == "audio/pcm;rate=16000"
        ));
        rig.orchestrator.stop_session().await;
    }

    #[tokio::test]
    async fn audio_then_interrupt_returns_to_listening() {
        let mut rig = rig();
        open_session(&mut rig).await;
        let session = rig.connector.last();
        let output = rig.output.output();

        session
            .message(json!({"serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": pcm_chunk(&[0; 2400])}}
            ]}}}))
            .await;
        wait_for_status(&mut rig.status, Status::Speaking).await;
        output.set_time(std::time::Duration::from_millis(20));

        session
            .message(json!({"serverContent": {"interrupted": true}}))
            .await;
        wait_for_status(&mut rig.status, Status::Listening).await;

        assert_eq!(output.started().len(), 1);
        assert_eq!(output.stopped(), [output.started()[0].0]);
        let events = drain_events(&mut rig.events);
        let speaking: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::SpeakingChanged(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(speaking, [true, false]);
        rig.orchestrator.stop_session().await;
    }

    #[tokio::test]
    async fn natural_end_of_playback_returns_to_listening() {
        let mut rig = rig();
        open_session(&mut rig).await;
        let session = rig.connector.last();
        let output = rig.output.output();

        let chunk = pcm_chunk(&[0; 240]);
        let audio = json!({"serverContent": {"modelTurn": {"parts": [
            {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": chunk}}
        ]}}});
        session.message(audio.clone()).await;
        session.message(audio).await;
        wait_for_status(&mut rig.status, Status::Speaking).await;
        output.wait_for_started(2).await;

        let started = output.started();
        output.finish(started[0].0);
        output.finish(started[1].0);
        wait_for_status(&mut rig.status, Status::Listening).await;
        rig.orchestrator.stop_session().await;
    }

    #[tokio::test]
    async fn input_sent_while_connecting_is_flushed_on_open() {
        let mut rig = rig();
        assert_eq!(
            rig.orchestrator
                .send_realtime_input(Blob::new("image/png", "iVBO")),
            Err(LiveError::NotConnected)
        );

        rig.orchestrator.start_session().await.unwrap();
        rig.orchestrator
            .send_realtime_input(Blob::new("image/png", "iVBO"))
            .unwrap();
        let session = rig.connector.last();
        session.opened().await;
        session.channel.wait_for_sent(1).await;

        assert_eq!(
            session.channel.sent()[0],
            ClientMessage::media(Blob::new("image/png", "iVBO"))
        );
        rig.orchestrator.stop_session().await;
    }

    #[tokio::test]
    async fn remote_tools_pass_through_searching_and_reading() {
        let mut remote = MockRemoteTools::new();
        remote.expect_web_search().returning(|_| {
            Ok(SearchSummary {
                summary: "It is sunny".to_string(),
                links: Vec::new(),
            })
        });
        let mut rig = rig_with(FakeMicrophone::new(), FakeConnector::default(), remote);
        open_session(&mut rig).await;
        let session = rig.connector.last();

        session
            .message(json!({"toolCall": {"functionCalls": [
                {"id": "f1", "name": "changeFace", "args": {"expression": "surprised"}},
                {"id": "s1", "name": "performSearch", "args": {"query": "weather"}}
            ]}}))
            .await;
        wait_for_status(&mut rig.status, Status::Reading).await;
        session.channel.wait_for_sent(2).await;

        session
            .message(json!({"serverContent": {"turnComplete": true}}))
            .await;
        wait_for_status(&mut rig.status, Status::Listening).await;

        let answered: Vec<String> = session
            .channel
            .sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::ToolResponse(r) => Some(r.function_responses[0].id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(answered.len(), 2);
        assert!(answered.contains(&"f1".to_string()));
        assert!(answered.contains(&"s1".to_string()));

        let events = drain_events(&mut rig.events);
        let seen = statuses(&events);
        let searching = seen.iter().position(|s| *s == Status::Searching);
        let reading = seen.iter().position(|s| *s == Status::Reading);
        assert!(searching.is_some() && searching < reading);
        assert!(events.contains(&SessionEvent::ExpressionChanged(Expression::Surprised)));
        rig.orchestrator.stop_session().await;
    }

    #[tokio::test]
    async fn rejected_credential_during_a_tool_call_ends_the_session() {
        let mut remote = MockRemoteTools::new();
        remote.expect_web_search().returning(|_| {
            Err(LiveError::InvalidCredential(
                "Requested entity was not found.".to_string(),
            ))
        });
        let mut rig = rig_with(FakeMicrophone::new(), FakeConnector::default(), remote);
        open_session(&mut rig).await;
        let session = rig.connector.last();

        session
            .message(json!({"toolCall": {"functionCalls": [
                {"id": "s1", "name": "performSearch", "args": {"query": "anything"}}
            ]}}))
            .await;
        wait_for_status(&mut rig.status, Status::Error).await;

        assert!(session.channel.is_closed());
        assert_eq!(rig.microphone.tracks_open(), 0);
        assert!(rig.output.output().is_closed());
        eventually(|| !rig.orchestrator.is_active()).await;
        let events = drain_events(&mut rig.events);
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == SessionEvent::ApiKeyInvalid)
                .count(),
            1
        );

        rig.orchestrator.stop_session().await;
        assert_eq!(rig.orchestrator.status(), Status::Idle);
    }

    #[tokio::test]
    async fn channel_failure_tears_down_into_error() {
        let mut rig = rig();
        open_session(&mut rig).await;
        let session = rig.connector.last();

        session
            .fail(LiveError::Transport("connection reset".into()))
            .await;
        wait_for_status(&mut rig.status, Status::Error).await;

        assert!(session.channel.is_closed());
        assert_eq!(rig.microphone.tracks_open(), 0);
        eventually(|| !rig.orchestrator.is_active()).await;
        assert_eq!(
            rig.orchestrator.send_realtime_input(Blob::pcm16k("AAAA")),
            Err(LiveError::NotConnected)
        );

        // A new session can start from the error state.
        rig.orchestrator.start_session().await.unwrap();
        assert_eq!(rig.connector.connects(), 2);
        rig.orchestrator.stop_session().await;
    }

    #[tokio::test]
    async fn stop_releases_in_a_fixed_order() {
        let mut rig = rig();
        speaking_session(&mut rig).await;

        rig.orchestrator.stop_session().await;

        assert_eq!(rig.journal.entries(), RELEASE_ORDER);
        assert_eq!(rig.orchestrator.status(), Status::Idle);
    }

    #[tokio::test]
    async fn channel_failure_releases_in_the_same_order() {
        let mut rig = rig();
        speaking_session(&mut rig).await;

        rig.connector
            .last()
            .fail(LiveError::Transport("connection reset".into()))
            .await;
        wait_for_status(&mut rig.status, Status::Error).await;

        assert_eq!(rig.journal.entries(), RELEASE_ORDER);
        rig.orchestrator.stop_session().await;
        assert_eq!(rig.journal.entries(), RELEASE_ORDER);
    }

    #[tokio::test]
    async fn normal_close_returns_to_idle_with_everything_released() {
        let mut rig = rig();
        speaking_session(&mut rig).await;
        let session = rig.connector.last();
        drain_events(&mut rig.events);

        session.closed("session ended").await;
        wait_for_status(&mut rig.status, Status::Idle).await;

        assert_eq!(rig.journal.entries(), RELEASE_ORDER);
        assert!(session.channel.is_closed());
        assert_eq!(rig.microphone.tracks_open(), 0);
        assert!(rig.output.output().is_closed());
        eventually(|| !rig.orchestrator.is_active()).await;
        let events = drain_events(&mut rig.events);
        assert!(!events.contains(&SessionEvent::ApiKeyInvalid));
        assert_eq!(statuses(&events).last(), Some(&Status::Idle));
        assert!(!statuses(&events).contains(&Status::Error));

        rig.orchestrator.stop_session().await;
        assert_eq!(rig.journal.entries(), RELEASE_ORDER);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_finishes_when_the_channel_never_closes() {
        let mut rig = rig_with(
            FakeMicrophone::new(),
            FakeConnector::hanging_on_close(),
            MockRemoteTools::new(),
        );
        speaking_session(&mut rig).await;

        tokio::time::timeout(Duration::from_secs(10), rig.orchestrator.stop_session())
            .await
            .expect("stop_session must not wait on the channel forever");

        assert_eq!(rig.journal.entries(), RELEASE_ORDER);
        assert_eq!(rig.microphone.tracks_open(), 0);
        assert!(rig.output.output().is_closed());
        assert_eq!(rig.orchestrator.status(), Status::Idle);
    }

    #[tokio::test]
    async fn user_speech_is_transcribed_per_turn() {
        let mut rig = rig();
        open_session(&mut rig).await;
        let session = rig.connector.last();

        session
            .message(json!({"serverContent": {"inputTranscription": {"text": "What's the "}}}))
            .await;
        session
            .message(json!({"serverContent": {"inputTranscription": {"text": "weather?"}}}))
            .await;
        session
            .message(json!({"serverContent": {"turnComplete": true}}))
            .await;
        rig.orchestrator.stop_session().await;

        let events = drain_events(&mut rig.events);
        let heard: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Transcription(_)))
            .collect();
        assert_eq!(
            heard,
            [&SessionEvent::Transcription("What's the weather?".to_string())]
        );
    }

    #[tokio::test]
    async fn personality_change_restarts_the_session() {
        let mut rig = rig();
        open_session(&mut rig).await;
        let first = rig.connector.last();

        rig.orchestrator
            .apply_personality_update(&PersonalityUpdate {
                voice: Some("Puck".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(first.channel.is_closed());
        assert_eq!(rig.connector.connects(), 2);
        let second = rig.connector.last();
        let voice = second
            .setup
            .generation_config
            .speech_config
            .as_ref()
            .map(|s| s.voice_config.prebuilt_voice_config.voice_name.clone());
        assert_eq!(voice.as_deref(), Some("Puck"));
        assert_eq!(rig.orchestrator.personality().voice, "Puck");

        // An identical personality does not restart anything.
        let same = rig.orchestrator.personality().clone();
        rig.orchestrator.set_personality(same).await.unwrap();
        assert_eq!(rig.connector.connects(), 2);
        rig.orchestrator.stop_session().await;
    }

    #[tokio::test]
    async fn personality_change_while_idle_starts_a_session() {
        let mut rig = rig();
        let next = Personality {
            creator_name: "Someone".to_string(),
            ..Personality::default()
        };

        rig.orchestrator.set_personality(next).await.unwrap();

        assert!(rig.orchestrator.is_active());
        assert_eq!(rig.connector.connects(), 1);
        rig.orchestrator.stop_session().await;
    }
}
