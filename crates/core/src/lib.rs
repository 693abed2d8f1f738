//! The live session orchestrator: owns the duplex channel to the assistant,
//! streams microphone audio into it, schedules the audio that comes back,
//! answers tool calls and drives the session status.
pub mod avatar;
pub mod backoff;
pub mod capture;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod personality;
pub mod playback;
pub mod remote;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use avatar::AvatarState;
pub use backoff::RetryPolicy;
pub use capture::{MediaTrack, MicStream, Microphone};
pub use channel::{ChannelEvent, Connection, LiveChannel, LiveConnector};
pub use error::{LiveError, classify_api_failure, classify_close};
pub use events::{
    EventSink, EventStream, Expression, History, HistoryItem, SearchLink, SessionEvent,
    SessionObserver, Status,
};
pub use lifecycle::{Collaborators, Orchestrator, OrchestratorConfig};
pub use personality::{Personality, PersonalityUpdate};
pub use playback::{AudioBuffer, AudioOutput, AudioOutputFactory, PlaybackId};
pub use remote::{CodeRequest, GeneratedCode, GeneratedImage, Geolocator, RemoteTools, SearchSummary};
