mod client;
mod error;
mod rest;

pub use client::config::{Config, ConfigBuilder};
pub use client::stats::Stats;
pub use client::{Client, EventRx, LiveEvent, MessageSender, connect_with_config};
pub use error::ClientError;
pub use gemini_live_types as types;
pub use rest::GenerativeClient;
