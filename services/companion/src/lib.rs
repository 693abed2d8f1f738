pub mod audio_io;
pub mod config;
pub mod console;
pub mod gemini_adapter;
pub mod location;
pub mod personality_store;
pub mod tools_adapter;
pub mod upload;
