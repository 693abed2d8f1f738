//! Wire models for the Gemini Live duplex channel and the one-shot
//! `generateContent` REST endpoint.
pub mod content;
pub mod error;
pub mod generate;
pub mod live;
pub mod tools;

pub use content::{Blob, Content, Part};
pub use error::{ErrorDetail, ErrorEnvelope, ErrorStatus};
pub use live::{ClientMessage, ServerContent, ServerMessage, Setup};
pub use tools::{FunctionCall, FunctionDeclaration, FunctionResponse, ToolCall};
