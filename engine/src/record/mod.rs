//! Conversation record
//!
//! Data model only: sessions, messages and their typed parts. Persistence
//! lives in [`crate::storage`] and [`crate::history`].

pub mod identifier;
pub mod message;
pub mod session;

pub use identifier::{ascending, descending, IdPrefix};
pub use message::{
    AgentPart, CallPart, CallState, CallStatus, FilePart, Message, MessageError, Part,
    ReasoningPart, Role, TextPart, Usage,
};
pub use session::Session;
