//! Common value model shared by every provider adapter.
//!
//! This crate has no knowledge of HTTP, SSE framing, or any particular
//! backend's wire schema. It exists so that `genai-providers` and
//! `genai-scoreboard` can agree on one vocabulary for messages, options,
//! errors, and declared capabilities.

pub mod error;
pub mod message;
pub mod options;
pub mod scoreboard;

pub use error::Error;
pub use message::{
    FinishReason, Logprob, Message, RateLimit, RateLimitResource, Reply, Request, Result, Role, ToolCall,
    ToolCallResult, Usage,
};
pub use options::{Options, OptionsAudio, OptionsImage, OptionsText, Tool, ToolForce};
pub use scoreboard::{Functionality, ModalCapability, Modality, Scenario, Score, TriState};

/// Crate-wide result alias, mirroring the error taxonomy in [`error::Error`].
pub type GenResult<T> = std::result::Result<T, Error>;
