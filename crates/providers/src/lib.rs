//! Provider adapters: HTTP/SSE plumbing, wire formats, and the stream
//! demuxer that sit behind the protocol-agnostic [`genai_core::Provider`]
//! contract defined in this crate's [`provider`] module.

mod adapters;
mod auth;
mod error;
mod http;
mod messages;
pub mod provider;
pub mod stream;
pub mod wrappers;

pub use adapters::{
    anthropic::AnthropicAdapter,
    compatible::{BASETEN, CompatibleAdapter, CompatibleBackend, DASHSCOPE, GROQ, OLLAMA, POLLINATIONS, TOGETHER},
    google::GoogleAdapter,
    openai::OpenAiAdapter,
};
pub use provider::{GenStreamResult, Model, Provider, ReplyStream, find_scenario};
