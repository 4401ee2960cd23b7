//! Dossier Providers: HTTP implementations of the pipeline's service seams
//!
//! - [`AnthropicClient`]: messages-API completion ([`dossier_core::CompletionService`])
//! - [`TavilyClient`]: web search and page extraction
//!   ([`dossier_core::SearchProvider`], [`dossier_core::PageFetcher`])
//! - [`ResponsesClient`]: background synthesis with streamed events and
//!   retrieval by id ([`dossier_core::SynthesisService`])
//!
//! Every client is built from a config with `from_env()` / `new()` /
//! `with_*` builders. A missing API key is a [`ProviderError`] at
//! construction time, never a failed call later.

pub mod anthropic;
pub mod error;
pub mod html;
mod http;
pub mod responses;
pub mod sse;
pub mod tavily;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use error::{ProviderError, ProviderResult};
pub use responses::{ResponsesClient, ResponsesConfig, ResponsesStream};
pub use sse::{SseDecoder, SseEvent};
pub use tavily::{TavilyClient, TavilyConfig};
