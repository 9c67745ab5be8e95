//! Transport client for the Codex Responses endpoint.
//!
//! The crate builds request payloads and headers, posts them with a bounded
//! retry policy, and decodes the server-sent event stream into
//! [`CodexStreamEvent`] values. Blocks that fail to decode are logged and
//! skipped; they never end the stream. Conversation semantics (history,
//! tool-call bookkeeping) live one layer up in the session crates.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod items;
pub mod payload;
pub mod retry;
pub mod sse;
pub mod stream;

pub use client::CodexApiClient;
pub use config::{normalize_codex_url, CodexApiConfig, DEFAULT_CODEX_BASE_URL};
pub use error::CodexApiError;
pub use events::{CodexResponseStatus, CodexStreamEvent};
pub use payload::{CodexReasoning, CodexRequest, ReasoningEffort};
pub use sse::SseStreamParser;
pub use stream::CodexEventStream;
