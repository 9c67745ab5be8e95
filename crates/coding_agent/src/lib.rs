//! Agent orchestration engine and headless runtime.
//!
//! ## Turn model
//!
//! [`engine::Engine`] queues user text, tool calls, and tool results and runs
//! one turn at a time against an [`agent_session::Session`]. Every tool call
//! passes the [`permissions::PermissionGate`] unless the
//! [`engine::ApprovalPolicy`] exempts it, and file tools go through a shared
//! [`file_guard::FileGuard`] so writes require a fresh read.
//!
//! ## Provider bootstrap
//!
//! [`config::AgentConfig::from_env`] selects the backend:
//!
//! - `CODING_AGENT_PROVIDER=mock` (default) for the scripted local session
//! - `CODING_AGENT_PROVIDER=codex` for the Codex Responses transport
//!
//! `CODING_AGENT_CONFIG_PATH` may name a UTF-8 JSON file with this shape:
//!
//! ```json
//! {
//!   "provider": "codex",
//!   "access_token": "<jwt-with-https://api.openai.com/auth.chatgpt_account_id>",
//!   "model": "gpt-5-codex",
//!   "reasoning_effort": "medium",
//!   "timeout_sec": 120,
//!   "approval_policy": "ask",
//!   "bash_timeout_ms": 120000
//! }
//! ```
//!
//! Unknown JSON fields are rejected. `CODING_AGENT_ACCESS_TOKEN`,
//! `CODING_AGENT_MODEL`, and `CODING_AGENT_SYSTEM_INSTRUCTIONS` override the
//! file; blank system instructions fall back to the built-in default.
//!
//! Logs go to stderr, filtered by `CODING_AGENT_LOG` (default `warn`).

pub mod config;
pub mod engine;
pub mod logging;
pub mod permissions;
pub mod schema;
pub mod state;
pub mod tool;
pub mod tools;

pub use engine::{ApprovalPolicy, Engine, EngineOptions};
pub use permissions::{PermissionDecision, PermissionGate, PermissionRequest};
pub use state::{ConversationState, EngineObserver, HistoryRecord};
pub use tool::{DynTool, Tool, ToolError, ToolRegistry};
