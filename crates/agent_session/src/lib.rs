//! Backend-neutral contract between the engine and a model session.
//!
//! A [`Session`] owns one conversation's backend-native history. Each
//! [`Session::step`] call sends the accumulated input for one turn and streams
//! [`SessionUpdate`]s back through an [`UpdateSink`]. The sink guarantees the
//! engine sees exactly one terminal [`SessionUpdate::Ended`] per step, and
//! nothing at all once the step's cancellation token has fired.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One streamed event surfaced to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Reasoning {
        text: String,
    },
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    Error {
        message: String,
    },
    Ended,
}

impl SessionUpdate {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

/// Tool declaration sent to the backend; `parameters` is a JSON Schema object.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Output of one tool call, returned to the backend on the next step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResultItem {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResultItem {
    #[must_use]
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    #[must_use]
    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// Input for one backend round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepArguments {
    /// Newline-joined user text queued since the last step, if any.
    pub text: Option<String>,
    pub tool_results: Vec<ToolResultItem>,
    pub tools: Vec<ToolDefinition>,
}

/// Selectable model offered by a session provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("session setup failed: {0}")]
    Init(String),
}

/// Sending half handed to [`Session::step`].
///
/// Updates are dropped once the step's token is cancelled. The first
/// [`SessionUpdate::Ended`] closes the sink; a sink dropped without an explicit
/// end delivers one itself, so a step that bails out early still terminates
/// the engine's receive loop.
#[derive(Debug)]
pub struct UpdateSink {
    tx: mpsc::UnboundedSender<SessionUpdate>,
    cancel: CancellationToken,
    ended: bool,
}

impl UpdateSink {
    #[must_use]
    pub fn channel(cancel: CancellationToken) -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                cancel,
                ended: false,
            },
            rx,
        )
    }

    /// Delivers `update`; returns `false` when it was dropped.
    pub fn send(&mut self, update: SessionUpdate) -> bool {
        if self.ended || self.cancel.is_cancelled() {
            return false;
        }
        if update.is_terminal() {
            self.ended = true;
        }
        self.tx.send(update).is_ok()
    }

    pub fn end(mut self) {
        self.send(SessionUpdate::Ended);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for UpdateSink {
    fn drop(&mut self) {
        if !self.ended {
            self.send(SessionUpdate::Ended);
        }
    }
}

/// Stateful conversation with one model backend.
#[async_trait]
pub trait Session: Send + Sync {
    /// Stable identifier, also used as the backend cache key.
    fn id(&self) -> &str;

    /// Runs one backend round trip, streaming updates into `updates`.
    ///
    /// History grows only when the backend confirms the response completed.
    async fn step(&self, args: StepArguments, updates: UpdateSink);
}

/// Factory for sessions of one backend.
pub trait SessionProvider: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    fn models(&self) -> Vec<ModelDescriptor>;

    fn create_session(&self, model: &str) -> Result<Arc<dyn Session>, SessionError>;
}
