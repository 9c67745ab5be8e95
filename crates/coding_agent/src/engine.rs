//! Turn scheduler.
//!
//! The engine owns the queues of pending user text, pending tool calls, and
//! finished tool results, and runs at most one turn at a time. A turn drains
//! queued tool calls through the permission gate, hands the accumulated input
//! to [`Session::step`], and applies the streamed updates. Tool calls that
//! arrive while the backend streams are executed by the next pass of the same
//! turn, so each backend round trip sees every result of the previous one.
//!
//! All queue mutation happens under one lock and is gated on the turn's
//! cancellation token, so a turn that has been aborted can never touch state
//! again even if its task is still unwinding.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use agent_session::{Session, SessionUpdate, StepArguments, ToolResultItem, UpdateSink};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::permissions::{PermissionDecision, PermissionGate};
use crate::state::{
    ConversationState, EngineObserver, HistoryRecord, NoopObserver, NotificationQueue,
};
use crate::tool::{DynTool, ToolRegistry};

pub const PERMISSION_DENIED_MESSAGE: &str = "Permission denied";
pub const INTERRUPTED_MESSAGE: &str = "Tool call was interrupted by the user";

/// Which tool calls must be approved by a human before they run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApprovalPolicy {
    #[default]
    Ask,
    AutoApproveReadOnly,
    Bypass,
}

impl ApprovalPolicy {
    pub fn requires_approval(self, read_only: bool) -> bool {
        match self {
            Self::Ask => true,
            Self::AutoApproveReadOnly => !read_only,
            Self::Bypass => false,
        }
    }
}

#[derive(Clone)]
pub struct EngineOptions {
    pub policy: ApprovalPolicy,
    pub observer: Arc<dyn EngineObserver>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            policy: ApprovalPolicy::default(),
            observer: Arc::new(NoopObserver),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: Value,
}

enum Phase {
    Idle,
    Turning(CancellationToken),
}

struct TurnState {
    texts: Vec<String>,
    calls: VecDeque<PendingToolCall>,
    results: Vec<ToolResultItem>,
    in_flight: Option<PendingToolCall>,
    phase: Phase,
}

struct EngineInner {
    session: Arc<dyn Session>,
    tools: ToolRegistry,
    permissions: PermissionGate,
    policy: ApprovalPolicy,
    notifications: Arc<NotificationQueue>,
    conversation: Arc<Mutex<ConversationState>>,
    turn: Mutex<TurnState>,
    idle: watch::Sender<bool>,
}

/// Cheaply cloneable handle to one conversation's scheduler.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(session: Arc<dyn Session>, tools: ToolRegistry, options: EngineOptions) -> Self {
        let conversation = Arc::new(Mutex::new(ConversationState::default()));
        let notifications = Arc::new(NotificationQueue::new(options.observer));
        // Runs under the gate lock; whoever changed the gate delivers.
        let permissions = PermissionGate::new({
            let conversation = Arc::clone(&conversation);
            let notifications = Arc::clone(&notifications);
            move |head| {
                lock_unpoisoned(&conversation)
                    .set_pending_permission(head.cloned(), notifications.as_ref());
            }
        });
        let (idle, _) = watch::channel(true);

        Self {
            inner: Arc::new(EngineInner {
                session,
                tools,
                permissions,
                policy: options.policy,
                notifications,
                conversation,
                turn: Mutex::new(TurnState {
                    texts: Vec::new(),
                    calls: VecDeque::new(),
                    results: Vec::new(),
                    in_flight: None,
                    phase: Phase::Idle,
                }),
                idle,
            }),
        }
    }

    /// Queues user text and starts a turn if none is running. Text sent while
    /// a turn is active joins the next backend round trip.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send(&self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }

        let mut turn = lock_unpoisoned(&self.inner.turn);
        turn.texts.push(text);
        if matches!(turn.phase, Phase::Turning(_)) {
            return;
        }
        let token = CancellationToken::new();
        turn.phase = Phase::Turning(token.clone());
        self.inner.idle.send_replace(false);
        drop(turn);

        tracing::debug!(session_id = self.inner.session.id(), "turn started");
        tokio::spawn(Arc::clone(&self.inner).run_turn(token));
    }

    /// Cancels the active turn and drops queued input. Returns `false` when
    /// the engine was already idle.
    pub fn abort(&self) -> bool {
        let inner = &self.inner;
        let mut turn = lock_unpoisoned(&inner.turn);
        let Phase::Turning(token) = std::mem::replace(&mut turn.phase, Phase::Idle) else {
            return false;
        };
        token.cancel();
        turn.texts.clear();
        // Calls the backend already knows about still need an answer.
        let interrupted: Vec<ToolResultItem> = turn
            .in_flight
            .take()
            .into_iter()
            .chain(turn.calls.drain(..))
            .map(|call| ToolResultItem::error(call.id, INTERRUPTED_MESSAGE))
            .collect();
        turn.results.extend(interrupted);

        lock_unpoisoned(&inner.conversation).stop_thinking(inner.notifications.as_ref());
        inner.permissions.clear();
        inner.idle.send_replace(true);
        drop(turn);
        inner.notifications.deliver();

        tracing::debug!(session_id = inner.session.id(), "turn aborted");
        true
    }

    pub fn is_busy(&self) -> bool {
        !*self.inner.idle.borrow()
    }

    /// Resolves once no turn is active.
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }

    pub fn permissions(&self) -> &PermissionGate {
        &self.inner.permissions
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.tools
    }

    pub fn policy(&self) -> ApprovalPolicy {
        self.inner.policy
    }

    pub fn session_id(&self) -> &str {
        self.inner.session.id()
    }

    /// Snapshot of the conversation view.
    pub fn conversation(&self) -> ConversationState {
        lock_unpoisoned(&self.inner.conversation).clone()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("session_id", &self.inner.session.id())
            .field("policy", &self.inner.policy)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl EngineInner {
    async fn run_turn(self: Arc<Self>, token: CancellationToken) {
        loop {
            if !self.drain_tool_calls(&token).await {
                return;
            }
            let Some(args) = self.take_step_input(&token) else {
                return;
            };

            let (sink, mut updates) = UpdateSink::channel(token.clone());
            let session = Arc::clone(&self.session);
            tokio::spawn(async move { session.step(args, sink).await });

            if !self.apply_updates(&mut updates, &token).await {
                return;
            }
            match self.finish_or_reenter(&token) {
                Some(true) => {
                    tracing::debug!(session_id = self.session.id(), "work queued during step, re-entering turn");
                }
                Some(false) => {
                    tracing::debug!(session_id = self.session.id(), "turn ended");
                    return;
                }
                None => return,
            }
        }
    }

    /// Runs `apply` against the queues and the conversation view unless the
    /// turn has been cancelled.
    fn with_live_turn<R>(
        &self,
        token: &CancellationToken,
        apply: impl FnOnce(&mut TurnState, &mut ConversationState) -> R,
    ) -> Option<R> {
        let applied = {
            let mut turn = lock_unpoisoned(&self.turn);
            if token.is_cancelled() {
                return None;
            }
            let mut conversation = lock_unpoisoned(&self.conversation);
            apply(&mut turn, &mut conversation)
        };
        self.notifications.deliver();
        Some(applied)
    }

    /// Executes queued tool calls in arrival order. Returns `false` once the
    /// turn is cancelled.
    async fn drain_tool_calls(&self, token: &CancellationToken) -> bool {
        loop {
            let next = self.with_live_turn(token, |turn, _| {
                let call = turn.calls.pop_front();
                turn.in_flight = call.clone();
                call
            });
            let call = match next {
                None => return false,
                Some(None) => return true,
                Some(Some(call)) => call,
            };

            let Some(result) = self.run_tool_call(&call, token).await else {
                return false;
            };
            let recorded = self.with_live_turn(token, |turn, conversation| {
                turn.in_flight = None;
                conversation.append(
                    HistoryRecord::ToolResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        content: result.content.clone(),
                        is_error: result.is_error,
                    },
                    self.notifications.as_ref(),
                );
                turn.results.push(result);
            });
            if recorded.is_none() {
                return false;
            }
        }
    }

    /// Produces the result for one call, or `None` if the turn was cancelled
    /// while waiting on approval or execution.
    async fn run_tool_call(
        &self,
        call: &PendingToolCall,
        token: &CancellationToken,
    ) -> Option<ToolResultItem> {
        let Some(tool) = self.tools.get(&call.name) else {
            tracing::warn!(call_id = %call.id, tool = %call.name, "unknown tool requested");
            return Some(ToolResultItem::error(&call.id, format!("Tool {} not found", call.name)));
        };
        if let Err(error) = tool.validate(&call.arguments) {
            return Some(ToolResultItem::error(
                &call.id,
                format!("Invalid arguments for {}: {error}", call.name),
            ));
        }

        if self.policy.requires_approval(tool.read_only()) {
            match self.await_permission(tool.as_ref(), call, token).await? {
                PermissionDecision::Approved => {}
                PermissionDecision::Denied => {
                    return Some(ToolResultItem::error(&call.id, PERMISSION_DENIED_MESSAGE));
                }
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            outcome = tool.call(call.arguments.clone()) => outcome,
        };
        match outcome {
            Ok(content) => Some(ToolResultItem::success(&call.id, content)),
            Err(error) => {
                tracing::warn!(call_id = %call.id, tool = %call.name, %error, "tool call failed");
                Some(ToolResultItem::error(&call.id, error.to_string()))
            }
        }
    }

    async fn await_permission(
        &self,
        tool: &dyn DynTool,
        call: &PendingToolCall,
        token: &CancellationToken,
    ) -> Option<PermissionDecision> {
        let ticket = self.permissions.request(
            &call.name,
            tool.title(&call.arguments),
            call.arguments.clone(),
            tool.read_only(),
        );
        self.notifications.deliver();
        let id = ticket.id.clone();
        let decision = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.permissions.withdraw(&id);
                self.notifications.deliver();
                return None;
            }
            decision = ticket.decision() => decision,
        };
        // The head change from whoever resolved the ticket.
        self.notifications.deliver();
        (!token.is_cancelled()).then_some(decision)
    }

    fn take_step_input(&self, token: &CancellationToken) -> Option<StepArguments> {
        self.with_live_turn(token, |turn, conversation| {
            let text = (!turn.texts.is_empty()).then(|| std::mem::take(&mut turn.texts).join("\n"));
            if let Some(text) = &text {
                conversation.append(HistoryRecord::User { text: text.clone() }, self.notifications.as_ref());
            }
            conversation.start_thinking(self.notifications.as_ref());
            StepArguments {
                text,
                tool_results: std::mem::take(&mut turn.results),
                tools: self.tools.definitions(),
            }
        })
    }

    /// Applies streamed updates until `Ended`. Returns `false` if the turn was
    /// cancelled first.
    async fn apply_updates(
        &self,
        updates: &mut mpsc::UnboundedReceiver<SessionUpdate>,
        token: &CancellationToken,
    ) -> bool {
        loop {
            let update = tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                update = updates.recv() => update,
            };
            let Some(update) = update else {
                return !token.is_cancelled();
            };
            if update.is_terminal() {
                return !token.is_cancelled();
            }

            let applied = self.with_live_turn(token, |turn, conversation| match update {
                SessionUpdate::Reasoning { text } => {
                    conversation.set_thinking_label(text, self.notifications.as_ref());
                }
                SessionUpdate::Text { text } => {
                    conversation.append(HistoryRecord::Assistant { text }, self.notifications.as_ref());
                }
                SessionUpdate::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    conversation.append(
                        HistoryRecord::ToolCall {
                            id: id.clone(),
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                        self.notifications.as_ref(),
                    );
                    turn.calls.push_back(PendingToolCall {
                        id,
                        name,
                        arguments,
                    });
                }
                SessionUpdate::Error { message } => {
                    tracing::warn!(session_id = self.session.id(), %message, "backend reported an error");
                    conversation.append(HistoryRecord::Error { message }, self.notifications.as_ref());
                }
                SessionUpdate::Ended => {}
            });
            if applied.is_none() {
                return false;
            }
        }
    }

    /// After `Ended`: `Some(true)` to run another pass, `Some(false)` when
    /// the engine went idle, `None` if the turn was cancelled.
    fn finish_or_reenter(&self, token: &CancellationToken) -> Option<bool> {
        self.with_live_turn(token, |turn, conversation| {
            if !turn.texts.is_empty() || !turn.calls.is_empty() {
                return true;
            }
            turn.phase = Phase::Idle;
            conversation.stop_thinking(self.notifications.as_ref());
            self.idle.send_replace(true);
            false
        })
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
