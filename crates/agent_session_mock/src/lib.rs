//! Deterministic implementation of the `agent_session` contract.
//!
//! [`ScriptedSession`] replays one [`StepScript`] per step and records the
//! [`StepArguments`] it was called with. It contains no transport logic and is
//! meant for engine tests and offline runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_session::{
    ModelDescriptor, Session, SessionError, SessionProvider, SessionUpdate, StepArguments,
    UpdateSink,
};
use async_trait::async_trait;
use serde_json::Value;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";
pub const MOCK_MODEL: &str = "mock";

const FALLBACK_REPLY: &str = "Completed successfully.";

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptAction {
    Emit(SessionUpdate),
    Delay(Duration),
    /// Parks the step until it is cancelled.
    Hang,
}

/// Actions replayed for one step. `Ended` is delivered after the last action
/// unless the script emits it itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepScript {
    actions: Vec<ScriptAction>,
}

impl StepScript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.actions
            .push(ScriptAction::Emit(SessionUpdate::Text { text: text.into() }));
        self
    }

    #[must_use]
    pub fn reasoning(mut self, text: impl Into<String>) -> Self {
        self.actions
            .push(ScriptAction::Emit(SessionUpdate::Reasoning { text: text.into() }));
        self
    }

    #[must_use]
    pub fn tool_call(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        self.actions.push(ScriptAction::Emit(SessionUpdate::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }));
        self
    }

    #[must_use]
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.actions
            .push(ScriptAction::Emit(SessionUpdate::error(message)));
        self
    }

    #[must_use]
    pub fn delay(mut self, duration: Duration) -> Self {
        self.actions.push(ScriptAction::Delay(duration));
        self
    }

    #[must_use]
    pub fn hang(mut self) -> Self {
        self.actions.push(ScriptAction::Hang);
        self
    }

    pub fn actions(&self) -> &[ScriptAction] {
        &self.actions
    }
}

/// Session that replays queued scripts; an exhausted queue answers with a
/// fixed text reply.
#[derive(Debug)]
pub struct ScriptedSession {
    id: String,
    scripts: Mutex<VecDeque<StepScript>>,
    calls: Mutex<Vec<StepArguments>>,
}

impl ScriptedSession {
    #[must_use]
    pub fn new(scripts: Vec<StepScript>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), scripts)
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>, scripts: Vec<StepScript>) -> Self {
        Self {
            id: id.into(),
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_script(&self, script: StepScript) {
        lock_unpoisoned(&self.scripts).push_back(script);
    }

    /// Arguments of every step so far, in call order.
    pub fn calls(&self) -> Vec<StepArguments> {
        lock_unpoisoned(&self.calls).clone()
    }

    pub fn step_count(&self) -> usize {
        lock_unpoisoned(&self.calls).len()
    }
}

#[async_trait]
impl Session for ScriptedSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn step(&self, args: StepArguments, mut updates: UpdateSink) {
        lock_unpoisoned(&self.calls).push(args);
        let script = lock_unpoisoned(&self.scripts)
            .pop_front()
            .unwrap_or_else(|| StepScript::new().text(FALLBACK_REPLY));
        let cancel = updates.cancel_token().clone();

        for action in script.actions {
            match action {
                ScriptAction::Emit(update) => {
                    updates.send(update);
                }
                ScriptAction::Delay(duration) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
                ScriptAction::Hang => {
                    cancel.cancelled().await;
                    return;
                }
            }
            if cancel.is_cancelled() {
                return;
            }
        }
        updates.end();
    }
}

/// Provider handing out [`ScriptedSession`]s that share one script queue
/// template.
#[derive(Debug, Default)]
pub struct MockProvider {
    scripts: Vec<StepScript>,
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
}

impl MockProvider {
    #[must_use]
    pub fn new(scripts: Vec<StepScript>) -> Self {
        Self {
            scripts,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Most recently created session, for inspecting recorded steps.
    pub fn last_session(&self) -> Option<Arc<ScriptedSession>> {
        lock_unpoisoned(&self.sessions).last().cloned()
    }
}

impl SessionProvider for MockProvider {
    fn name(&self) -> &str {
        MOCK_PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        "Mock (scripted)"
    }

    fn models(&self) -> Vec<ModelDescriptor> {
        vec![ModelDescriptor {
            name: MOCK_MODEL.to_owned(),
            display_name: "Mock".to_owned(),
        }]
    }

    fn create_session(&self, model: &str) -> Result<Arc<dyn Session>, SessionError> {
        if model != MOCK_MODEL {
            return Err(SessionError::UnknownModel(model.to_owned()));
        }
        let session = Arc::new(ScriptedSession::new(self.scripts.clone()));
        lock_unpoisoned(&self.sessions).push(Arc::clone(&session));
        Ok(session)
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
