#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_session::Session;
use agent_session_mock::{ScriptedSession, StepScript};
use async_trait::async_trait;
use coding_agent::schema::{Property, Schema};
use coding_agent::{
    ApprovalPolicy, Engine, EngineObserver, EngineOptions, HistoryRecord, PermissionRequest, Tool,
    ToolError, ToolRegistry,
};
use serde::Deserialize;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    History(HistoryRecord),
    Thinking(Option<String>),
    Permission(Option<String>),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Observed> {
        lock_unpoisoned(&self.events).clone()
    }

    pub fn thinking(&self) -> Vec<Option<String>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Observed::Thinking(label) => Some(label),
                _ => None,
            })
            .collect()
    }

    /// Tool names of each permission head reported, `None` when cleared.
    pub fn permission_heads(&self) -> Vec<Option<String>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Observed::Permission(head) => Some(head),
                _ => None,
            })
            .collect()
    }
}

impl EngineObserver for RecordingObserver {
    fn history_appended(&self, record: &HistoryRecord) {
        lock_unpoisoned(&self.events).push(Observed::History(record.clone()));
    }

    fn thinking_changed(&self, thinking: Option<&str>) {
        lock_unpoisoned(&self.events).push(Observed::Thinking(thinking.map(str::to_owned)));
    }

    fn permission_changed(&self, request: Option<&PermissionRequest>) {
        lock_unpoisoned(&self.events)
            .push(Observed::Permission(request.map(|request| request.tool_name.clone())));
    }
}

pub struct Harness {
    pub engine: Engine,
    pub session: Arc<ScriptedSession>,
    pub observer: Arc<RecordingObserver>,
}

impl Harness {
    pub fn new(scripts: Vec<StepScript>, tools: ToolRegistry, policy: ApprovalPolicy) -> Self {
        let session = Arc::new(ScriptedSession::with_id("test-session", scripts));
        let observer = Arc::new(RecordingObserver::default());
        let engine = Engine::new(
            Arc::clone(&session) as Arc<dyn Session>,
            tools,
            EngineOptions {
                policy,
                observer: Arc::clone(&observer) as Arc<dyn EngineObserver>,
            },
        );
        Self {
            engine,
            session,
            observer,
        }
    }

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.engine.conversation().history
    }

    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.engine.wait_idle())
            .await
            .expect("engine should go idle");
    }
}

/// Polls `predicate` until it holds, failing the test after five seconds.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached before deadline"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Debug, Deserialize)]
pub struct EchoArgs {
    pub text: String,
    #[serde(default)]
    pub fail: bool,
}

/// Returns its `text` argument and counts executions.
pub struct EchoTool {
    name: &'static str,
    read_only: bool,
    pub runs: Arc<AtomicUsize>,
}

impl EchoTool {
    pub fn new(name: &'static str, read_only: bool) -> Self {
        Self {
            name,
            read_only,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Tool for EchoTool {
    type Args = EchoArgs;
    type Output = String;

    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Echoes text back"
    }

    fn schema(&self) -> Schema {
        Schema::object([
            Property::required("text", Schema::string()),
            Property::optional("fail", Schema::boolean()),
        ])
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    async fn execute(&self, args: EchoArgs) -> Result<String, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if args.fail {
            return Err(ToolError::failed(format!("echo refused: {}", args.text)));
        }
        Ok(args.text)
    }

    fn to_llm(&self, output: &String) -> Result<String, ToolError> {
        Ok(output.clone())
    }

    fn title(&self, args: &EchoArgs) -> String {
        format!("Echo {}", args.text)
    }
}

#[derive(Debug, Deserialize)]
pub struct StallArgs {}

/// Signals `started` and then never finishes.
pub struct StallTool {
    pub started: Arc<Notify>,
    pub runs: Arc<AtomicUsize>,
}

impl StallTool {
    pub fn new() -> Self {
        Self {
            started: Arc::new(Notify::new()),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Tool for StallTool {
    type Args = StallArgs;
    type Output = String;

    fn name(&self) -> &str {
        "stall"
    }

    fn description(&self) -> &str {
        "Blocks forever"
    }

    fn schema(&self) -> Schema {
        Schema::object([])
    }

    async fn execute(&self, _args: StallArgs) -> Result<String, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        std::future::pending().await
    }
}

pub fn registry_with<T: Tool>(tools: impl IntoIterator<Item = T>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).expect("unique tool names");
    }
    registry
}

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
