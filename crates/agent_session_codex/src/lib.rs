//! Codex-backed implementation of the `agent_session` contract.
//!
//! [`CodexSession`] keeps the backend-native transcript as raw JSON items and
//! maps the Responses event stream onto [`SessionUpdate`]s: finished reasoning
//! summaries, finished assistant text, and finished `function_call` items. The
//! transcript only grows when `response.completed` arrives with a completed
//! status.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_session::{
    ModelDescriptor, Session, SessionError, SessionProvider, SessionUpdate, StepArguments,
    ToolResultItem, UpdateSink,
};
use async_trait::async_trait;
use codex_api::items::{function_call_output, function_tool, user_message, web_search_tool, FunctionCallItem};
use codex_api::{
    CodexApiClient, CodexApiConfig, CodexApiError, CodexEventStream, CodexRequest,
    CodexResponseStatus, CodexStreamEvent, ReasoningEffort,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub const CODEX_PROVIDER_ID: &str = "codex";
/// Backend model every descriptor resolves to; descriptors differ by effort.
pub const CODEX_BACKEND_MODEL: &str = "gpt-5-codex";

const INCOMPLETE_STREAM_MESSAGE: &str = "stream ended before the response completed";
const ERROR_OUTPUT_PREFIX: &str = "Error: ";

/// Seam between the session and the HTTP transport.
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn open(
        &self,
        request: &CodexRequest,
        cancel: &CancellationToken,
    ) -> Result<CodexEventStream, CodexApiError>;
}

#[derive(Debug)]
struct HttpStreamClient {
    client: CodexApiClient,
}

#[async_trait]
impl StreamClient for HttpStreamClient {
    async fn open(
        &self,
        request: &CodexRequest,
        cancel: &CancellationToken,
    ) -> Result<CodexEventStream, CodexApiError> {
        self.client.stream(request, Some(cancel)).await
    }
}

/// Settings shared by every session a [`CodexProvider`] creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexSessionConfig {
    pub access_token: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub instructions: Option<String>,
    pub web_search: bool,
}

impl CodexSessionConfig {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            base_url: None,
            timeout: None,
            instructions: None,
            web_search: true,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    #[must_use]
    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    fn api_config(&self, session_id: &str) -> CodexApiConfig {
        let mut config = CodexApiConfig::new(self.access_token.clone()).with_session_id(session_id);
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.clone());
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        config
    }
}

#[derive(Debug, Default)]
struct Transcript {
    items: Vec<Value>,
    /// Tool outputs sent with a step that never completed.
    carried_results: Vec<ToolResultItem>,
}

impl Transcript {
    fn known_call_ids(&self) -> HashSet<&str> {
        self.items
            .iter()
            .filter_map(|item| {
                (item.get("type").and_then(Value::as_str) == Some("function_call"))
                    .then(|| item.get("call_id").and_then(Value::as_str))
                    .flatten()
            })
            .collect()
    }
}

pub struct CodexSession {
    id: String,
    effort: ReasoningEffort,
    instructions: Option<String>,
    web_search: bool,
    client: Arc<dyn StreamClient>,
    transcript: Mutex<Transcript>,
}

impl CodexSession {
    pub fn new(
        effort: ReasoningEffort,
        config: &CodexSessionConfig,
    ) -> Result<Self, SessionError> {
        let id = uuid::Uuid::new_v4().to_string();
        let client = CodexApiClient::new(config.api_config(&id))
            .map_err(|error| SessionError::Init(error.to_string()))?;
        Ok(Self::with_stream_client(
            id,
            effort,
            config,
            Arc::new(HttpStreamClient { client }),
        ))
    }

    pub fn with_stream_client(
        id: impl Into<String>,
        effort: ReasoningEffort,
        config: &CodexSessionConfig,
        client: Arc<dyn StreamClient>,
    ) -> Self {
        Self {
            id: id.into(),
            effort,
            instructions: config.instructions.clone(),
            web_search: config.web_search,
            client,
            transcript: Mutex::new(Transcript::default()),
        }
    }

    pub fn effort(&self) -> ReasoningEffort {
        self.effort
    }

    /// Snapshot of the committed backend transcript.
    pub fn history(&self) -> Vec<Value> {
        lock_unpoisoned(&self.transcript).items.clone()
    }

    /// Builds the request for `args`, returning it with the items this step
    /// would commit to the transcript on completion.
    fn prepare(&self, args: StepArguments) -> (CodexRequest, Vec<Value>) {
        let mut transcript = lock_unpoisoned(&self.transcript);

        let mut results = std::mem::take(&mut transcript.carried_results);
        results.extend(args.tool_results);
        let known = transcript.known_call_ids();
        let (results, orphaned): (Vec<_>, Vec<_>) = results
            .into_iter()
            .partition(|result| known.contains(result.call_id.as_str()));
        for result in &orphaned {
            tracing::debug!(session_id = %self.id, call_id = %result.call_id, "dropping output for a call the transcript never recorded");
        }

        let mut new_items: Vec<Value> = results
            .iter()
            .map(|result| {
                let output = if result.is_error {
                    format!("{ERROR_OUTPUT_PREFIX}{}", result.content)
                } else {
                    result.content.clone()
                };
                function_call_output(&result.call_id, &output)
            })
            .collect();
        if let Some(text) = args.text.as_deref().filter(|text| !text.is_empty()) {
            new_items.push(user_message(text));
        }
        transcript.carried_results = results;

        let mut input = transcript.items.clone();
        input.extend(new_items.iter().cloned());
        drop(transcript);

        let mut tools: Vec<Value> = args
            .tools
            .into_iter()
            .map(|tool| function_tool(&tool.name, &tool.description, tool.parameters))
            .collect();
        if self.web_search {
            tools.push(web_search_tool());
        }

        let request = CodexRequest::new(CODEX_BACKEND_MODEL, Value::Array(input), self.instructions.clone())
            .with_reasoning(self.effort)
            .with_tools(tools)
            .with_prompt_cache_key(self.id.clone());
        (request, new_items)
    }

    fn carry(&self, results: Vec<ToolResultItem>) {
        if results.is_empty() {
            return;
        }
        tracing::debug!(session_id = %self.id, count = results.len(), "step cancelled before sending; carrying tool outputs");
        lock_unpoisoned(&self.transcript).carried_results.extend(results);
    }

    fn commit(&self, new_items: Vec<Value>, output: Vec<Value>) {
        let mut transcript = lock_unpoisoned(&self.transcript);
        transcript.items.extend(new_items);
        transcript.items.extend(output);
        transcript.carried_results.clear();
    }
}

/// Outcome of reading one response stream to its end.
enum StreamOutcome {
    Completed(Vec<Value>),
    Failed(String),
    Cancelled,
}

#[async_trait]
impl Session for CodexSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn step(&self, args: StepArguments, mut updates: UpdateSink) {
        let cancel = updates.cancel_token().clone();
        if cancel.is_cancelled() {
            // A newer step may already be running; keep the outputs for it.
            self.carry(args.tool_results);
            return;
        }
        let (request, new_items) = self.prepare(args);
        tracing::debug!(
            session_id = %self.id,
            input_items = request.input.as_array().map_or(0, Vec::len),
            "starting Codex step"
        );

        let outcome = match self.client.open(&request, &cancel).await {
            Ok(mut stream) => {
                let outcome = read_stream(&mut stream, &cancel, &mut updates).await;
                if stream.skipped() > 0 {
                    tracing::debug!(session_id = %self.id, skipped = stream.skipped(), "malformed events skipped");
                }
                outcome
            }
            Err(CodexApiError::Cancelled) => StreamOutcome::Cancelled,
            Err(error) => StreamOutcome::Failed(error.to_string()),
        };

        match outcome {
            StreamOutcome::Cancelled => {}
            StreamOutcome::Completed(output) => {
                if !cancel.is_cancelled() {
                    self.commit(new_items, output);
                }
            }
            StreamOutcome::Failed(message) => {
                tracing::warn!(session_id = %self.id, %message, "Codex step failed");
                updates.send(SessionUpdate::error(message));
            }
        }
        updates.end();
    }
}

async fn read_stream(
    stream: &mut CodexEventStream,
    cancel: &CancellationToken,
    updates: &mut UpdateSink,
) -> StreamOutcome {
    let mut completed: Option<Vec<Value>> = None;
    let mut failure: Option<String> = None;

    while let Some(next) = stream.next_event_or_cancel(cancel).await {
        let event = match next {
            Ok(event) => event,
            Err(CodexApiError::Cancelled) => return StreamOutcome::Cancelled,
            Err(error) => {
                failure.get_or_insert_with(|| error.to_string());
                break;
            }
        };

        match event {
            CodexStreamEvent::ReasoningSummaryTextDone { text, .. } => {
                updates.send(SessionUpdate::Reasoning {
                    text: strip_bold(&text),
                });
            }
            CodexStreamEvent::OutputTextDone { text, .. } => {
                updates.send(SessionUpdate::Text { text });
            }
            CodexStreamEvent::OutputItemDone { item, .. } => {
                if let Some(call) = FunctionCallItem::from_item(&item) {
                    updates.send(tool_call_update(call));
                }
            }
            CodexStreamEvent::ResponseCompleted { ref response, .. } => {
                match event.completed_status() {
                    Some(CodexResponseStatus::Completed) | None => {
                        let output = response
                            .get("output")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default();
                        completed = Some(output);
                    }
                    Some(status) => {
                        failure.get_or_insert_with(|| {
                            format!("response finished with status {}", status.as_str())
                        });
                    }
                }
            }
            CodexStreamEvent::ResponseFailed { .. } | CodexStreamEvent::Error { .. } => {
                if let Some(message) = event.failure_message() {
                    failure.get_or_insert(message);
                }
            }
            other => tracing::trace!(event = other.event_type(), "ignoring event"),
        }
    }

    if cancel.is_cancelled() {
        return StreamOutcome::Cancelled;
    }
    match (failure, completed) {
        (Some(message), _) => StreamOutcome::Failed(message),
        (None, Some(output)) => StreamOutcome::Completed(output),
        (None, None) => StreamOutcome::Failed(INCOMPLETE_STREAM_MESSAGE.to_owned()),
    }
}

fn tool_call_update(call: FunctionCallItem) -> SessionUpdate {
    match serde_json::from_str::<Value>(&call.arguments) {
        Ok(arguments) => SessionUpdate::ToolCall {
            id: call.call_id,
            name: call.name,
            arguments,
        },
        Err(error) => SessionUpdate::error(format!(
            "Invalid arguments for tool call {} ({}): {error}",
            call.name, call.call_id
        )),
    }
}

/// Removes `**` wrapping when it encloses the entire text.
fn strip_bold(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed
        .strip_prefix("**")
        .and_then(|inner| inner.strip_suffix("**"))
    {
        Some(inner) if !inner.contains("**") => inner.trim().to_owned(),
        _ => text.to_owned(),
    }
}

/// Provider exposing one descriptor per reasoning effort.
#[derive(Debug, Clone)]
pub struct CodexProvider {
    config: CodexSessionConfig,
}

impl CodexProvider {
    pub fn new(config: CodexSessionConfig) -> Result<Self, SessionError> {
        if config.access_token.trim().is_empty() {
            return Err(SessionError::Init("Codex access token is required".to_owned()));
        }
        Ok(Self { config })
    }
}

impl SessionProvider for CodexProvider {
    fn name(&self) -> &str {
        CODEX_PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        "OpenAI Codex (Subscription)"
    }

    fn models(&self) -> Vec<ModelDescriptor> {
        [
            (ReasoningEffort::High, "High"),
            (ReasoningEffort::Medium, "Medium"),
            (ReasoningEffort::Low, "Low"),
        ]
        .into_iter()
        .map(|(effort, label)| ModelDescriptor {
            name: model_descriptor_name(effort),
            display_name: format!("GPT-5 Codex ({label})"),
        })
        .collect()
    }

    fn create_session(&self, model: &str) -> Result<Arc<dyn Session>, SessionError> {
        let effort = parse_model_descriptor(model)
            .ok_or_else(|| SessionError::UnknownModel(model.to_owned()))?;
        let session = CodexSession::new(effort, &self.config)?;
        tracing::info!(session_id = %session.id, model, "created Codex session");
        Ok(Arc::new(session))
    }
}

pub fn model_descriptor_name(effort: ReasoningEffort) -> String {
    format!("{CODEX_BACKEND_MODEL}-{}", effort.as_str())
}

pub fn parse_model_descriptor(model: &str) -> Option<ReasoningEffort> {
    model
        .strip_prefix(CODEX_BACKEND_MODEL)?
        .strip_prefix('-')
        .and_then(ReasoningEffort::parse)
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use agent_session::ToolDefinition;
    use futures_util::{stream, StreamExt};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    enum FakeOutcome {
        Events(Vec<Value>),
        /// Delivers the events, then never yields again.
        Stalled(Vec<Value>),
        Raw(String),
        Error(CodexApiError),
    }

    fn render_events(events: &[Value]) -> String {
        events
            .iter()
            .map(|event| format!("event: {}\ndata: {event}\n\n", event["type"].as_str().unwrap_or("")))
            .collect()
    }

    fn chunked(body: String) -> Vec<Result<Vec<u8>, CodexApiError>> {
        body.into_bytes()
            .chunks(17)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect()
    }

    struct FakeStreamClient {
        outcomes: Mutex<VecDeque<FakeOutcome>>,
        requests: Mutex<Vec<CodexRequest>>,
    }

    impl FakeStreamClient {
        fn new(outcomes: Vec<FakeOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CodexRequest> {
            lock_unpoisoned(&self.requests).clone()
        }
    }

    #[async_trait]
    impl StreamClient for FakeStreamClient {
        async fn open(
            &self,
            request: &CodexRequest,
            _cancel: &CancellationToken,
        ) -> Result<CodexEventStream, CodexApiError> {
            lock_unpoisoned(&self.requests).push(request.clone());
            let body = match lock_unpoisoned(&self.outcomes).pop_front() {
                Some(FakeOutcome::Events(events)) => render_events(&events),
                Some(FakeOutcome::Stalled(events)) => {
                    let chunks = chunked(render_events(&events));
                    return Ok(CodexEventStream::from_byte_stream(
                        stream::iter(chunks).chain(stream::pending()),
                    ));
                }
                Some(FakeOutcome::Raw(body)) => body,
                Some(FakeOutcome::Error(error)) => return Err(error),
                None => panic!("fake stream outcome should be scripted for every step"),
            };
            Ok(CodexEventStream::from_byte_stream(stream::iter(chunked(body))))
        }
    }

    fn session(client: Arc<FakeStreamClient>) -> CodexSession {
        let config = CodexSessionConfig::new("token").with_web_search(false);
        CodexSession::with_stream_client("sess-1", ReasoningEffort::Medium, &config, client)
    }

    async fn step(session: &CodexSession, args: StepArguments) -> Vec<SessionUpdate> {
        let (sink, mut rx) = UpdateSink::channel(CancellationToken::new());
        session.step(args, sink).await;
        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    fn text_args(text: &str) -> StepArguments {
        StepArguments {
            text: Some(text.to_owned()),
            ..StepArguments::default()
        }
    }

    fn reasoning_done(text: &str) -> Value {
        json!({"type": "response.reasoning_summary_text.done", "sequence_number": 1, "item_id": "rs_1", "output_index": 0, "summary_index": 0, "text": text})
    }

    fn text_done(text: &str) -> Value {
        json!({"type": "response.output_text.done", "sequence_number": 2, "item_id": "msg_1", "output_index": 1, "content_index": 0, "text": text, "logprobs": []})
    }

    fn function_call(call_id: &str, arguments: &str) -> Value {
        json!({"type": "function_call", "id": format!("fc_{call_id}"), "status": "completed", "call_id": call_id, "name": "Read", "arguments": arguments})
    }

    fn item_done(item: Value) -> Value {
        json!({"type": "response.output_item.done", "sequence_number": 3, "output_index": 2, "item": item})
    }

    fn completed(status: &str, output: Vec<Value>) -> Value {
        json!({"type": "response.completed", "sequence_number": 4, "response": {"id": "resp_1", "status": status, "output": output}})
    }

    #[tokio::test]
    async fn maps_events_and_commits_history_on_completion() {
        let call = function_call("call_1", r#"{"file_path":"a.txt"}"#);
        let client = FakeStreamClient::new(vec![
            FakeOutcome::Events(vec![
                reasoning_done("**Planning the read**"),
                text_done("Let me look."),
                item_done(call.clone()),
                completed("completed", vec![call.clone()]),
            ]),
            FakeOutcome::Events(vec![completed("completed", vec![])]),
        ]);
        let session = session(client.clone());

        let updates = step(&session, text_args("read a.txt")).await;
        assert_eq!(
            updates,
            vec![
                SessionUpdate::Reasoning { text: "Planning the read".to_owned() },
                SessionUpdate::Text { text: "Let me look.".to_owned() },
                SessionUpdate::ToolCall {
                    id: "call_1".to_owned(),
                    name: "Read".to_owned(),
                    arguments: json!({"file_path": "a.txt"}),
                },
                SessionUpdate::Ended,
            ]
        );
        assert_eq!(session.history(), vec![user_message("read a.txt"), call.clone()]);

        let follow_up = StepArguments {
            tool_results: vec![ToolResultItem::error("call_1", "File not found: a.txt")],
            tools: vec![ToolDefinition {
                name: "Read".to_owned(),
                description: "Reads a file".to_owned(),
                parameters: json!({"type": "object"}),
            }],
            ..StepArguments::default()
        };
        step(&session, follow_up).await;

        let requests = client.requests();
        let input = requests[1].input.as_array().expect("input array");
        assert_eq!(input.len(), 3);
        assert_eq!(input[2], function_call_output("call_1", "Error: File not found: a.txt"));
        assert_eq!(requests[1].tools.len(), 1);
        assert_eq!(requests[1].prompt_cache_key.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn failed_step_reports_one_error_and_carries_tool_results() {
        let call = function_call("call_9", "{}");
        let client = FakeStreamClient::new(vec![
            FakeOutcome::Events(vec![completed("completed", vec![call])]),
            FakeOutcome::Events(vec![
                json!({"type": "response.failed", "sequence_number": 1, "response": {"error": {"message": "overloaded"}}}),
                json!({"type": "error", "code": "server_error", "message": "again"}),
            ]),
            FakeOutcome::Events(vec![completed("completed", vec![])]),
        ]);
        let session = session(client.clone());
        step(&session, text_args("go")).await;

        let args = StepArguments {
            tool_results: vec![ToolResultItem::success("call_9", "ok")],
            ..StepArguments::default()
        };
        let updates = step(&session, args).await;
        assert_eq!(
            updates,
            vec![SessionUpdate::error("overloaded"), SessionUpdate::Ended]
        );
        assert_eq!(session.history().len(), 2);

        step(&session, StepArguments::default()).await;
        let requests = client.requests();
        let input = requests[2].input.as_array().expect("input array");
        assert_eq!(input.last(), Some(&function_call_output("call_9", "ok")));
        assert_eq!(session.history().len(), 3);
    }

    #[tokio::test]
    async fn stream_without_completion_is_an_error() {
        let client = FakeStreamClient::new(vec![FakeOutcome::Events(vec![text_done("partial")])]);
        let session = session(client);

        let updates = step(&session, text_args("hi")).await;
        assert_eq!(
            updates,
            vec![
                SessionUpdate::Text { text: "partial".to_owned() },
                SessionUpdate::error(INCOMPLETE_STREAM_MESSAGE),
                SessionUpdate::Ended,
            ]
        );
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn incomplete_status_does_not_commit() {
        let client = FakeStreamClient::new(vec![FakeOutcome::Events(vec![completed("incomplete", vec![])])]);
        let session = session(client);

        let updates = step(&session, text_args("hi")).await;
        assert_eq!(
            updates,
            vec![
                SessionUpdate::error("response finished with status incomplete"),
                SessionUpdate::Ended,
            ]
        );
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn invalid_tool_arguments_become_an_error_update() {
        let client = FakeStreamClient::new(vec![FakeOutcome::Events(vec![
            item_done(function_call("call_2", "{not json")),
            completed("completed", vec![]),
        ])]);
        let session = session(client);

        let updates = step(&session, text_args("hi")).await;
        assert_eq!(updates.len(), 2);
        assert!(matches!(&updates[0], SessionUpdate::Error { message } if message.contains("call_2")));
    }

    #[tokio::test]
    async fn malformed_blocks_are_skipped() {
        let mut body = String::new();
        body.push_str(&format!("data: {}\n\n", text_done("one")));
        body.push_str("data: {broken\n\n");
        body.push_str(&format!("data: {}\n\n", completed("completed", vec![])));
        let client = FakeStreamClient::new(vec![FakeOutcome::Raw(body)]);
        let session = session(client);

        let updates = step(&session, text_args("hi")).await;
        assert_eq!(
            updates,
            vec![SessionUpdate::Text { text: "one".to_owned() }, SessionUpdate::Ended]
        );
    }

    #[tokio::test]
    async fn transport_error_and_cancellation() {
        let client = FakeStreamClient::new(vec![
            FakeOutcome::Error(CodexApiError::MissingAccountId),
            FakeOutcome::Error(CodexApiError::Cancelled),
        ]);
        let session = session(client.clone());

        let updates = step(&session, text_args("hi")).await;
        assert_eq!(updates.len(), 2);
        assert!(matches!(&updates[0], SessionUpdate::Error { message } if message.contains("account id")));

        let (sink, mut rx) = UpdateSink::channel(CancellationToken::new());
        let cancel = sink.cancel_token().clone();
        let running = session.step(text_args("hi"), sink);
        cancel.cancel();
        running.await;
        assert!(rx.try_recv().is_err());
        // A step that starts out cancelled never reaches the transport.
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn abort_mid_stream_commits_nothing_and_carries_results() {
        let call = function_call("call_1", "{}");
        let client = FakeStreamClient::new(vec![
            FakeOutcome::Events(vec![completed("completed", vec![call])]),
            FakeOutcome::Stalled(vec![text_done("half an answer")]),
            FakeOutcome::Events(vec![completed("completed", vec![])]),
        ]);
        let session = Arc::new(session(client.clone()));
        step(&session, text_args("go")).await;
        assert_eq!(session.history().len(), 2);

        let cancel = CancellationToken::new();
        let (sink, mut rx) = UpdateSink::channel(cancel.clone());
        let args = StepArguments {
            tool_results: vec![ToolResultItem::success("call_1", "done")],
            ..StepArguments::default()
        };
        let running = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.step(args, sink).await }
        });

        assert_eq!(
            rx.recv().await,
            Some(SessionUpdate::Text { text: "half an answer".to_owned() })
        );
        cancel.cancel();
        running.await.expect("step task");

        assert_eq!(rx.recv().await, None, "nothing may follow a cancellation");
        assert_eq!(session.history().len(), 2);

        step(&session, StepArguments::default()).await;
        let requests = client.requests();
        let input = requests[2].input.as_array().expect("input array");
        assert_eq!(input.last(), Some(&function_call_output("call_1", "done")));
        assert_eq!(session.history().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_step_keeps_results_for_the_next_one() {
        let call = function_call("call_5", "{}");
        let client = FakeStreamClient::new(vec![
            FakeOutcome::Events(vec![completed("completed", vec![call])]),
            FakeOutcome::Events(vec![completed("completed", vec![])]),
        ]);
        let session = session(client.clone());
        step(&session, text_args("go")).await;

        // A stale step whose turn was already aborted.
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (sink, _rx) = UpdateSink::channel(cancel);
        let stale = StepArguments {
            tool_results: vec![ToolResultItem::error("call_5", INTERRUPTED)],
            ..StepArguments::default()
        };
        session.step(stale, sink).await;
        assert_eq!(client.requests().len(), 1);

        step(&session, text_args("next")).await;
        let requests = client.requests();
        let input = requests[1].input.as_array().expect("input array");
        assert_eq!(
            input[input.len() - 2],
            function_call_output("call_5", &format!("Error: {INTERRUPTED}"))
        );
        assert_eq!(input[input.len() - 1], user_message("next"));
    }

    const INTERRUPTED: &str = "Tool call was interrupted by the user";

    #[test]
    fn descriptors_map_to_backend_model_and_effort() {
        assert_eq!(parse_model_descriptor("gpt-5-codex-high"), Some(ReasoningEffort::High));
        assert_eq!(parse_model_descriptor("gpt-5-codex-low"), Some(ReasoningEffort::Low));
        assert_eq!(parse_model_descriptor("gpt-5-codex"), None);
        assert_eq!(parse_model_descriptor("gpt-4o-high"), None);

        let provider = CodexProvider::new(CodexSessionConfig::new("token")).expect("provider");
        let names: Vec<String> = provider.models().into_iter().map(|model| model.name).collect();
        assert_eq!(names, vec!["gpt-5-codex-high", "gpt-5-codex-medium", "gpt-5-codex-low"]);
        let error = provider.create_session("gpt-x").err().expect("unknown model");
        assert_eq!(error, SessionError::UnknownModel("gpt-x".to_owned()));
    }

    #[test]
    fn bold_wrapping_is_removed_only_when_it_spans_the_text() {
        assert_eq!(strip_bold("**Inspecting files**"), "Inspecting files");
        assert_eq!(strip_bold("**A** and **B**"), "**A** and **B**");
        assert_eq!(strip_bold("plain"), "plain");
    }
}
