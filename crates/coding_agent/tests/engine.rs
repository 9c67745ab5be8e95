mod support;

use agent_session::ToolResultItem;
use agent_session_mock::StepScript;
use coding_agent::{ApprovalPolicy, HistoryRecord, ToolRegistry};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

use support::{registry_with, wait_until, EchoTool, Harness};

const FALLBACK_REPLY: &str = "Completed successfully.";

fn user(text: &str) -> HistoryRecord {
    HistoryRecord::User { text: text.into() }
}

fn assistant(text: &str) -> HistoryRecord {
    HistoryRecord::Assistant { text: text.into() }
}

#[tokio::test]
async fn text_turn_records_user_and_assistant_messages() {
    let harness = Harness::new(
        vec![StepScript::new().text("hi there")],
        registry_with([EchoTool::new("echo", true)]),
        ApprovalPolicy::Ask,
    );

    harness.engine.send("hello");
    harness.settle().await;

    assert_eq!(harness.history(), vec![user("hello"), assistant("hi there")]);
    let calls = harness.session.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].text.as_deref(), Some("hello"));
    assert!(calls[0].tool_results.is_empty());
    assert_eq!(
        calls[0].tools.iter().map(|tool| tool.name.as_str()).collect::<Vec<_>>(),
        vec!["echo"]
    );
    assert_eq!(
        harness.observer.thinking(),
        vec![Some("Thinking".to_owned()), None]
    );
    assert!(!harness.engine.is_busy());
}

#[tokio::test]
async fn sends_before_the_turn_starts_are_joined_into_one_step() {
    let harness = Harness::new(vec![], ToolRegistry::new(), ApprovalPolicy::Ask);

    harness.engine.send("a");
    harness.engine.send("b");
    harness.settle().await;

    let calls = harness.session.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].text.as_deref(), Some("a\nb"));
    assert_eq!(harness.history(), vec![user("a\nb"), assistant(FALLBACK_REPLY)]);
}

#[tokio::test]
async fn blank_text_is_ignored() {
    let harness = Harness::new(vec![], ToolRegistry::new(), ApprovalPolicy::Ask);
    harness.engine.send("   ");
    assert!(!harness.engine.is_busy());
    assert_eq!(harness.session.step_count(), 0);
}

#[tokio::test]
async fn text_sent_during_a_step_reenters_the_same_turn() {
    let harness = Harness::new(
        vec![StepScript::new()
            .delay(Duration::from_millis(50))
            .text("first")],
        ToolRegistry::new(),
        ApprovalPolicy::Ask,
    );

    harness.engine.send("a");
    wait_until(|| harness.session.step_count() == 1).await;
    harness.engine.send("b");
    harness.engine.send("c");
    assert!(harness.engine.is_busy());
    harness.settle().await;

    let calls = harness.session.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].text.as_deref(), Some("b\nc"));
    assert_eq!(
        harness.history(),
        vec![
            user("a"),
            assistant("first"),
            user("b\nc"),
            assistant(FALLBACK_REPLY),
        ]
    );
    // The thinking indicator stays up across the re-entered pass.
    assert_eq!(
        harness.observer.thinking(),
        vec![Some("Thinking".to_owned()), None]
    );
}

#[tokio::test]
async fn tool_results_feed_the_next_step() {
    let echo = EchoTool::new("echo", false);
    let runs = echo.runs.clone();
    let harness = Harness::new(
        vec![
            StepScript::new().tool_call("c1", "echo", json!({"text": "x"})),
            StepScript::new().text("done"),
        ],
        registry_with([echo]),
        ApprovalPolicy::Bypass,
    );

    harness.engine.send("run it");
    harness.settle().await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let calls = harness.session.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].text, None);
    assert_eq!(calls[1].tool_results, vec![ToolResultItem::success("c1", "x")]);
    assert_eq!(
        harness.history(),
        vec![
            user("run it"),
            HistoryRecord::ToolCall {
                id: "c1".into(),
                name: "echo".into(),
                arguments: json!({"text": "x"}),
            },
            HistoryRecord::ToolResult {
                id: "c1".into(),
                name: "echo".into(),
                content: "x".into(),
                is_error: false,
            },
            assistant("done"),
        ]
    );
}

#[tokio::test]
async fn tool_calls_from_one_step_run_in_arrival_order() {
    let harness = Harness::new(
        vec![StepScript::new()
            .tool_call("c1", "echo", json!({"text": "one"}))
            .tool_call("c2", "echo", json!({"text": "two"}))],
        registry_with([EchoTool::new("echo", false)]),
        ApprovalPolicy::Bypass,
    );

    harness.engine.send("go");
    harness.settle().await;

    let calls = harness.session.calls();
    assert_eq!(
        calls[1].tool_results,
        vec![
            ToolResultItem::success("c1", "one"),
            ToolResultItem::success("c2", "two"),
        ]
    );
}

#[tokio::test]
async fn bad_calls_become_error_results_without_running() {
    let echo = EchoTool::new("echo", false);
    let runs = echo.runs.clone();
    let harness = Harness::new(
        vec![StepScript::new()
            .tool_call("c1", "missing", json!({}))
            .tool_call("c2", "echo", json!({"text": 5}))
            .tool_call("c3", "echo", json!({"text": "x", "fail": true}))],
        registry_with([echo]),
        ApprovalPolicy::Bypass,
    );

    harness.engine.send("go");
    harness.settle().await;

    let results = &harness.session.calls()[1].tool_results;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], ToolResultItem::error("c1", "Tool missing not found"));
    assert!(results[1].is_error);
    assert!(
        results[1].content.starts_with("Invalid arguments for echo"),
        "unexpected content: {}",
        results[1].content
    );
    assert_eq!(results[2], ToolResultItem::error("c3", "echo refused: x"));
    // Only the schema-valid call reached the tool.
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reasoning_updates_the_thinking_label() {
    let harness = Harness::new(
        vec![StepScript::new().reasoning("Planning").text("ok")],
        ToolRegistry::new(),
        ApprovalPolicy::Ask,
    );

    harness.engine.send("think");
    harness.settle().await;

    assert_eq!(
        harness.observer.thinking(),
        vec![Some("Thinking".to_owned()), Some("Planning".to_owned()), None]
    );

    // The next turn reuses the last label.
    harness.engine.send("again");
    harness.settle().await;
    assert_eq!(
        harness.observer.thinking()[3..].to_vec(),
        vec![Some("Planning".to_owned()), None]
    );
}

#[tokio::test]
async fn backend_errors_are_recorded_and_the_turn_ends() {
    let harness = Harness::new(
        vec![StepScript::new().text("partial").error("usage limit reached")],
        ToolRegistry::new(),
        ApprovalPolicy::Ask,
    );

    harness.engine.send("hello");
    harness.settle().await;

    assert_eq!(
        harness.history(),
        vec![
            user("hello"),
            assistant("partial"),
            HistoryRecord::Error {
                message: "usage limit reached".into()
            },
        ]
    );
    assert_eq!(harness.engine.conversation().thinking, None);
}
