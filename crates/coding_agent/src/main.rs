use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use coding_agent::config::AgentConfig;
use coding_agent::logging::init_tracing;
use coding_agent::tools::builtin_registry;
use coding_agent::{Engine, EngineObserver, EngineOptions, HistoryRecord, PermissionRequest};
use file_guard::FileGuard;
use tokio::io::{AsyncBufReadExt, BufReader};

const QUIT_COMMAND: &str = "/quit";
const ABORT_COMMAND: &str = "/abort";
const EOF_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Prints the conversation to stdout as the engine mutates it.
struct StdoutObserver;

impl EngineObserver for StdoutObserver {
    fn history_appended(&self, record: &HistoryRecord) {
        let line = match record {
            HistoryRecord::User { text } => format!("> {text}"),
            HistoryRecord::Assistant { text } => text.clone(),
            HistoryRecord::ToolCall {
                name, arguments, ..
            } => format!("[tool] {name} {arguments}"),
            HistoryRecord::ToolResult {
                name,
                content,
                is_error,
                ..
            } => {
                let status = if *is_error { "error" } else { "ok" };
                format!("[{name} {status}]\n{content}")
            }
            HistoryRecord::Error { message } => format!("[error] {message}"),
        };
        print_line(&line);
    }

    fn thinking_changed(&self, thinking: Option<&str>) {
        if let Some(label) = thinking {
            print_line(&format!("... {label}"));
        }
    }

    fn permission_changed(&self, request: Option<&PermissionRequest>) {
        if let Some(request) = request {
            print_line(&format!("Allow {}? [y/n]", request.title));
        }
    }
}

fn print_line(line: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AgentConfig::from_env().context("failed to load configuration")?;
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let files = Arc::new(FileGuard::new(&cwd));
    let tools = builtin_registry(&cwd, files, config.bash_timeout)
        .context("failed to register built-in tools")?;
    let session = config
        .create_session()
        .context("failed to create session")?;
    tracing::info!(session_id = session.id(), model = %config.session_model(), "session ready");

    let engine = Engine::new(
        session,
        tools,
        EngineOptions {
            policy: config.approval_policy,
            observer: Arc::new(StdoutObserver),
        },
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line == QUIT_COMMAND {
            engine.abort();
            return Ok(());
        }
        if line == ABORT_COMMAND {
            if !engine.abort() {
                print_line("(nothing to abort)");
            }
            continue;
        }
        if let Some(request) = engine.permissions().current() {
            answer_permission(&engine, &request, line);
            continue;
        }
        engine.send(line);
    }

    drain_on_eof(&engine).await;
    Ok(())
}

fn answer_permission(engine: &Engine, request: &PermissionRequest, answer: &str) {
    match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" => {
            engine.permissions().approve(&request.id);
        }
        "n" | "no" => {
            engine.permissions().deny(&request.id);
        }
        _ => print_line(&format!("Answer y or n for {}", request.title)),
    }
}

/// Lets the current turn finish once input is closed; prompts that can no
/// longer be answered are denied.
async fn drain_on_eof(engine: &Engine) {
    loop {
        tokio::select! {
            _ = engine.wait_idle() => return,
            _ = tokio::time::sleep(EOF_POLL_INTERVAL) => {
                if let Some(request) = engine.permissions().current() {
                    engine.permissions().deny(&request.id);
                }
            }
        }
    }
}
