//! Terminal approval channel: prompts on stderr, reads the answer from stdin.

use std::io::{self, BufRead, Write};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tollgate_permissions::{ApprovalCorrelator, ApprovalRequest, Decision};

/// Answer approval requests from the terminal as they are published.
///
/// Runs until every sender of `requests` is dropped.
pub fn spawn_terminal_approver(
    mut requests: mpsc::UnboundedReceiver<ApprovalRequest>,
    correlator: ApprovalCorrelator,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            // Expired while an earlier prompt was on screen.
            if !correlator.is_pending(&request.id) {
                tracing::debug!(request_id = %request.id, "skipping expired approval");
                continue;
            }
            let decision = prompt_decision(&request).await;
            if !correlator.resolve(&request.id, decision) {
                eprintln!("  (request {} is no longer pending)", request.id);
            }
        }
    })
}

async fn prompt_decision(request: &ApprovalRequest) -> Decision {
    let tool_name = request.tool_name.clone();
    let input_summary = summarize_input(&request.input);
    let is_destructive = request.is_destructive;

    // Use spawn_blocking since we read from stdin
    let result = tokio::task::spawn_blocking(move || {
        let stderr = io::stderr();
        let mut err = stderr.lock();

        let _ = writeln!(err);
        if is_destructive {
            let _ = writeln!(err, "  Destructive action: {tool_name}");
        } else {
            let _ = writeln!(err, "  Permission required: {tool_name}");
        }
        if !input_summary.is_empty() {
            let _ = writeln!(err, "  {input_summary}");
        }
        let _ = write!(err, "  {}  > ", choices(is_destructive));
        let _ = err.flush();

        let mut input = String::new();
        let stdin = io::stdin();
        let _ = stdin.lock().read_line(&mut input);
        parse_choice(&input, is_destructive)
    })
    .await;

    result.unwrap_or_else(|_| Decision::deny("Approval prompt failed"))
}

fn choices(is_destructive: bool) -> &'static str {
    if is_destructive {
        "[y] Allow once  [n] Deny"
    } else {
        "[y] Allow once  [s] Allow for session  [n] Deny"
    }
}

/// Map a typed answer to a decision. Anything unrecognized denies.
fn parse_choice(answer: &str, is_destructive: bool) -> Decision {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Decision::Allow,
        "s" | "session" if !is_destructive => Decision::AllowForSession,
        _ => Decision::deny("Denied by user"),
    }
}

/// Create a brief summary of tool input for display.
fn summarize_input(input: &serde_json::Value) -> String {
    match input {
        serde_json::Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .take(3)
                .map(|(k, v)| {
                    let val = match v {
                        serde_json::Value::String(s) => truncate(s, 60),
                        other => truncate(&other.to_string(), 60),
                    };
                    format!("{k}: {val}")
                })
                .collect();
            parts.join(", ")
        }
        _ => String::new(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
