//! Plain-text rendering of conversation messages for the terminal.

use client_core::{Message, MessageKind, Session, ToolOutput};
use serde_json::Value;

const MAX_TOOL_CONTENT_CHARS: usize = 240;

pub fn render_message(message: &Message) -> String {
    match &message.kind {
        MessageKind::UserText { text } => format!("you> {text}"),
        MessageKind::BotText { text } | MessageKind::Error { text } => format!("bot> {text}"),
        MessageKind::ToolCall { name, args } => {
            if args.is_null() {
                format!("  -> calling tool `{name}`")
            } else {
                format!("  -> calling tool `{name}` {args}")
            }
        }
        MessageKind::ToolOutput(output) => render_tool_output(output),
        MessageKind::SessionInfo {
            session_id,
            message_count,
        } => format!(
            "  [session {}... | messages: {message_count}]",
            prefix_chars(session_id, 8)
        ),
    }
}

pub fn status_line(session: &Session) -> String {
    format!(
        "status: {} | session {} | {} messages",
        session.status.label(),
        session.id,
        session.messages.len()
    )
}

fn render_tool_output(output: &ToolOutput) -> String {
    let mut lines = vec![format!("  <- result from `{}`", output.name)];
    match output.chart() {
        Some(chart) => lines.push(format!("     [{}]", describe_chart(&chart))),
        None => lines.push(format!(
            "     {}",
            truncate(&output.content, MAX_TOOL_CONTENT_CHARS)
        )),
    }

    if let Some(source) = output.effective_data_source() {
        lines.push(format!("     data source: {}", source.name));
        if let Some(description) = source.description.filter(|d| !d.is_empty()) {
            lines.push(format!("       {description}"));
        }
        if let Some(url) = source.source_url {
            lines.push(format!("       full data: {url}"));
        }
    }
    lines.join("\n")
}

// Vega-Lite accepts both `"mark": "bar"` and `"mark": {"type": "bar"}`; same for titles.
fn describe_chart(chart: &Value) -> String {
    let mark = chart
        .get("mark")
        .and_then(|mark| mark.as_str().or_else(|| mark.get("type")?.as_str()));
    let title = chart
        .get("title")
        .and_then(|title| title.as_str().or_else(|| title.get("text")?.as_str()));

    let kind = match mark {
        Some(mark) => format!("{mark} chart"),
        None => "chart".to_string(),
    };
    match title {
        Some(title) => format!("{kind}: {title}"),
        None => kind,
    }
}

fn prefix_chars(text: &str, count: usize) -> &str {
    match text.char_indices().nth(count) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let head = prefix_chars(text, max_chars);
    if head.len() < text.len() {
        format!("{head}...")
    } else {
        text.to_string()
    }
}
