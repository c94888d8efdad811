use chatline_core::model::{Delivery, Message, MessageContent, MessageRole, Thread};
use chatline_core::state::{Notice, NoticeLevel};
use serde_json::Value;

const PREVIEW_CHARS: usize = 42;
const PAYLOAD_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub show_tool_calls: bool,
    pub show_timestamps: bool,
}

pub fn role_badge(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "You",
        MessageRole::Assistant => "Assistant",
        MessageRole::System => "System",
        MessageRole::Tool => "Tool",
        MessageRole::Error => "Error",
        MessageRole::Other => "?",
    }
}

pub fn format_thread_row(index: usize, thread: &Thread, active: bool) -> String {
    let marker = if active { '*' } else { ' ' };
    let when = thread
        .updated_at()
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    let mut row = format!("{marker}{:>3}. {} [{}]", index + 1, thread.title, thread.id);
    if !when.is_empty() {
        row.push_str(&format!("  {when}"));
    }
    if !thread.last_message.is_empty() {
        row.push_str(&format!("\n       {}", snippet(&thread.last_message, PREVIEW_CHARS)));
    }
    row
}

/// Render one message, or `None` when the options hide it.
pub fn format_message(message: &Message, options: RenderOptions) -> Option<String> {
    let body = match &message.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Error(text) => format!("! {text}"),
        MessageContent::ToolCall { name, arguments } => {
            if !options.show_tool_calls {
                return None;
            }
            format!("→ {name}({})", compact(arguments))
        }
        MessageContent::ToolResponse { name, response } => {
            if !options.show_tool_calls {
                return None;
            }
            format!("← {name}: {}", compact(response))
        }
        MessageContent::Confirmation(prompt) => format!(
            "[{}] {} ({} / {})",
            prompt.title, prompt.message, prompt.confirm_text, prompt.cancel_text
        ),
        MessageContent::Structured { kind, payload } => format!("<{kind}> {}", compact(payload)),
    };

    let mut line = String::new();
    if options.show_timestamps {
        if let Some(at) = message.sent_at() {
            line.push_str(&at.format("%H:%M ").to_string());
        }
    }
    line.push_str(role_badge(message.role));
    line.push_str(": ");
    line.push_str(&body);
    match message.delivery {
        Delivery::Confirmed => {}
        Delivery::Pending => line.push_str("  (sending…)"),
        Delivery::Failed => line.push_str("  (not sent; /retry to resend)"),
    }
    Some(line)
}

pub fn format_notice(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Info => format!("· {}", notice.text),
        NoticeLevel::Error => format!("✗ {}", notice.text),
    }
}

fn compact(value: &Value) -> String {
    let raw = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    snippet(&raw, PAYLOAD_CHARS)
}

pub fn snippet(content: &str, max: usize) -> String {
    let trimmed = content.trim();
    let mut chars = trimmed.chars();
    let mut acc: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        acc.push('…');
    }
    acc.replace('\n', " ")
}
