//! In-memory stand-in for the chat service, used by tests, the smoke task and
//! offline mode. It follows the server's observable behaviour: replies are
//! generated asynchronously and drained through the poll endpoint.

use crate::model::{
    wire_timestamp, Ack, GlobalContext, Message, MessageRole, PollUpdate, SentMessage, Thread,
    ThreadMessages, WireMessage,
};
use crate::poller;
use crate::transport::{HttpBackend, HttpRequest, HttpResponse, Method};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use uuid::Uuid;

const TITLE_CHARS: usize = 30;
const PREVIEW_CHARS: usize = 100;

/// A scripted assistant reply. Each poll drains one batch; the reply is
/// finished once the last batch has been delivered.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    batches: VecDeque<Vec<WireMessage>>,
}

impl ScriptedReply {
    pub fn new(batches: Vec<Vec<WireMessage>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }

    /// Report "still waiting" `pending_polls` times, then deliver `messages`.
    pub fn after_polls(pending_polls: usize, messages: Vec<WireMessage>) -> Self {
        let mut batches = vec![Vec::new(); pending_polls];
        batches.push(messages);
        Self::new(batches)
    }

    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::after_polls(1, vec![Message::text(id, MessageRole::Assistant, text).into()])
    }

    /// Stream `fragments` as chunks of a single message, one per poll.
    pub fn streamed(id: &str, fragments: &[&str]) -> Self {
        let mut batches: Vec<Vec<WireMessage>> = fragments
            .iter()
            .map(|fragment| vec![WireMessage::chunk(id, *fragment)])
            .collect();
        batches.push(Vec::new());
        Self::new(batches)
    }
}

/// Outcome forced onto the next matching request.
#[derive(Debug, Clone)]
pub enum Injected {
    Status(u16),
    Unreachable,
    Delay(Duration),
}

#[derive(Debug, Clone)]
struct Injection {
    method: Method,
    path: String,
    outcome: Injected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub bearer: Option<String>,
}

struct StoredThread {
    thread: Thread,
    messages: Vec<Message>,
}

#[derive(Default)]
struct BackendState {
    threads: Vec<StoredThread>,
    pending: HashMap<String, ScriptedReply>,
    scripted: VecDeque<ScriptedReply>,
    injections: Vec<Injection>,
    calls: Vec<RecordedCall>,
    global_context: String,
    required_token: Option<String>,
    next_id: u64,
}

impl BackendState {
    fn next_message_id(&mut self) -> String {
        self.next_id += 1;
        format!("m-{:04}", self.next_id)
    }

    fn thread_mut(&mut self, thread_id: &str) -> Option<&mut StoredThread> {
        self.threads
            .iter_mut()
            .find(|stored| stored.thread.id == thread_id)
    }

    fn take_injection(&mut self, method: Method, path: &str) -> Option<Injected> {
        let index = self
            .injections
            .iter()
            .position(|rule| rule.method == method && rule.path == path)?;
        Some(self.injections.remove(index).outcome)
    }

    fn schedule_reply(&mut self, thread_id: &str, prompt: &str) {
        let reply = self.scripted.pop_front().unwrap_or_else(|| {
            let id = self.next_message_id();
            ScriptedReply::text(id, format!("[Mock] received '{prompt}'."))
        });
        self.pending.insert(thread_id.to_owned(), reply);
    }

    /// Store a message and move its thread to the front, newest first.
    fn record_message(&mut self, thread_id: &str, message: Message) {
        let Some(index) = self
            .threads
            .iter()
            .position(|stored| stored.thread.id == thread_id)
        else {
            return;
        };
        let mut stored = self.threads.remove(index);
        stored.thread.last_message = preview(&message);
        stored.thread.timestamp = message.timestamp.clone();
        stored.messages.push(message);
        self.threads.insert(0, stored);
    }
}

#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject requests whose bearer token differs from `token`.
    pub fn require_token(&self, token: impl Into<String>) {
        self.state.lock().required_token = Some(token.into());
    }

    pub fn seed_thread(&self, id: &str, title: &str, messages: Vec<Message>) {
        let timestamp = messages
            .last()
            .map(|message| message.timestamp.clone())
            .unwrap_or_else(|| wire_timestamp(Utc::now()));
        let last_message = messages.last().map(preview).unwrap_or_default();
        let mut state = self.state.lock();
        state.threads.insert(
            0,
            StoredThread {
                thread: Thread {
                    id: id.to_owned(),
                    title: title.to_owned(),
                    last_message,
                    timestamp,
                },
                messages,
            },
        );
    }

    /// Mark `thread_id` as still generating `reply`.
    pub fn seed_pending(&self, thread_id: &str, reply: ScriptedReply) {
        self.state.lock().pending.insert(thread_id.to_owned(), reply);
    }

    /// Queue the reply produced by the next message sent.
    pub fn script_reply(&self, reply: ScriptedReply) {
        self.state.lock().scripted.push_back(reply);
    }

    /// Force the next `method path` request (query excluded) to `outcome`.
    pub fn inject(&self, method: Method, path: &str, outcome: Injected) {
        self.state.lock().injections.push(Injection {
            method,
            path: path.to_owned(),
            outcome,
        });
    }

    pub fn fail_next(&self, method: Method, path: &str, status: u16) {
        self.inject(method, path, Injected::Status(status));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.method == method && call.path == path)
            .count()
    }

    pub fn threads(&self) -> Vec<Thread> {
        self.state
            .lock()
            .threads
            .iter()
            .map(|stored| stored.thread.clone())
            .collect()
    }

    pub fn messages(&self, thread_id: &str) -> Vec<Message> {
        self.state
            .lock()
            .threads
            .iter()
            .find(|stored| stored.thread.id == thread_id)
            .map(|stored| stored.messages.clone())
            .unwrap_or_default()
    }

    pub fn is_generating(&self, thread_id: &str) -> bool {
        self.state.lock().pending.contains_key(thread_id)
    }

    pub fn global_context(&self) -> String {
        self.state.lock().global_context.clone()
    }

    fn route(&self, request: &HttpRequest, path: &str) -> HttpResponse {
        let mut state = self.state.lock();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match (request.method, segments.as_slice()) {
            (Method::Get, ["threads"]) => {
                let threads: Vec<Thread> = state
                    .threads
                    .iter()
                    .map(|stored| stored.thread.clone())
                    .collect();
                ok(&threads)
            }
            (Method::Get, ["global-context"]) => ok(&GlobalContext {
                context: state.global_context.clone(),
            }),
            (Method::Post, ["global-context"]) => {
                state.global_context = body_field(request, "context").unwrap_or_default();
                HttpResponse::empty(204)
            }
            (Method::Post, ["chat"]) => {
                let Some(text) = body_field(request, "text").filter(|t| !t.is_empty()) else {
                    return detail(400, "Message 'text' is required.");
                };
                let thread_id = format!("t-{}", &Uuid::new_v4().simple().to_string()[..8]);
                let message = user_message(&mut state, &text);
                state.threads.insert(
                    0,
                    StoredThread {
                        thread: Thread {
                            id: thread_id.clone(),
                            title: text.chars().take(TITLE_CHARS).collect(),
                            last_message: preview(&message),
                            timestamp: message.timestamp.clone(),
                        },
                        messages: vec![message.clone()],
                    },
                );
                state.schedule_reply(&thread_id, &text);
                accepted(thread_id, "Chat created...", message)
            }
            (Method::Get, ["chat", thread_id]) => {
                let waiting_for_response = state.pending.contains_key(*thread_id);
                match state.thread_mut(thread_id) {
                    Some(stored) => ok(&ThreadMessages {
                        messages: stored.messages.clone(),
                        waiting_for_response,
                    }),
                    None => detail(404, &format!("Thread with ID '{thread_id}' not found.")),
                }
            }
            (Method::Post, ["chat", thread_id]) => {
                let Some(text) = body_field(request, "text").filter(|t| !t.is_empty()) else {
                    return detail(400, "Message 'text' is required.");
                };
                if state.thread_mut(thread_id).is_none() {
                    return detail(404, &format!("Thread with ID '{thread_id}' not found."));
                }
                let message = user_message(&mut state, &text);
                state.record_message(thread_id, message.clone());
                state.schedule_reply(thread_id, &text);
                accepted((*thread_id).to_owned(), "Message received...", message)
            }
            (Method::Delete, ["chat", thread_id]) => {
                let before = state.threads.len();
                state.threads.retain(|stored| stored.thread.id != *thread_id);
                if state.threads.len() == before {
                    return detail(404, "Thread not found or you do not have permission.");
                }
                state.pending.remove(*thread_id);
                ok(&Ack {
                    message: format!("Thread '{thread_id}' has been successfully deleted."),
                })
            }
            (Method::Get, ["chat", thread_id, "poll"]) => poll(&mut state, thread_id),
            (Method::Post, ["chat", thread_id, "cancel"]) => {
                let message = if state.pending.remove(*thread_id).is_some() {
                    format!("Cancellation request sent for thread {thread_id}.")
                } else {
                    format!("No active task found for thread {thread_id} to cancel.")
                };
                ok(&Ack { message })
            }
            (Method::Patch, ["chat", thread_id, "rename"]) => {
                let Some(title) = body_field(request, "title").filter(|t| !t.is_empty()) else {
                    return detail(400, "A non-empty 'title' is required.");
                };
                match state.thread_mut(thread_id) {
                    Some(stored) => {
                        stored.thread.title = title;
                        ok(&Ack {
                            message: "Thread renamed successfully.".to_string(),
                        })
                    }
                    None => detail(404, "Thread not found or you do not have permission."),
                }
            }
            _ => detail(404, "Not Found"),
        }
    }
}

#[async_trait]
impl HttpBackend for InMemoryBackend {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let (path, query) = match request.path.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (request.path.clone(), None),
        };
        let injected = {
            let mut state = self.state.lock();
            state.calls.push(RecordedCall {
                method: request.method,
                path: path.clone(),
                query,
                bearer: request.bearer.clone(),
            });
            state.take_injection(request.method, &path)
        };
        match injected {
            Some(Injected::Status(status)) => {
                return Ok(detail(status, &format!("injected failure for {path}")))
            }
            Some(Injected::Unreachable) => return Err(anyhow!("connection refused")),
            Some(Injected::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        if let Some(required) = self.state.lock().required_token.clone() {
            if request.bearer.as_deref() != Some(required.as_str()) {
                return Ok(detail(401, "Invalid or missing token."));
            }
        }
        Ok(self.route(&request, &path))
    }
}

fn poll(state: &mut BackendState, thread_id: &str) -> HttpResponse {
    let Some(reply) = state.pending.get_mut(thread_id) else {
        return ok(&PollUpdate {
            waiting_for_response: false,
            messages: Vec::new(),
        });
    };
    let batch = reply.batches.pop_front().unwrap_or_default();
    let finished = reply.batches.is_empty();
    if finished {
        state.pending.remove(thread_id);
    }
    if let Some(stored) = state.thread_mut(thread_id) {
        poller::reconcile(&mut stored.messages, batch.clone());
        if let Some(last) = stored.messages.last() {
            stored.thread.last_message = preview(last);
            stored.thread.timestamp = last.timestamp.clone();
        }
    }
    ok(&PollUpdate {
        waiting_for_response: !finished,
        messages: batch,
    })
}

fn user_message(state: &mut BackendState, text: &str) -> Message {
    let mut message = Message::text(state.next_message_id(), MessageRole::User, text);
    message.user_id = "user".to_string();
    message
}

fn preview(message: &Message) -> String {
    match message.content.as_text() {
        Some(text) => text.chars().take(PREVIEW_CHARS).collect(),
        None => message.content.kind().to_string(),
    }
}

fn body_field(request: &HttpRequest, key: &str) -> Option<String> {
    request
        .body
        .as_ref()?
        .get(key)?
        .as_str()
        .map(|value| value.trim().to_owned())
}

fn ok<T: serde::Serialize>(body: &T) -> HttpResponse {
    HttpResponse::json(200, &serde_json::to_value(body).unwrap_or(Value::Null))
}

fn accepted(thread_id: String, message: &str, user_message: Message) -> HttpResponse {
    let body = SentMessage {
        thread_id,
        message: message.to_string(),
        user_message,
    };
    HttpResponse::json(202, &serde_json::to_value(body).unwrap_or(Value::Null))
}

fn detail(status: u16, message: &str) -> HttpResponse {
    HttpResponse::json(status, &json!({ "detail": message }))
}
