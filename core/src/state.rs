use crate::api::ChatApi;
use crate::error::ApiError;
use crate::model::{CurrentChat, Delivery, Message, Thread};
use crate::poller::{self, PollHandle, PollTiming};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Where the session is in its request lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    /// A thread is being fetched.
    Loading,
    /// An optimistic message awaits write confirmation.
    Sending,
    /// The write was confirmed and the assistant reply is being polled.
    Polling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// User-facing message emitted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ThreadsChanged,
    ChatChanged,
    ResponseFinished { thread_id: String },
    Notice(Notice),
}

#[derive(Default)]
struct InnerState {
    threads: Vec<Thread>,
    chat: CurrentChat,
    phase: SyncPhase,
    global_context: String,
    load_generation: u64,
    poll_generation: u64,
    cancel_generation: u64,
    sends: u64,
    poll: Option<PollHandle>,
}

impl InnerState {
    fn stop_polling(&mut self) {
        if let Some(handle) = self.poll.take() {
            handle.cancel();
        }
        // Late responses from the aborted task no longer match.
        self.poll_generation += 1;
    }

    /// Drop the current session and start a fresh one.
    fn reset_chat(&mut self, thread_id: Option<String>) -> u64 {
        self.stop_polling();
        self.load_generation += 1;
        self.chat = CurrentChat {
            messages: Vec::new(),
            thread_id,
            waiting_for_response: false,
        };
        self.phase = SyncPhase::Idle;
        self.load_generation
    }

    fn finish_waiting(&mut self) {
        self.chat.waiting_for_response = false;
        self.phase = SyncPhase::Idle;
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            load: self.load_generation,
            cancel: self.cancel_generation,
        }
    }
}

/// Generations captured before an await. A result is applied only while both
/// still match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    load: u64,
    cancel: u64,
}

/// Chat synchronization state machine.
///
/// Holds the thread list, the open conversation and the single polling task.
/// The lock is never held across an `.await`; every async result is checked
/// against a generation counter before it is applied.
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<RwLock<InnerState>>,
    api: ChatApi,
    timing: PollTiming,
    events_tx: UnboundedSender<StoreEvent>,
}

impl ChatStore {
    pub fn new(api: ChatApi, timing: PollTiming) -> (Self, UnboundedReceiver<StoreEvent>) {
        let (events_tx, events_rx) = unbounded_channel();
        (
            Self {
                inner: Arc::new(RwLock::new(InnerState::default())),
                api,
                timing,
                events_tx,
            },
            events_rx,
        )
    }

    pub fn api(&self) -> &ChatApi {
        &self.api
    }

    pub fn threads(&self) -> Vec<Thread> {
        self.inner.read().threads.clone()
    }

    pub fn current_chat(&self) -> CurrentChat {
        self.inner.read().chat.clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.inner.read().phase
    }

    pub fn global_context(&self) -> String {
        self.inner.read().global_context.clone()
    }

    /// Thread id of the live polling task, if any.
    pub fn polling_thread(&self) -> Option<String> {
        self.inner
            .read()
            .poll
            .as_ref()
            .map(|handle| handle.thread_id().to_owned())
    }

    pub async fn load_all_threads(&self) {
        match self.api.list_threads().await {
            Ok(threads) => {
                debug!("count" = threads.len(), "thread list loaded");
                self.inner.write().threads = threads;
                self.emit(StoreEvent::ThreadsChanged);
            }
            Err(err) => self.report("Could not load conversations", &err),
        }
    }

    pub async fn load_chat(&self, thread_id: impl Into<String>) {
        let thread_id = thread_id.into();
        let snapshot = {
            let mut inner = self.inner.write();
            inner.reset_chat(Some(thread_id.clone()));
            inner.chat.waiting_for_response = true;
            inner.phase = SyncPhase::Loading;
            inner.snapshot()
        };
        self.emit(StoreEvent::ChatChanged);

        let result = self.api.get_thread(&thread_id).await;

        let outcome = {
            let mut inner = self.inner.write();
            if inner.load_generation != snapshot.load {
                debug!("thread_id" = %thread_id, "discarding superseded thread load");
                return;
            }
            match result {
                Ok(detail) => {
                    // A cancel issued during the load wins over the server flag.
                    let generating = detail.waiting_for_response
                        && inner.cancel_generation == snapshot.cancel;
                    inner.chat.messages = detail.messages;
                    inner.chat.waiting_for_response = generating;
                    inner.phase = SyncPhase::Idle;
                    Ok(generating)
                }
                Err(err) => {
                    inner.finish_waiting();
                    Err(err)
                }
            }
        };
        self.emit(StoreEvent::ChatChanged);

        match outcome {
            Ok(true) => {
                self.start_polling(thread_id, snapshot);
            }
            Ok(false) => {}
            Err(err) => self.report("Could not open conversation", &err),
        }
    }

    /// Send `content` in the open conversation. Returns the id of a newly
    /// created thread so the caller can navigate to it.
    pub async fn send_message(&self, content: &str) -> Option<String> {
        let text = content.trim();
        if text.is_empty() {
            return None;
        }

        let pending = Message::pending_user(text);
        let temp_id = pending.id.clone();
        let (thread_id, snapshot, send_number) = {
            let mut inner = self.inner.write();
            if matches!(inner.phase, SyncPhase::Sending | SyncPhase::Loading) {
                warn!(
                    "phase" = ?inner.phase,
                    "ignoring send while another request is unconfirmed"
                );
                return None;
            }
            inner.stop_polling();
            inner.chat.messages.push(pending);
            inner.chat.waiting_for_response = true;
            inner.phase = SyncPhase::Sending;
            inner.sends += 1;
            (inner.chat.thread_id.clone(), inner.snapshot(), inner.sends)
        };
        self.emit(StoreEvent::ChatChanged);

        let result = match &thread_id {
            None => self.api.start_chat(text).await,
            Some(id) => self.api.append_message(id, text).await,
        };

        let outcome = {
            let mut inner = self.inner.write();
            let current = inner.load_generation == snapshot.load;
            let cancelled = inner.cancel_generation != snapshot.cancel;
            let latest = inner.sends == send_number;
            match result {
                Ok(sent) => {
                    if current {
                        replace_message(&mut inner.chat.messages, &temp_id, sent.user_message);
                        if inner.chat.thread_id.is_none() {
                            inner.chat.thread_id = Some(sent.thread_id.clone());
                        }
                    }
                    Ok((current, cancelled, latest, sent.thread_id))
                }
                Err(err) => {
                    if current {
                        if let Some(message) =
                            inner.chat.messages.iter_mut().find(|m| m.id == temp_id)
                        {
                            message.delivery = Delivery::Failed;
                        }
                        if !cancelled {
                            inner.finish_waiting();
                        }
                    }
                    Err(err)
                }
            }
        };

        match outcome {
            Ok((current, cancelled, latest, server_thread_id)) => {
                if current {
                    self.emit(StoreEvent::ChatChanged);
                }
                if cancelled {
                    // The earlier cancel could not reach a reply that did not
                    // exist yet. A newer send owns the thread once it starts.
                    if latest {
                        self.notify_cancel(&server_thread_id).await;
                    }
                } else if current {
                    self.start_polling(server_thread_id.clone(), snapshot);
                } else {
                    debug!(
                        "thread_id" = %server_thread_id,
                        "send confirmed for a session that was replaced"
                    );
                }
                if thread_id.is_none() {
                    info!("thread_id" = %server_thread_id, "conversation created");
                    self.load_all_threads().await;
                    return Some(server_thread_id);
                }
                None
            }
            Err(err) => {
                self.emit(StoreEvent::ChatChanged);
                self.report("Message was not sent", &err);
                None
            }
        }
    }

    /// Resend a message whose delivery failed.
    pub async fn retry_message(&self, message_id: &str) -> Option<String> {
        let text = {
            let mut inner = self.inner.write();
            if matches!(inner.phase, SyncPhase::Sending | SyncPhase::Loading) {
                return None;
            }
            let messages = &mut inner.chat.messages;
            let index = messages
                .iter()
                .position(|m| m.id == message_id && m.delivery == Delivery::Failed)?;
            let text = messages[index].content.as_text()?.to_owned();
            messages.remove(index);
            text
        };
        self.send_message(&text).await
    }

    pub fn discard_failed(&self, message_id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            let before = inner.chat.messages.len();
            inner
                .chat
                .messages
                .retain(|m| !(m.id == message_id && m.delivery == Delivery::Failed));
            inner.chat.messages.len() != before
        };
        if removed {
            self.emit(StoreEvent::ChatChanged);
        }
        removed
    }

    /// Stop waiting locally, then ask the server to stop generating.
    pub async fn cancel_request(&self) {
        let thread_id = {
            let mut inner = self.inner.write();
            inner.stop_polling();
            inner.cancel_generation += 1;
            inner.chat.waiting_for_response = false;
            if matches!(inner.phase, SyncPhase::Polling | SyncPhase::Sending) {
                inner.phase = SyncPhase::Idle;
            }
            inner.chat.thread_id.clone()
        };
        self.emit(StoreEvent::ChatChanged);

        if let Some(thread_id) = thread_id {
            self.notify_cancel(&thread_id).await;
        }
    }

    async fn notify_cancel(&self, thread_id: &str) {
        match self.api.cancel(thread_id).await {
            Ok(ack) => debug!(
                "thread_id" = %thread_id,
                "reply" = %ack.message,
                "cancellation sent"
            ),
            Err(err) => warn!(
                "thread_id" = %thread_id,
                "error" = %err,
                "cancellation request failed"
            ),
        }
    }

    pub async fn delete_thread(&self, thread_id: &str) {
        let was_active = {
            let mut inner = self.inner.write();
            inner.threads.retain(|thread| thread.id != thread_id);
            let active = inner.chat.thread_id.as_deref() == Some(thread_id);
            if active {
                inner.reset_chat(None);
            }
            active
        };
        self.emit(StoreEvent::ThreadsChanged);
        if was_active {
            self.emit(StoreEvent::ChatChanged);
        }

        if let Err(err) = self.api.delete_thread(thread_id).await {
            self.report("Could not delete conversation", &err);
            self.load_all_threads().await;
        }
    }

    pub async fn rename_thread(&self, thread_id: &str, title: &str) {
        let title = title.trim();
        if title.is_empty() {
            debug!("thread_id" = %thread_id, "ignoring blank title");
            return;
        }
        let previous = {
            let mut inner = self.inner.write();
            inner
                .threads
                .iter_mut()
                .find(|thread| thread.id == thread_id)
                .map(|thread| std::mem::replace(&mut thread.title, title.to_owned()))
        };
        let Some(previous) = previous else {
            debug!("thread_id" = %thread_id, "rename of unknown thread");
            return;
        };
        self.emit(StoreEvent::ThreadsChanged);

        if let Err(err) = self.api.rename_thread(thread_id, title).await {
            {
                let mut inner = self.inner.write();
                if let Some(thread) = inner.threads.iter_mut().find(|t| t.id == thread_id) {
                    thread.title = previous;
                }
            }
            self.emit(StoreEvent::ThreadsChanged);
            self.report("Could not rename conversation", &err);
        }
    }

    pub fn clear_current_chat(&self) {
        self.inner.write().reset_chat(None);
        self.emit(StoreEvent::ChatChanged);
    }

    pub async fn load_global_context(&self) {
        match self.api.global_context().await {
            Ok(global) => self.inner.write().global_context = global.context,
            Err(err) => self.report("Could not load global context", &err),
        }
    }

    pub async fn save_global_context(&self, context: &str) -> bool {
        match self.api.save_global_context(context).await {
            Ok(()) => {
                self.inner.write().global_context = context.to_owned();
                self.emit(StoreEvent::Notice(Notice {
                    level: NoticeLevel::Info,
                    text: "Global context saved".to_string(),
                }));
                true
            }
            Err(err) => {
                self.report("Could not save global context", &err);
                false
            }
        }
    }

    /// Start the poll loop unless the session changed or a cancel arrived
    /// since `snapshot` was taken. Returns whether a loop was started.
    fn start_polling(&self, thread_id: String, snapshot: Snapshot) -> bool {
        let mut inner = self.inner.write();
        if inner.snapshot() != snapshot {
            debug!("thread_id" = %thread_id, "not polling a superseded session");
            return false;
        }
        inner.stop_polling();
        let generation = inner.poll_generation;
        inner.chat.waiting_for_response = true;
        inner.phase = SyncPhase::Polling;
        let task = tokio::spawn(self.clone().poll_loop(thread_id.clone(), generation));
        inner.poll = Some(PollHandle::new(generation, thread_id, task));
        true
    }

    async fn poll_loop(self, thread_id: String, generation: u64) {
        sleep(self.timing.initial_delay).await;
        loop {
            let since_id = {
                let inner = self.inner.read();
                if inner.poll_generation != generation {
                    return;
                }
                inner.chat.last_confirmed_id().map(str::to_owned)
            };

            let result = self.api.poll(&thread_id, since_id.as_deref()).await;

            let finished = {
                let mut inner = self.inner.write();
                if inner.poll_generation != generation {
                    debug!("thread_id" = %thread_id, "discarding late poll response");
                    return;
                }
                match result {
                    Ok(update) => {
                        poller::reconcile(&mut inner.chat.messages, update.messages);
                        if !update.waiting_for_response {
                            inner.poll = None;
                            inner.finish_waiting();
                        }
                        Ok(!update.waiting_for_response)
                    }
                    Err(err) => {
                        inner.poll = None;
                        inner.finish_waiting();
                        Err(err)
                    }
                }
            };
            self.emit(StoreEvent::ChatChanged);

            match finished {
                Ok(true) => {
                    self.load_all_threads().await;
                    self.emit(StoreEvent::ResponseFinished { thread_id });
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    self.report("Lost track of the response", &err);
                    return;
                }
            }

            sleep(self.timing.interval).await;
        }
    }

    fn report(&self, context: &str, err: &ApiError) {
        warn!("error" = %err, "{context}");
        self.emit(StoreEvent::Notice(Notice {
            level: NoticeLevel::Error,
            text: format!("{context}: {err}"),
        }));
    }

    fn emit(&self, event: StoreEvent) {
        self.events_tx.send(event).ok();
    }
}

fn replace_message(messages: &mut Vec<Message>, temp_id: &str, confirmed: Message) {
    match messages.iter().position(|message| message.id == temp_id) {
        Some(index) => messages[index] = confirmed,
        None => messages.push(confirmed),
    }
}
