use crate::config::UiSettings;
use crate::ui::{self, RenderOptions};
use chatline_core::model::Delivery;
use chatline_core::state::{ChatStore, StoreEvent};

const HELP: &str = "\
Type a message to send it. Commands:
  /threads            list conversations
  /open <n|id>        open a conversation
  /new                start a new conversation
  /cancel             stop the pending response
  /rename <n|id>      rename (next line is the title, empty line cancels)
  /delete <n|id>      delete a conversation
  /menu <n|id>        show actions for a conversation
  /context            edit the global context (/save or /discard to finish)
  /retry              resend the last failed message
  /quit               exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Threads,
    Open(String),
    New,
    Cancel,
    Rename(String),
    Delete(String),
    Menu(String),
    Context,
    Retry,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Command::Send(trimmed.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim().to_string()),
        None => (rest, String::new()),
    };
    match (name, arg.is_empty()) {
        ("threads", _) => Command::Threads,
        ("new", _) => Command::New,
        ("cancel", _) => Command::Cancel,
        ("context", _) => Command::Context,
        ("retry", _) => Command::Retry,
        ("help", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        ("open", false) => Command::Open(arg),
        ("rename", false) => Command::Rename(arg),
        ("delete", false) => Command::Delete(arg),
        ("menu", false) => Command::Menu(arg),
        _ => Command::Unknown(trimmed.to_string()),
    }
}

/// Modal input state, the console's stand-in for dialogs and inline editors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Normal,
    Renaming { thread_id: String },
    ConfirmDelete { thread_id: String },
    EditingContext { draft: Vec<String> },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    pub quit: bool,
}

impl Reply {
    fn line(text: impl Into<String>) -> Self {
        Self {
            lines: vec![text.into()],
            quit: false,
        }
    }
}

/// Binds console input to store operations. Holds only presentational state.
pub struct ChatConsole {
    store: ChatStore,
    settings: UiSettings,
    mode: Mode,
    open_menu: Option<String>,
}

impl ChatConsole {
    pub fn new(store: ChatStore, settings: UiSettings) -> Self {
        Self {
            store,
            settings,
            mode: Mode::Normal,
            open_menu: None,
        }
    }

    pub fn settings(&self) -> &UiSettings {
        &self.settings
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn open_menu(&self) -> Option<&str> {
        self.open_menu.as_deref()
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            show_tool_calls: self.settings.show_tool_calls,
            show_timestamps: self.settings.show_timestamps,
        }
    }

    /// Load the sidebar and reopen the last conversation.
    pub async fn start(&mut self) -> Reply {
        self.store.load_all_threads().await;
        self.store.load_global_context().await;
        let mut reply = self.thread_list();
        if let Some(thread_id) = self.settings.last_thread.clone() {
            if self.store.threads().iter().any(|t| t.id == thread_id) {
                self.store.load_chat(thread_id).await;
            } else {
                self.settings.last_thread = None;
            }
        }
        reply.lines.push("Type /help for commands.".to_string());
        reply
    }

    pub async fn handle_line(&mut self, line: &str) -> Reply {
        match std::mem::take(&mut self.mode) {
            Mode::Normal => {}
            Mode::Renaming { thread_id } => return self.finish_rename(&thread_id, line).await,
            Mode::ConfirmDelete { thread_id } => {
                return self.finish_delete(&thread_id, line).await
            }
            Mode::EditingContext { draft } => return self.edit_context(draft, line).await,
        }

        let command = parse_command(line);
        // Any other interaction dismisses an open menu.
        if !matches!(command, Command::Menu(_)) {
            self.open_menu = None;
        }

        match command {
            Command::Empty => Reply::default(),
            Command::Send(text) => self.send(&text).await,
            Command::Threads => {
                self.store.load_all_threads().await;
                self.thread_list()
            }
            Command::Open(target) => match self.resolve_thread(&target) {
                Some(thread_id) => {
                    self.store.load_chat(thread_id.clone()).await;
                    self.settings.last_thread = Some(thread_id);
                    Reply::default()
                }
                None => Reply::line(format!("No conversation matches `{target}`.")),
            },
            Command::New => {
                self.store.clear_current_chat();
                self.settings.last_thread = None;
                Reply::line("New conversation.")
            }
            Command::Cancel => {
                if !self.store.current_chat().waiting_for_response {
                    return Reply::line("Nothing to cancel.");
                }
                self.store.cancel_request().await;
                Reply::line("Stopped waiting for the response.")
            }
            Command::Rename(target) => match self.resolve_thread(&target) {
                Some(thread_id) => {
                    let title = self
                        .store
                        .threads()
                        .into_iter()
                        .find(|t| t.id == thread_id)
                        .map(|t| t.title)
                        .unwrap_or_default();
                    self.mode = Mode::Renaming { thread_id };
                    Reply::line(format!("New title for \"{title}\" (empty line cancels):"))
                }
                None => Reply::line(format!("No conversation matches `{target}`.")),
            },
            Command::Delete(target) => match self.resolve_thread(&target) {
                Some(thread_id) if self.settings.confirm_deletes => {
                    let line = format!("Delete conversation {thread_id}? [y/N]");
                    self.mode = Mode::ConfirmDelete { thread_id };
                    Reply::line(line)
                }
                Some(thread_id) => self.delete(&thread_id).await,
                None => Reply::line(format!("No conversation matches `{target}`.")),
            },
            Command::Menu(target) => match self.resolve_thread(&target) {
                Some(thread_id) if self.open_menu.as_deref() == Some(thread_id.as_str()) => {
                    self.open_menu = None;
                    Reply::default()
                }
                Some(thread_id) => {
                    let lines = vec![
                        format!("Actions for {thread_id}:"),
                        format!("  /open {thread_id}"),
                        format!("  /rename {thread_id}"),
                        format!("  /delete {thread_id}"),
                    ];
                    self.open_menu = Some(thread_id);
                    Reply { lines, quit: false }
                }
                None => Reply::line(format!("No conversation matches `{target}`.")),
            },
            Command::Context => {
                let current = self.store.global_context();
                let mut lines = vec!["Global context (finish with /save or /discard):".to_string()];
                lines.extend(current.lines().map(|line| format!("  | {line}")));
                let draft = current.lines().map(str::to_owned).collect();
                self.mode = Mode::EditingContext { draft };
                Reply { lines, quit: false }
            }
            Command::Retry => {
                let failed = self
                    .store
                    .current_chat()
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.delivery == Delivery::Failed)
                    .map(|m| m.id.clone());
                match failed {
                    Some(message_id) => {
                        if let Some(thread_id) = self.store.retry_message(&message_id).await {
                            self.settings.last_thread = Some(thread_id);
                        }
                        Reply::default()
                    }
                    None => Reply::line("No failed message to retry."),
                }
            }
            Command::Help => Reply::line(HELP),
            Command::Quit => Reply {
                lines: Vec::new(),
                quit: true,
            },
            Command::Unknown(input) => {
                Reply::line(format!("Unknown command `{input}`; try /help."))
            }
        }
    }

    async fn send(&mut self, text: &str) -> Reply {
        match self.store.send_message(text).await {
            Some(thread_id) => {
                self.settings.last_thread = Some(thread_id.clone());
                Reply::line(format!("Started conversation {thread_id}."))
            }
            None => Reply::default(),
        }
    }

    async fn finish_rename(&mut self, thread_id: &str, line: &str) -> Reply {
        let title = line.trim();
        if title.is_empty() {
            return Reply::line("Rename cancelled.");
        }
        self.store.rename_thread(thread_id, title).await;
        self.thread_list()
    }

    async fn finish_delete(&mut self, thread_id: &str, line: &str) -> Reply {
        if matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
            self.delete(thread_id).await
        } else {
            Reply::line("Kept the conversation.")
        }
    }

    async fn delete(&mut self, thread_id: &str) -> Reply {
        self.store.delete_thread(thread_id).await;
        if self.settings.last_thread.as_deref() == Some(thread_id) {
            self.settings.last_thread = None;
        }
        self.thread_list()
    }

    async fn edit_context(&mut self, mut draft: Vec<String>, line: &str) -> Reply {
        match line.trim() {
            "/save" => {
                if self.store.save_global_context(&draft.join("\n")).await {
                    Reply::default()
                } else {
                    self.mode = Mode::EditingContext { draft };
                    Reply::line("Still editing; /save to try again or /discard.")
                }
            }
            "/discard" => Reply::line("Global context unchanged."),
            _ => {
                draft.push(line.to_string());
                self.mode = Mode::EditingContext { draft };
                Reply::default()
            }
        }
    }

    fn thread_list(&self) -> Reply {
        let threads = self.store.threads();
        if threads.is_empty() {
            return Reply::line("No conversations yet.");
        }
        let active = self.store.current_chat().thread_id;
        let lines = threads
            .iter()
            .enumerate()
            .map(|(index, thread)| {
                ui::format_thread_row(index, thread, active.as_deref() == Some(thread.id.as_str()))
            })
            .collect();
        Reply { lines, quit: false }
    }

    /// Accept a 1-based list position or a thread id.
    fn resolve_thread(&self, target: &str) -> Option<String> {
        let threads = self.store.threads();
        if let Ok(position) = target.parse::<usize>() {
            if position >= 1 && position <= threads.len() {
                return Some(threads[position - 1].id.clone());
            }
        }
        threads
            .into_iter()
            .find(|thread| thread.id == target)
            .map(|thread| thread.id)
    }
}

/// Turns store events into transcript lines, printing each message once and
/// again only when its rendering changes.
pub struct TranscriptView {
    options: RenderOptions,
    thread_id: Option<String>,
    shown: Vec<(String, String)>,
}

impl TranscriptView {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            options,
            thread_id: None,
            shown: Vec::new(),
        }
    }

    pub fn on_event(&mut self, event: &StoreEvent, store: &ChatStore) -> Vec<String> {
        match event {
            StoreEvent::ChatChanged => self.refresh(store),
            StoreEvent::Notice(notice) => vec![ui::format_notice(notice)],
            StoreEvent::ThreadsChanged | StoreEvent::ResponseFinished { .. } => Vec::new(),
        }
    }

    fn refresh(&mut self, store: &ChatStore) -> Vec<String> {
        let chat = store.current_chat();
        let mut lines = Vec::new();
        if chat.thread_id != self.thread_id || chat.messages.len() < self.shown.len() {
            self.shown.clear();
            self.thread_id = chat.thread_id.clone();
            lines.push(match &chat.thread_id {
                Some(id) => format!("── conversation {id} ──"),
                None => "── new conversation ──".to_string(),
            });
        }
        for (index, message) in chat.messages.iter().enumerate() {
            let Some(rendered) = ui::format_message(message, self.options) else {
                continue;
            };
            let key = message.id.clone();
            match self.shown.iter_mut().find(|(id, _)| *id == key) {
                Some((_, previous)) if *previous == rendered => {}
                Some((_, previous)) => {
                    *previous = rendered.clone();
                    lines.push(rendered);
                }
                None => {
                    // A confirmed message takes over the slot of its optimistic copy.
                    if let Some(slot) = self.shown.get_mut(index) {
                        if chat.find(&slot.0).is_none() {
                            let unchanged = slot.1 == rendered;
                            *slot = (key, rendered.clone());
                            if !unchanged {
                                lines.push(rendered);
                            }
                            continue;
                        }
                    }
                    self.shown.push((key, rendered.clone()));
                    lines.push(rendered);
                }
            }
        }
        if !lines.is_empty() && chat.waiting_for_response && store.polling_thread().is_some() {
            lines.push("…".to_string());
        }
        lines
    }
}
