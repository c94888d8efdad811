use anyhow::{anyhow, Result};
use chatline::{
    default_settings_dir, load_ui_settings, save_ui_settings, ChatConsole, TranscriptView,
};
use chatline_core::auth::{Session, SessionEvent, SignOutReason};
use chatline_core::config::{ClientSettings, Overrides};
use chatline_core::state::{ChatStore, StoreEvent};
use chatline_core::transport::{HttpBackend, ReqwestBackend, Transport};
use chatline_core::{telemetry, ChatApi, InMemoryBackend, PollTiming};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser, Debug)]
#[command(name = "chatline", version, about = "Terminal client for the chat service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    /// Base URL of the chat API, e.g. http://localhost:8000/api
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Bearer token sent with every request
    #[arg(long, global = true)]
    token: Option<String>,
    /// Talk to an in-process stand-in instead of a server
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive session (default)
    Repl,
    /// List conversations
    Threads,
    /// Print a conversation
    Show { thread: String },
    /// Send a message and wait for the reply
    Send {
        #[arg(long)]
        thread: Option<String>,
        #[arg(required = true)]
        text: Vec<String>,
    },
    Rename { thread: String, title: String },
    Delete { thread: String },
    /// Read or replace the global context note
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },
}

#[derive(Subcommand, Debug)]
enum ContextAction {
    Get,
    Set { text: String },
}

struct Connection {
    store: ChatStore,
    events: UnboundedReceiver<StoreEvent>,
    session_events: UnboundedReceiver<SessionEvent>,
}

fn main() -> Result<()> {
    telemetry::init_tracing("warn")?;
    let cli = Cli::parse();
    let runtime = Runtime::new()?;
    let connection = connect(&cli)?;

    match cli.command.unwrap_or(Command::Repl) {
        Command::Repl => run_repl(&runtime, connection),
        Command::Threads => {
            let store = connection.store;
            runtime.block_on(store.load_all_threads());
            for (index, thread) in store.threads().iter().enumerate() {
                println!("{}", chatline::ui::format_thread_row(index, thread, false));
            }
            Ok(())
        }
        Command::Show { thread } => {
            let store = connection.store;
            runtime.block_on(store.load_chat(thread));
            print_chat(&store);
            Ok(())
        }
        Command::Send { thread, text } => {
            runtime.block_on(send_and_wait(connection, thread, text.join(" ")))
        }
        Command::Rename { thread, title } => {
            let store = connection.store;
            runtime.block_on(async {
                store.load_all_threads().await;
                store.rename_thread(&thread, &title).await;
            });
            print_notices(connection.events);
            Ok(())
        }
        Command::Delete { thread } => {
            let store = connection.store;
            runtime.block_on(async {
                store.load_all_threads().await;
                store.delete_thread(&thread).await;
            });
            print_notices(connection.events);
            Ok(())
        }
        Command::Context { action } => {
            let store = connection.store;
            match action {
                ContextAction::Get => {
                    runtime.block_on(store.load_global_context());
                    println!("{}", store.global_context());
                }
                ContextAction::Set { text } => {
                    if !runtime.block_on(store.save_global_context(&text)) {
                        print_notices(connection.events);
                        return Err(anyhow!("global context was not saved"));
                    }
                }
            }
            Ok(())
        }
    }
}

fn connect(cli: &Cli) -> Result<Connection> {
    let (backend, token, timing) = if cli.offline {
        let backend: Arc<dyn HttpBackend> = Arc::new(InMemoryBackend::new());
        (backend, None, PollTiming::default())
    } else {
        let settings = ClientSettings::load(Overrides {
            api_url: cli.api_url.clone(),
            access_token: cli.token.clone(),
        })
        .map_err(|err| anyhow!(err.user_message()))?;
        let backend: Arc<dyn HttpBackend> = Arc::new(ReqwestBackend::new(settings.api_url));
        (backend, settings.access_token, settings.poll)
    };
    let (session, session_events) = Session::new(token);
    let api = ChatApi::new(Transport::new(backend, session));
    let (store, events) = ChatStore::new(api, timing);
    Ok(Connection {
        store,
        events,
        session_events,
    })
}

async fn send_and_wait(
    mut connection: Connection,
    thread: Option<String>,
    text: String,
) -> Result<()> {
    let store = connection.store.clone();
    if let Some(thread_id) = thread {
        store.load_chat(thread_id).await;
    }
    if let Some(created) = store.send_message(&text).await {
        println!("Started conversation {created}.");
    }
    while store.current_chat().waiting_for_response {
        match connection.events.recv().await {
            Some(StoreEvent::ResponseFinished { .. }) | None => break,
            Some(StoreEvent::Notice(notice)) => {
                eprintln!("{}", chatline::ui::format_notice(&notice))
            }
            Some(_) => {}
        }
    }
    print_chat(&store);
    if let Ok(SessionEvent::SignedOut { reason }) = connection.session_events.try_recv() {
        return Err(anyhow!(signed_out_message(&reason)));
    }
    Ok(())
}

fn run_repl(runtime: &Runtime, connection: Connection) -> Result<()> {
    let Connection {
        store,
        mut events,
        mut session_events,
    } = connection;
    let settings_dir = default_settings_dir();
    let settings = runtime.block_on(load_ui_settings(&settings_dir))?;
    let mut console = ChatConsole::new(store.clone(), settings);

    let mut view = TranscriptView::new(console.render_options());
    let view_store = store.clone();
    runtime.spawn(async move {
        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    for line in view.on_event(&event, &view_store) {
                        println!("{line}");
                    }
                }
                Some(SessionEvent::SignedOut { reason }) = session_events.recv() => {
                    eprintln!("{}", signed_out_message(&reason));
                }
                else => break,
            }
        }
    });

    print_lines(&runtime.block_on(console.start()).lines);
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let reply = runtime.block_on(console.handle_line(&line));
        print_lines(&reply.lines);
        if reply.quit {
            break;
        }
    }

    runtime.block_on(save_ui_settings(&settings_dir, console.settings()))?;
    Ok(())
}

fn print_chat(store: &ChatStore) {
    let options = chatline::RenderOptions {
        show_tool_calls: true,
        show_timestamps: true,
    };
    for message in &store.current_chat().messages {
        if let Some(line) = chatline::ui::format_message(message, options) {
            println!("{line}");
        }
    }
}

fn print_notices(mut events: UnboundedReceiver<StoreEvent>) {
    while let Ok(event) = events.try_recv() {
        if let StoreEvent::Notice(notice) = event {
            eprintln!("{}", chatline::ui::format_notice(&notice));
        }
    }
}

fn print_lines(lines: &[String]) {
    let mut stdout = io::stdout().lock();
    for line in lines {
        writeln!(stdout, "{line}").ok();
    }
}

fn signed_out_message(reason: &SignOutReason) -> String {
    match reason {
        SignOutReason::Unreachable => {
            "Could not reach the chat service; the session was closed. Sign in again and restart."
                .to_string()
        }
        SignOutReason::Rejected { status } => format!(
            "The chat service rejected the credential (HTTP {status}). Sign in again and restart."
        ),
    }
}
