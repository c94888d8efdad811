use anyhow::{bail, Result};
use chatline_core::state::{ChatStore, StoreEvent};
use chatline_core::transport::Transport;
use chatline_core::{telemetry, ChatApi, InMemoryBackend, PollTiming, Session};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for Chatline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a message through the store against the in-memory backend and
    /// wait for the polled reply.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing("info")?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let backend = Arc::new(InMemoryBackend::new());
    let api = ChatApi::new(Transport::new(backend.clone(), Session::anonymous()));
    let timing = PollTiming {
        initial_delay: Duration::from_millis(20),
        interval: Duration::from_millis(50),
    };
    let (store, mut events) = ChatStore::new(api, timing);

    runtime.block_on(async {
        let Some(thread_id) = store.send_message("ping from xtask").await else {
            bail!("smoke message was not accepted");
        };
        let finished = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if let StoreEvent::ResponseFinished { thread_id: done } = event {
                    return Some(done);
                }
            }
            None
        })
        .await?;
        if finished.as_deref() != Some(thread_id.as_str()) {
            bail!("reply for {thread_id} never finished");
        }

        let chat = store.current_chat();
        info!(
            "thread_id" = %thread_id,
            "messages" = chat.messages.len(),
            "threads" = store.threads().len(),
            "smoke test conversation completed"
        );
        if chat.messages.len() != 2 || backend.messages(&thread_id).len() != 2 {
            bail!("expected user message and reply, got {}", chat.messages.len());
        }
        Ok(())
    })
}
