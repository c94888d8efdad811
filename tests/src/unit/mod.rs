mod store_tests;

use chatline_core::auth::{Session, SessionEvent};
use chatline_core::model::{Message, MessageRole, WireMessage};
use chatline_core::state::{ChatStore, StoreEvent};
use chatline_core::transport::Transport;
use chatline_core::{ChatApi, InMemoryBackend, PollTiming};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;

pub(crate) struct Harness {
    pub runtime: Runtime,
    pub backend: Arc<InMemoryBackend>,
    pub store: ChatStore,
    pub events: UnboundedReceiver<StoreEvent>,
    pub session: Session,
    pub session_events: UnboundedReceiver<SessionEvent>,
}

impl Harness {
    pub fn run<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Drive the runtime until the next `ResponseFinished` event.
    pub fn wait_for_response(&mut self) -> String {
        let events = &mut self.events;
        self.runtime.block_on(async {
            tokio::time::timeout(Duration::from_secs(600), async {
                loop {
                    match events.recv().await {
                        Some(StoreEvent::ResponseFinished { thread_id }) => return thread_id,
                        Some(_) => continue,
                        None => panic!("store dropped"),
                    }
                }
            })
            .await
            .expect("response finished")
        })
    }

    /// Let paused time run forward so background polls make progress.
    pub fn advance(&self, by: Duration) {
        self.runtime.block_on(async move { tokio::time::sleep(by).await });
    }

    pub fn drain_events(&mut self) -> Vec<StoreEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub(crate) fn test_runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("runtime")
}

pub(crate) fn harness() -> Harness {
    harness_with_token(None)
}

pub(crate) fn harness_with_token(token: Option<&str>) -> Harness {
    let runtime = test_runtime();
    let backend = Arc::new(InMemoryBackend::new());
    let (session, session_events) = Session::new(token.map(str::to_owned));
    let api = ChatApi::new(Transport::new(backend.clone(), session.clone()));
    let (store, events) = ChatStore::new(api, PollTiming::default());
    Harness {
        runtime,
        backend,
        store,
        events,
        session,
        session_events,
    }
}

pub(crate) fn user(id: &str, text: &str) -> Message {
    Message::text(id, MessageRole::User, text)
}

pub(crate) fn reply(id: &str, text: &str) -> WireMessage {
    Message::text(id, MessageRole::Assistant, text).into()
}
