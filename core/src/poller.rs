use crate::model::{Message, MessageContent, MessageRole, WireMessage};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Cadence of the response polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            interval: Duration::from_millis(1500),
        }
    }
}

/// The single live polling task of a store.
pub(crate) struct PollHandle {
    generation: u64,
    thread_id: String,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub(crate) fn new(generation: u64, thread_id: String, task: JoinHandle<()>) -> Self {
        Self {
            generation,
            thread_id,
            task,
        }
    }

    pub(crate) fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub(crate) fn cancel(self) {
        debug!(
            "thread_id" = %self.thread_id,
            "generation" = self.generation,
            "cancelling poll"
        );
        self.task.abort();
    }
}

/// Fold polled entries into `messages`.
///
/// Chunks extend the text of the message sharing their id. A full entry with a
/// known id replaces that message in place; anything else is appended.
/// Returns how many messages were added.
pub fn reconcile(messages: &mut Vec<Message>, incoming: Vec<WireMessage>) -> usize {
    let mut added = 0;
    for entry in incoming {
        let position = messages.iter().position(|message| message.id == entry.id);
        if entry.is_chunk {
            let fragment = entry.fragment();
            match position.map(|index| &mut messages[index].content) {
                Some(MessageContent::Text(text)) => text.push_str(&fragment),
                Some(other) => *other = MessageContent::Text(fragment),
                None => {
                    messages.push(Message::text(entry.id, MessageRole::Assistant, fragment));
                    added += 1;
                }
            }
            continue;
        }
        let message = Message::from(entry);
        match position {
            Some(index) => messages[index] = message,
            None => {
                messages.push(message);
                added += 1;
            }
        }
    }
    added
}
