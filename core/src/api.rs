use crate::error::ApiResult;
use crate::model::{Ack, GlobalContext, PollUpdate, SentMessage, Thread, ThreadMessages};
use crate::transport::Transport;
use serde::de::IgnoredAny;
use serde_json::json;

/// Typed operations of the chat service.
#[derive(Clone)]
pub struct ChatApi {
    transport: Transport,
}

impl ChatApi {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub async fn list_threads(&self) -> ApiResult<Vec<Thread>> {
        self.transport.get("/threads").await
    }

    pub async fn get_thread(&self, thread_id: &str) -> ApiResult<ThreadMessages> {
        self.transport.get(&chat_path(thread_id)).await
    }

    pub async fn start_chat(&self, text: &str) -> ApiResult<SentMessage> {
        self.transport.post("/chat", &json!({ "text": text })).await
    }

    pub async fn append_message(&self, thread_id: &str, text: &str) -> ApiResult<SentMessage> {
        self.transport
            .post(&chat_path(thread_id), &json!({ "text": text }))
            .await
    }

    pub async fn poll(&self, thread_id: &str, since_id: Option<&str>) -> ApiResult<PollUpdate> {
        self.transport.get(&poll_path(thread_id, since_id)).await
    }

    pub async fn cancel(&self, thread_id: &str) -> ApiResult<Ack> {
        let ack: Option<Ack> = self
            .transport
            .post(&format!("{}/cancel", chat_path(thread_id)), &json!({}))
            .await?;
        Ok(ack.unwrap_or_default())
    }

    pub async fn delete_thread(&self, thread_id: &str) -> ApiResult<Ack> {
        let ack: Option<Ack> = self.transport.delete(&chat_path(thread_id)).await?;
        Ok(ack.unwrap_or_default())
    }

    pub async fn rename_thread(&self, thread_id: &str, title: &str) -> ApiResult<Ack> {
        let ack: Option<Ack> = self
            .transport
            .patch(
                &format!("{}/rename", chat_path(thread_id)),
                &json!({ "title": title }),
            )
            .await?;
        Ok(ack.unwrap_or_default())
    }

    pub async fn global_context(&self) -> ApiResult<GlobalContext> {
        self.transport.get("/global-context").await
    }

    pub async fn save_global_context(&self, context: &str) -> ApiResult<()> {
        let _: IgnoredAny = self
            .transport
            .post("/global-context", &GlobalContext {
                context: context.to_owned(),
            })
            .await?;
        Ok(())
    }
}

/// Thread ids are opaque, so they are escaped as a single path segment.
fn chat_path(thread_id: &str) -> String {
    let segment: String = url::form_urlencoded::byte_serialize(thread_id.as_bytes()).collect();
    // `byte_serialize` writes spaces as `+` and a literal `+` as `%2B`.
    format!("/chat/{}", segment.replace('+', "%20"))
}

fn poll_path(thread_id: &str, since_id: Option<&str>) -> String {
    let base = format!("{}/poll", chat_path(thread_id));
    match since_id {
        Some(since_id) => {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("since_id", since_id)
                .finish();
            format!("{base}?{query}")
        }
        None => base,
    }
}
