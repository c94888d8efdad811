use crate::auth::{Session, SignOutReason};
use crate::error::{ApiError, ApiResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(verb)
    }
}

/// A request relative to the API base URL. `path` may carry a query string.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: serde_json::to_vec(body).unwrap_or_default(),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }
}

/// Raw HTTP surface. An `Err` means no response was obtained at all.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

pub struct ReqwestBackend {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .with_context(|| format!("{} {url} did not reach the server", request.method))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read response body from {url}"))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Authenticated request wrapper. Normalizes failures into [`ApiError`] and
/// tears the session down on network or authentication errors.
#[derive(Clone)]
pub struct Transport {
    backend: Arc<dyn HttpBackend>,
    session: Session,
}

impl Transport {
    pub fn new(backend: Arc<dyn HttpBackend>, session: Session) -> Self {
        Self { backend, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.request(Method::Get, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let body = serde_json::to_value(body)?;
        self.request(Method::Post, path, Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let body = serde_json::to_value(body)?;
        self.request(Method::Patch, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.request(Method::Delete, path, None).await
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> ApiResult<T> {
        let request = HttpRequest {
            method,
            path: path.to_owned(),
            bearer: self.session.access_token(),
            body,
        };
        debug!("method" = %method, "path" = path, "sending request");
        let response = match self.backend.send(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!("method" = %method, "path" = path, "error" = %err, "server unreachable");
                self.session.sign_out(SignOutReason::Unreachable);
                return Err(ApiError::Network(format!("{err:#}")));
            }
        };
        decode_response(&self.session, response)
    }
}

fn decode_response<T: DeserializeOwned>(session: &Session, response: HttpResponse) -> ApiResult<T> {
    match response.status {
        401 | 403 => {
            session.sign_out(SignOutReason::Rejected {
                status: response.status,
            });
            Err(ApiError::Authentication {
                status: response.status,
            })
        }
        204 => Ok(serde_json::from_value(Value::Null)?),
        status if (200..300).contains(&status) => {
            if response.body.iter().all(u8::is_ascii_whitespace) {
                return Ok(serde_json::from_value(Value::Null)?);
            }
            Ok(serde_json::from_slice(&response.body)?)
        }
        status => Err(ApiError::RequestFailed {
            status,
            message: error_message(&response.body).unwrap_or_else(|| format!("HTTP {status}")),
        }),
    }
}

/// Pull a human readable message out of an error body. FastAPI servers report
/// errors under `detail`.
fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    ["message", "detail"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
}
