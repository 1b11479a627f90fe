use std::time::Duration;

use async_trait::async_trait;
use parley_proto::{ChatMessage, SendMessageRequest, UserId, USER_ID_HEADER};
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::debug;

use crate::error::ChatPostError;
use crate::sink::ChatSink;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the relay's chat routes, acting as one user.
#[derive(Clone)]
pub struct HttpChatClient {
    http: Client,
    base_url: String,
    user: UserId,
}

impl HttpChatClient {
    /// `base_url` is the relay's HTTP origin, e.g. `http://localhost:8080`.
    pub fn new(base_url: impl Into<String>, user: UserId) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user,
        }
    }

    pub async fn send(
        &self,
        to: &UserId,
        request: &SendMessageRequest,
    ) -> Result<ChatMessage, ChatPostError> {
        let response = self
            .http
            .post(format!(
                "{}/api/messages/send/{}",
                self.base_url,
                urlencoding::encode(to.as_str())
            ))
            .header(USER_ID_HEADER, self.user.as_str())
            .json(request)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn conversation(&self, peer: &UserId) -> Result<Vec<ChatMessage>, ChatPostError> {
        let response = self
            .http
            .get(format!(
                "{}/api/messages/{}",
                self.base_url,
                urlencoding::encode(peer.as_str())
            ))
            .header(USER_ID_HEADER, self.user.as_str())
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

async fn check(response: Response) -> Result<Response, ChatPostError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body.get("message")?.as_str().map(str::to_owned))
        .unwrap_or_else(|| status.to_string());
    Err(ChatPostError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ChatSink for HttpChatClient {
    async fn post_text(&self, to: &UserId, text: &str) -> Result<(), ChatPostError> {
        let message = self.send(to, &SendMessageRequest::text(text)).await?;
        debug!(id = %message.id, to = %to, "chat entry posted");
        Ok(())
    }
}
