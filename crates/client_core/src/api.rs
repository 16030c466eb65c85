use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ConversationDetail, ConversationId, ConversationSummary},
    protocol::ApiEnvelope,
};

use crate::session::SessionContext;

/// HTTP collaborator for the initial data fetches. Any non-success status
/// discriminator is reported exactly like a transport failure.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>>;
    async fn fetch_conversation(&self, conversation_id: &ConversationId)
        -> Result<ConversationDetail>;
    async fn mark_messages_as_read(&self, conversation_id: &ConversationId) -> Result<()>;
    async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<()>;
}

pub struct MissingChatApi;

#[async_trait]
impl ChatApi for MissingChatApi {
    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>> {
        Err(anyhow!("chat api is unavailable"))
    }

    async fn fetch_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationDetail> {
        Err(anyhow!(
            "chat api is unavailable for conversation {conversation_id}"
        ))
    }

    async fn mark_messages_as_read(&self, conversation_id: &ConversationId) -> Result<()> {
        Err(anyhow!(
            "chat api is unavailable for conversation {conversation_id}"
        ))
    }

    async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        Err(anyhow!(
            "chat api is unavailable for conversation {conversation_id}"
        ))
    }
}

pub struct HttpChatApi {
    http: Client,
    session: Arc<SessionContext>,
}

impl HttpChatApi {
    pub fn new(session: Arc<SessionContext>) -> Self {
        Self {
            http: Client::new(),
            session,
        }
    }

    fn token(&self) -> Result<&str> {
        if !self.session.is_authenticated() {
            return Err(anyhow!("not authenticated: missing access token"));
        }
        Ok(&self.session.access_token)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let token = self.token()?;
        let response = self
            .http
            .get(self.session.api_url("chats"))
            .bearer_auth(token)
            .send()
            .await
            .context("failed to fetch chats")?;
        let envelope: ApiEnvelope<Vec<ConversationSummary>> =
            decode(response, "fetch chats").await?;
        Ok(envelope.into_data()?)
    }

    async fn fetch_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationDetail> {
        let token = self.token()?;
        let response = self
            .http
            .get(self.session.api_url(&format!("chats/{conversation_id}")))
            .bearer_auth(token)
            .send()
            .await
            .context("failed to fetch chat")?;
        let envelope: ApiEnvelope<ConversationDetail> = decode(response, "fetch chat").await?;
        let detail = envelope.into_data()?;
        if &detail.conversation_id != conversation_id {
            return Err(anyhow!(
                "server returned conversation {} for request {conversation_id}",
                detail.conversation_id
            ));
        }
        Ok(detail)
    }

    async fn mark_messages_as_read(&self, conversation_id: &ConversationId) -> Result<()> {
        let token = self.token()?;
        let response = self
            .http
            .patch(self.session.api_url("chats/markMessagesAsRead/"))
            .query(&[("id", conversation_id.as_str())])
            .bearer_auth(token)
            .send()
            .await
            .context("failed to mark messages as read")?;
        let envelope: ApiEnvelope<serde_json::Value> =
            decode(response, "mark messages as read").await?;
        envelope.into_result()?;
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        let token = self.token()?;
        let response = self
            .http
            .delete(self.session.api_url(&format!("chats/{conversation_id}")))
            .bearer_auth(token)
            .send()
            .await
            .context("failed to delete chat")?;
        let envelope: ApiEnvelope<serde_json::Value> = decode(response, "delete chat").await?;
        envelope.into_result()?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<ApiEnvelope<T>> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .with_context(|| format!("failed to read {what} response"))?;
    match serde_json::from_slice::<ApiEnvelope<T>>(&body) {
        Ok(envelope) if status.is_success() => Ok(envelope),
        Ok(envelope) => Err(anyhow!(
            "{what} failed with HTTP {status}: {}",
            envelope.message
        )),
        Err(err) if status.is_success() => Err(anyhow!("invalid {what} response: {err}")),
        Err(_) => Err(anyhow!("{what} failed with HTTP {status}")),
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
