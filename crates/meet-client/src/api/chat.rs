//! Chat persistence collaborator.

use super::request::{RequestOptions, RestClient};
use crate::errors::RequestError;
use crate::signaling::ChatMessage;

use async_trait::async_trait;
use common::secret::{bearer_header_value, SecretString};

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn store(&self, message: &ChatMessage) -> Result<(), RequestError>;
}

/// `ChatStore` over `POST /meetings/messages/{meetingId}`.
#[derive(Debug, Clone)]
pub struct HttpChatStore {
    client: RestClient,
    token: Option<SecretString>,
}

impl HttpChatStore {
    #[must_use]
    pub fn new(client: RestClient) -> Self {
        Self {
            client,
            token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }
}

#[async_trait]
impl ChatStore for HttpChatStore {
    async fn store(&self, message: &ChatMessage) -> Result<(), RequestError> {
        let body = serde_json::to_value(message).map_err(|e| RequestError::Decode(e.to_string()))?;
        let mut options =
            RequestOptions::post(format!("/meetings/messages/{}", message.meeting_id)).with_data(body);
        if let Some(token) = &self.token {
            options = options.with_header("Authorization", bearer_header_value(token));
        }

        let _: serde_json::Value = self.client.request(options).await?;
        Ok(())
    }
}
