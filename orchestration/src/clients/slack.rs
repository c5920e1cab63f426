//! Slack-like collaborator used for validation notifications.

use async_trait::async_trait;
use serde_json::json;

use super::{CollaboratorError, CollaboratorResult};

#[async_trait]
pub trait SlackClient: Send + Sync {
    /// Resolve a Slack user id from an email address.
    async fn lookup_user_by_email(&self, email: &str) -> CollaboratorResult<Option<String>>;

    /// Post a direct message to a user.
    async fn post_message(&self, user_id: &str, text: &str) -> CollaboratorResult<()>;
}

pub struct HttpSlackClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl HttpSlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: "https://slack.com/api".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SlackClient for HttpSlackClient {
    async fn lookup_user_by_email(&self, email: &str) -> CollaboratorResult<Option<String>> {
        let response = self
            .client
            .get(format!("{}/users.lookupByEmail", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("email", email)])
            .send()
            .await?;

        let body: serde_json::Value = response.json().await?;
        if body["ok"].as_bool() != Some(true) {
            // users_not_found is an expected miss, not a failure
            if body["error"].as_str() == Some("users_not_found") {
                return Ok(None);
            }
            return Err(CollaboratorError::invalid(
                body["error"].as_str().unwrap_or("slack error").to_string(),
            ));
        }
        Ok(body["user"]["id"].as_str().map(String::from))
    }

    async fn post_message(&self, user_id: &str, text: &str) -> CollaboratorResult<()> {
        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({"channel": user_id, "text": text}))
            .send()
            .await?;

        let body: serde_json::Value = response.json().await?;
        if body["ok"].as_bool() != Some(true) {
            return Err(CollaboratorError::invalid(
                body["error"].as_str().unwrap_or("slack error").to_string(),
            ));
        }
        Ok(())
    }
}
