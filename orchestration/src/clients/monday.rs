//! Monday-like collaborator: item updates, replies, status columns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{CollaboratorError, CollaboratorResult};

/// A reply under an update thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MondayReply {
    pub reply_id: String,
    pub body: String,
    pub creator_id: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Item details used to resolve creators and repository columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MondayItemInfo {
    pub item_id: i64,
    pub name: String,
    pub board_id: Option<i64>,
    pub status: Option<String>,
    pub creator_email: Option<String>,
    pub creator_name: Option<String>,
}

/// Operations the engine needs from the external project-management surface.
#[async_trait]
pub trait MondayClient: Send + Sync {
    /// Post a comment on an item; returns the created update id.
    async fn post_update(&self, item_id: i64, body: &str) -> CollaboratorResult<String>;

    /// Replies posted under an update since its creation.
    async fn poll_replies(&self, update_id: &str) -> CollaboratorResult<Vec<MondayReply>>;

    async fn update_column_value(
        &self,
        item_id: i64,
        column_id: &str,
        value: &str,
    ) -> CollaboratorResult<()>;

    async fn get_item_info(&self, item_id: i64) -> CollaboratorResult<MondayItemInfo>;
}

/// GraphQL client against the Monday v2 API.
pub struct HttpMondayClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl HttpMondayClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: "https://api.monday.com/v2".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn graphql(&self, query: &str) -> CollaboratorResult<serde_json::Value> {
        let response = self
            .client
            .post(&self.base_url)
            .header("authorization", &self.token)
            .json(&json!({"query": query}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::api(status.as_u16(), text));
        }
        let body: serde_json::Value = response.json().await?;
        if let Some(errors) = body.get("errors") {
            if errors.as_array().is_some_and(|e| !e.is_empty()) {
                return Err(CollaboratorError::invalid(errors.to_string()));
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl MondayClient for HttpMondayClient {
    async fn post_update(&self, item_id: i64, body: &str) -> CollaboratorResult<String> {
        let escaped = body.replace('\\', "\\\\").replace('"', "\\\"");
        let query = format!(
            "mutation {{ create_update (item_id: {}, body: \"{}\") {{ id }} }}",
            item_id, escaped
        );
        let response = self.graphql(&query).await?;
        response["data"]["create_update"]["id"]
            .as_str()
            .map(String::from)
            .or_else(|| {
                response["data"]["create_update"]["id"]
                    .as_i64()
                    .map(|id| id.to_string())
            })
            .ok_or_else(|| CollaboratorError::invalid("create_update returned no id"))
    }

    async fn poll_replies(&self, update_id: &str) -> CollaboratorResult<Vec<MondayReply>> {
        let query = format!(
            "query {{ updates (ids: [{}]) {{ replies {{ id body creator_id created_at }} }} }}",
            update_id
        );
        let response = self.graphql(&query).await?;
        let replies = response["data"]["updates"][0]["replies"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        Ok(replies
            .iter()
            .map(|r| MondayReply {
                reply_id: r["id"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| r["id"].as_i64().unwrap_or(0).to_string()),
                body: r["body"].as_str().unwrap_or_default().to_string(),
                creator_id: r["creator_id"]
                    .as_i64()
                    .or_else(|| r["creator_id"].as_str().and_then(|s| s.parse().ok())),
                created_at: r["created_at"]
                    .as_str()
                    .and_then(|s| s.parse::<DateTime<Utc>>().ok()),
            })
            .collect())
    }

    async fn update_column_value(
        &self,
        item_id: i64,
        column_id: &str,
        value: &str,
    ) -> CollaboratorResult<()> {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        let query = format!(
            "mutation {{ change_simple_column_value (item_id: {}, column_id: \"{}\", value: \"{}\") {{ id }} }}",
            item_id, column_id, escaped
        );
        self.graphql(&query).await?;
        Ok(())
    }

    async fn get_item_info(&self, item_id: i64) -> CollaboratorResult<MondayItemInfo> {
        let query = format!(
            "query {{ items (ids: [{}]) {{ id name board {{ id }} creator {{ email name }} column_values (ids: [\"status\"]) {{ text }} }} }}",
            item_id
        );
        let response = self.graphql(&query).await?;
        let item = &response["data"]["items"][0];
        if item.is_null() {
            return Err(CollaboratorError::invalid(format!(
                "item {} not found",
                item_id
            )));
        }
        Ok(MondayItemInfo {
            item_id,
            name: item["name"].as_str().unwrap_or_default().to_string(),
            board_id: item["board"]["id"]
                .as_i64()
                .or_else(|| item["board"]["id"].as_str().and_then(|s| s.parse().ok())),
            status: item["column_values"][0]["text"].as_str().map(String::from),
            creator_email: item["creator"]["email"].as_str().map(String::from),
            creator_name: item["creator"]["name"].as_str().map(String::from),
        })
    }
}
