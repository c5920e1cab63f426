//! GitHub-like collaborator: pull request lifecycle.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use super::{CollaboratorError, CollaboratorResult};
use crate::model::PullRequestInfo;

/// Pull request operations the engine depends on.
#[async_trait]
pub trait GitHubClient: Send + Sync {
    /// Create a PR, or return the existing one when a PR for the same head
    /// already exists (idempotent).
    async fn create_pr(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> CollaboratorResult<PullRequestInfo>;

    /// Merge a PR and return the merge commit SHA.
    async fn merge_pr(
        &self,
        repo: &str,
        number: i64,
        method: &str,
        message: &str,
    ) -> CollaboratorResult<String>;

    async fn delete_branch(&self, repo: &str, branch: &str) -> CollaboratorResult<()>;
}

/// REST client against the GitHub v3 API.
pub struct HttpGitHubClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl HttpGitHubClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: "https://api.github.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn pr_from_json(&self, value: &serde_json::Value) -> CollaboratorResult<PullRequestInfo> {
        Ok(PullRequestInfo {
            number: value["number"]
                .as_i64()
                .ok_or_else(|| CollaboratorError::invalid("missing pr number"))?,
            title: value["title"].as_str().unwrap_or_default().to_string(),
            url: value["html_url"].as_str().unwrap_or_default().to_string(),
            branch: value["head"]["ref"].as_str().unwrap_or_default().to_string(),
            base_branch: value["base"]["ref"].as_str().unwrap_or_default().to_string(),
            status: value["state"].as_str().unwrap_or("open").to_string(),
            head_sha: value["head"]["sha"].as_str().map(String::from),
            created_at: Utc::now(),
        })
    }

    async fn find_existing_pr(
        &self,
        repo: &str,
        head: &str,
    ) -> CollaboratorResult<Option<PullRequestInfo>> {
        let owner = repo.split('/').next().unwrap_or_default();
        let response = self
            .client
            .get(format!("{}/repos/{}/pulls", self.base_url, repo))
            .query(&[("head", format!("{}:{}", owner, head)), ("state", "open".to_string())])
            .bearer_auth(&self.token)
            .header("user-agent", "orchestration")
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(None);
        }
        let body: serde_json::Value = response.json().await?;
        match body.as_array().and_then(|prs| prs.first()) {
            Some(pr) => Ok(Some(self.pr_from_json(pr)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl GitHubClient for HttpGitHubClient {
    async fn create_pr(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> CollaboratorResult<PullRequestInfo> {
        let response = self
            .client
            .post(format!("{}/repos/{}/pulls", self.base_url, repo))
            .bearer_auth(&self.token)
            .header("user-agent", "orchestration")
            .json(&json!({"title": title, "body": body, "head": head, "base": base}))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 422 {
            let text = response.text().await.unwrap_or_default();
            if text.contains("already exists") {
                warn!(repo, head, "PR already exists, reusing it");
                if let Some(existing) = self.find_existing_pr(repo, head).await? {
                    return Ok(existing);
                }
            }
            return Err(CollaboratorError::api(422, text));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::api(status.as_u16(), text));
        }

        let value: serde_json::Value = response.json().await?;
        let pr = self.pr_from_json(&value)?;
        info!(repo, number = pr.number, "Pull request created");
        Ok(pr)
    }

    async fn merge_pr(
        &self,
        repo: &str,
        number: i64,
        method: &str,
        message: &str,
    ) -> CollaboratorResult<String> {
        let response = self
            .client
            .put(format!(
                "{}/repos/{}/pulls/{}/merge",
                self.base_url, repo, number
            ))
            .bearer_auth(&self.token)
            .header("user-agent", "orchestration")
            .json(&json!({"merge_method": method, "commit_message": message}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::api(status.as_u16(), text));
        }
        let body: serde_json::Value = response.json().await?;
        body["sha"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| CollaboratorError::invalid("merge response missing sha"))
    }

    async fn delete_branch(&self, repo: &str, branch: &str) -> CollaboratorResult<()> {
        let response = self
            .client
            .delete(format!(
                "{}/repos/{}/git/refs/heads/{}",
                self.base_url, repo, branch
            ))
            .bearer_auth(&self.token)
            .header("user-agent", "orchestration")
            .send()
            .await?;

        let status = response.status();
        // 422 means the ref is already gone; treat as done
        if !status.is_success() && status.as_u16() != 422 {
            let text = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::api(status.as_u16(), text));
        }
        Ok(())
    }
}
