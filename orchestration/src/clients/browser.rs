//! Browser-automation QA collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::CollaboratorResult;

/// Outcome of one browser QA sweep against a running application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserQaReport {
    pub executed: bool,
    pub success: bool,
    pub tests_executed: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub console_errors: Vec<String>,
    pub screenshots: Vec<String>,
    pub performance_metrics: serde_json::Value,
}

#[async_trait]
pub trait BrowserQaClient: Send + Sync {
    async fn run(&self, base_url: &str) -> CollaboratorResult<BrowserQaReport>;
}

/// Default client when no browser runner is configured; reports "not run".
#[derive(Debug, Default)]
pub struct NoopBrowserQa;

#[async_trait]
impl BrowserQaClient for NoopBrowserQa {
    async fn run(&self, _base_url: &str) -> CollaboratorResult<BrowserQaReport> {
        Ok(BrowserQaReport::default())
    }
}
