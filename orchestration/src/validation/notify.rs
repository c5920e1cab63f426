//! Two-tier notification waiter for human validations.
//!
//! The wait is structured concurrency: the parent owns a reminder child and
//! a poll loop. Cancelling the parent aborts the reminder first, then the
//! poll. The reminder fires at most once; question-type waits schedule no
//! reminder at all. Timeouts return `None` — the auto-approve policy on
//! timeout belongs to the validation node, not to this coordinator.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::replies::{decision_to_response, interpret_reply};
use super::store::ValidationStore;
use super::types::ValidationResponse;
use crate::clients::monday::MondayClient;
use crate::clients::slack::SlackClient;
use crate::mention::MentionParser;

/// Everything one wait needs to know.
#[derive(Debug, Clone)]
pub struct ValidationWaitParams {
    pub validation_id: String,
    /// Monday update under which the human replies.
    pub update_id: String,
    pub user_slack_id: Option<String>,
    pub user_email: Option<String>,
    pub task_title: String,
    pub task_id: String,
    pub external_item_id: i64,
    pub pr_url: Option<String>,
    /// Delay before the single Slack reminder; `None` disables it.
    pub reminder_delay: Option<Duration>,
    pub final_timeout: Duration,
    /// Commands get the waiting notification + reminder; questions only the
    /// final timeout.
    pub is_command: bool,
    /// Rejection count carried over from earlier rounds on this validation.
    pub prior_rejection_count: u32,
}

/// Coordinates Slack escalation with Monday reply polling.
pub struct NotificationCoordinator {
    slack: Arc<dyn SlackClient>,
    monday: Arc<dyn MondayClient>,
    validations: Arc<ValidationStore>,
    parser: MentionParser,
    poll_interval: Duration,
}

impl NotificationCoordinator {
    pub fn new(
        slack: Arc<dyn SlackClient>,
        monday: Arc<dyn MondayClient>,
        validations: Arc<ValidationStore>,
    ) -> Self {
        Self {
            slack,
            monday,
            validations,
            parser: MentionParser::new(),
            poll_interval: Duration::from_secs(
                crate::config::config().validation_poll_interval_secs.max(1),
            ),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wait for a human decision, escalating over Slack. Returns the
    /// response, or `None` when `final_timeout` elapsed without one.
    pub async fn wait_for_validation(
        &self,
        params: &ValidationWaitParams,
    ) -> Option<ValidationResponse> {
        if params.is_command {
            if let Some(user) = &params.user_slack_id {
                self.post_waiting_notification(user, params).await;
            }
        }

        let reminder = self.spawn_reminder(params);

        let result = tokio::time::timeout(params.final_timeout, self.poll_until_decision(params))
            .await
            .ok()
            .flatten();

        // Reminder dies with the wait, fired or not
        if let Some(handle) = reminder {
            handle.abort();
        }

        if result.is_none() {
            warn!(
                validation_id = %params.validation_id,
                timeout_secs = params.final_timeout.as_secs(),
                "Validation wait timed out"
            );
        }
        result
    }

    async fn post_waiting_notification(&self, user_slack_id: &str, params: &ValidationWaitParams) {
        let mut text = format!(
            "⏳ Validation requise: *{}* (tâche {})\nRépondez au commentaire Monday pour approuver ou rejeter.",
            params.task_title, params.task_id
        );
        if let Some(pr_url) = &params.pr_url {
            text.push_str(&format!("\nPR: {}", pr_url));
        }
        match self.slack.post_message(user_slack_id, &text).await {
            Ok(()) => info!(user = user_slack_id, "Waiting notification sent"),
            Err(e) => warn!(error = %e, "Waiting notification failed"),
        }
    }

    /// Start the reminder child. Fires at most once, only for commands with
    /// a known Slack user.
    fn spawn_reminder(&self, params: &ValidationWaitParams) -> Option<JoinHandle<()>> {
        let delay = params.reminder_delay?;
        if !params.is_command {
            return None;
        }
        let user = params.user_slack_id.clone()?;
        let slack = Arc::clone(&self.slack);
        let task_title = params.task_title.clone();
        let task_id = params.task_id.clone();

        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let text = format!(
                "⏰ Rappel: la validation de *{}* (tâche {}) attend toujours une réponse. Timeout approche.",
                task_title, task_id
            );
            match slack.post_message(&user, &text).await {
                Ok(()) => info!(user = %user, "Reminder sent"),
                Err(e) => warn!(error = %e, "Reminder failed"),
            }
        }))
    }

    async fn poll_until_decision(
        &self,
        params: &ValidationWaitParams,
    ) -> Option<ValidationResponse> {
        loop {
            // A response may arrive through the admin surface directly
            if let Ok(Some(response)) = self.validations.get_response(&params.validation_id) {
                return Some(response);
            }

            match self.monday.poll_replies(&params.update_id).await {
                Ok(replies) => {
                    for reply in replies {
                        if self.parser.is_agent_message(&reply.body) {
                            continue;
                        }
                        let Some(decision) = interpret_reply(&reply.body) else {
                            continue;
                        };
                        info!(
                            validation_id = %params.validation_id,
                            ?decision,
                            "Human decision received"
                        );
                        let response = decision_to_response(
                            &params.validation_id,
                            &decision,
                            reply.creator_id.map(|id| id.to_string()).as_deref(),
                            params.prior_rejection_count,
                        );
                        match self
                            .validations
                            .submit_response(&params.validation_id, response)
                        {
                            Ok(true) => {
                                return self
                                    .validations
                                    .get_response(&params.validation_id)
                                    .ok()
                                    .flatten();
                            }
                            Ok(false) => {
                                // Request already resolved elsewhere
                                return self
                                    .validations
                                    .get_response(&params.validation_id)
                                    .ok()
                                    .flatten();
                            }
                            Err(e) => {
                                warn!(error = %e, "Response submission failed, keeping poll alive")
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Reply poll failed"),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::monday::{MondayItemInfo, MondayReply};
    use crate::clients::{CollaboratorError, CollaboratorResult};
    use crate::store::PersistenceStore;
    use crate::validation::types::{ValidationRequest, ValidationStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingSlack {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SlackClient for RecordingSlack {
        async fn lookup_user_by_email(&self, _email: &str) -> CollaboratorResult<Option<String>> {
            Ok(Some("U123".to_string()))
        }

        async fn post_message(&self, _user_id: &str, text: &str) -> CollaboratorResult<()> {
            self.messages.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct ScriptedMonday {
        replies: Mutex<Vec<MondayReply>>,
    }

    impl ScriptedMonday {
        fn new(replies: Vec<MondayReply>) -> Self {
            Self {
                replies: Mutex::new(replies),
            }
        }

        fn reply(body: &str) -> MondayReply {
            MondayReply {
                reply_id: "r1".to_string(),
                body: body.to_string(),
                creator_id: Some(7),
                created_at: None,
            }
        }
    }

    #[async_trait]
    impl MondayClient for ScriptedMonday {
        async fn post_update(&self, _item_id: i64, _body: &str) -> CollaboratorResult<String> {
            Ok("update-1".to_string())
        }

        async fn poll_replies(&self, _update_id: &str) -> CollaboratorResult<Vec<MondayReply>> {
            Ok(self.replies.lock().unwrap().clone())
        }

        async fn update_column_value(
            &self,
            _item_id: i64,
            _column_id: &str,
            _value: &str,
        ) -> CollaboratorResult<()> {
            Ok(())
        }

        async fn get_item_info(&self, item_id: i64) -> CollaboratorResult<MondayItemInfo> {
            Err(CollaboratorError::invalid(format!("no item {}", item_id)))
        }
    }

    fn wait_params(validation_id: &str) -> ValidationWaitParams {
        ValidationWaitParams {
            validation_id: validation_id.to_string(),
            update_id: "update-1".to_string(),
            user_slack_id: Some("U123".to_string()),
            user_email: None,
            task_title: "Test".to_string(),
            task_id: "1".to_string(),
            external_item_id: 42,
            pr_url: None,
            reminder_delay: None,
            final_timeout: Duration::from_secs(5),
            is_command: true,
            prior_rejection_count: 0,
        }
    }

    fn validation_fixture() -> (Arc<ValidationStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = PersistenceStore::open(dir.path().join("s.db"))
            .unwrap()
            .shared();
        let validations = ValidationStore::new(store).shared();
        validations.create_request(
            ValidationRequest::new(
                "v-1",
                1,
                "wf",
                "Test",
                "req",
                "sum",
                None,
                &json!(["main.txt"]),
            ),
            None,
        );
        (validations, dir)
    }

    #[tokio::test]
    async fn test_wait_resolves_on_human_reply() {
        let (validations, _dir) = validation_fixture();
        let slack = Arc::new(RecordingSlack::default());
        let monday = Arc::new(ScriptedMonday::new(vec![ScriptedMonday::reply("oui")]));

        let coordinator =
            NotificationCoordinator::new(slack.clone(), monday, validations.clone())
                .with_poll_interval(Duration::from_millis(10));

        let response = coordinator
            .wait_for_validation(&wait_params("v-1"))
            .await
            .unwrap();
        assert_eq!(response.status, ValidationStatus::Approved);
        assert!(response.should_merge);

        // Immediate waiting notification went out for the command
        assert_eq!(slack.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_skips_agent_replies() {
        let (validations, _dir) = validation_fixture();
        let monday = Arc::new(ScriptedMonday::new(vec![
            ScriptedMonday::reply("🤖 **WORKFLOW TERMINÉ**"),
            ScriptedMonday::reply("oui"),
        ]));
        let coordinator = NotificationCoordinator::new(
            Arc::new(RecordingSlack::default()),
            monday,
            validations.clone(),
        )
        .with_poll_interval(Duration::from_millis(10));

        let response = coordinator
            .wait_for_validation(&wait_params("v-1"))
            .await
            .unwrap();
        assert_eq!(response.status, ValidationStatus::Approved);
    }

    #[tokio::test]
    async fn test_timeout_returns_none_and_cancels_reminder() {
        let (validations, _dir) = validation_fixture();
        let slack = Arc::new(RecordingSlack::default());
        let monday = Arc::new(ScriptedMonday::new(vec![]));
        let coordinator =
            NotificationCoordinator::new(slack.clone(), monday, validations)
                .with_poll_interval(Duration::from_millis(10));

        let mut params = wait_params("v-1");
        params.final_timeout = Duration::from_millis(100);
        // Reminder scheduled after the final timeout: must never fire
        params.reminder_delay = Some(Duration::from_secs(60));

        let response = coordinator.wait_for_validation(&params).await;
        assert!(response.is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        // Only the initial waiting message, no reminder after cancellation
        assert_eq!(slack.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reminder_fires_once_before_timeout() {
        let (validations, _dir) = validation_fixture();
        let slack = Arc::new(RecordingSlack::default());
        let monday = Arc::new(ScriptedMonday::new(vec![]));
        let coordinator =
            NotificationCoordinator::new(slack.clone(), monday, validations)
                .with_poll_interval(Duration::from_millis(10));

        let mut params = wait_params("v-1");
        params.final_timeout = Duration::from_millis(300);
        params.reminder_delay = Some(Duration::from_millis(50));

        let response = coordinator.wait_for_validation(&params).await;
        assert!(response.is_none());

        let messages = slack.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].contains("Rappel"));
    }

    #[tokio::test]
    async fn test_question_gets_no_slack_traffic() {
        let (validations, _dir) = validation_fixture();
        let slack = Arc::new(RecordingSlack::default());
        let monday = Arc::new(ScriptedMonday::new(vec![]));
        let coordinator =
            NotificationCoordinator::new(slack.clone(), monday, validations)
                .with_poll_interval(Duration::from_millis(10));

        let mut params = wait_params("v-1");
        params.is_command = false;
        params.final_timeout = Duration::from_millis(100);
        params.reminder_delay = Some(Duration::from_millis(20));

        coordinator.wait_for_validation(&params).await;
        assert!(slack.messages.lock().unwrap().is_empty());
    }
}
