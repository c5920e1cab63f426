//! Validation persistence: requests, responses, actions.
//!
//! Request creation is idempotent and best-effort — a store failure is
//! logged and reported as `false` so the surrounding workflow keeps moving.
//! The response path is strict: the parent request must still be pending,
//! the response status must come from the closed response domain, and the
//! response row plus the parent-status sync land in one write batch so the
//! two can never diverge.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};

use super::types::*;
use crate::config;
use crate::error::{StoreError, StoreResult};
use crate::store::schema::{
    self, CF_VALIDATIONS, CF_VALIDATION_ACTIONS, CF_VALIDATION_RESPONSES,
};
use crate::store::{PersistenceStore, SharedStore};

/// Store facade for the human-validation aggregates.
pub struct ValidationStore {
    store: SharedStore,
}

impl ValidationStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Create a validation request. Returns `true` when the row exists after
    /// the call (created now or already present via the idempotence key /
    /// `(run_id, validation_type)` pair), `false` when persistence failed.
    pub fn create_request(
        &self,
        mut request: ValidationRequest,
        idempotence_key: Option<&str>,
    ) -> bool {
        if let Some(key) = idempotence_key {
            match self.find_existing(key, request.run_id, &request.validation_type) {
                Ok(Some(existing_id)) => {
                    info!(validation_id = %existing_id, "Validation already exists, idempotent success");
                    return true;
                }
                Ok(None) => {
                    request.validation_id = key.to_string();
                }
                Err(e) => {
                    warn!(error = %e, "Idempotence lookup failed, attempting create anyway");
                }
            }
        }

        let result = self.store.with_retry(|| {
            self.store.put(
                CF_VALIDATIONS,
                &schema::keys::validation(&request.validation_id),
                &request,
            )
        });

        match result {
            Ok(()) => {
                info!(validation_id = %request.validation_id, "Validation request created");
                true
            }
            Err(e) => {
                // Never stall the workflow on a validation write
                error!(validation_id = %request.validation_id, error = %e, "Validation create failed, continuing workflow");
                false
            }
        }
    }

    fn find_existing(
        &self,
        idempotence_key: &str,
        run_id: Option<i64>,
        validation_type: &str,
    ) -> StoreResult<Option<String>> {
        if self
            .store
            .get::<ValidationRequest>(CF_VALIDATIONS, &schema::keys::validation(idempotence_key))?
            .is_some()
        {
            return Ok(Some(idempotence_key.to_string()));
        }
        if let Some(run_id) = run_id {
            // Only a still-pending validation blocks a new one for the same
            // run; resolved rounds do not
            let rows: Vec<ValidationRequest> = self.store.list(CF_VALIDATIONS, "val:")?;
            if let Some(existing) = rows.iter().find(|r| {
                r.run_id == Some(run_id)
                    && r.validation_type == validation_type
                    && r.status == ValidationStatus::Pending
            }) {
                return Ok(Some(existing.validation_id.clone()));
            }
        }
        Ok(None)
    }

    pub fn get_request(&self, validation_id: &str) -> StoreResult<Option<ValidationRequest>> {
        self.store
            .get(CF_VALIDATIONS, &schema::keys::validation(validation_id))
    }

    /// Submit a human response. The parent request must still be pending;
    /// the parent's status is synchronized to the response status in the
    /// same batch.
    pub fn submit_response(
        &self,
        validation_id: &str,
        mut response: ValidationResponse,
    ) -> StoreResult<bool> {
        if !response.status.valid_for_response() {
            return Err(StoreError::conflict(format!(
                "status '{}' is not a valid response status",
                response.status
            )));
        }

        let Some(mut request) = self.get_request(validation_id)? else {
            error!(validation_id, "Validation not found");
            return Ok(false);
        };

        if request.status != ValidationStatus::Pending {
            error!(
                validation_id,
                status = %request.status,
                "Validation is no longer pending"
            );
            return Ok(false);
        }

        let duration = response.validated_at - request.created_at;
        response.validation_duration_seconds = Some(duration.num_seconds());
        response.validation_id = validation_id.to_string();

        request.status = response.status;

        self.store.with_retry(|| {
            self.store.write_pairs(&[
                (
                    CF_VALIDATION_RESPONSES,
                    schema::keys::validation_response(validation_id),
                    PersistenceStore::encode(&response)?,
                ),
                (
                    CF_VALIDATIONS,
                    schema::keys::validation(validation_id),
                    PersistenceStore::encode(&request)?,
                ),
            ])
        })?;

        info!(validation_id, status = %response.status, "Validation response submitted");
        Ok(true)
    }

    pub fn get_response(&self, validation_id: &str) -> StoreResult<Option<ValidationResponse>> {
        self.store.get(
            CF_VALIDATION_RESPONSES,
            &schema::keys::validation_response(validation_id),
        )
    }

    /// Block until a response arrives or the timeout elapses, polling the
    /// response rows every 10 seconds (configurable). Each round also checks
    /// expiry and marks the request expired when its deadline passed.
    pub async fn wait_for_response(
        &self,
        validation_id: &str,
        timeout: Duration,
    ) -> Option<ValidationResponse> {
        let poll_interval =
            Duration::from_secs(config::config().validation_poll_interval_secs.max(1));
        self.wait_for_response_with_interval(validation_id, timeout, poll_interval)
            .await
    }

    pub async fn wait_for_response_with_interval(
        &self,
        validation_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Option<ValidationResponse> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.get_response(validation_id) {
                Ok(Some(response)) => return Some(response),
                Ok(None) => {}
                Err(e) => warn!(validation_id, error = %e, "Response poll failed"),
            }

            if let Ok(Some(request)) = self.get_request(validation_id) {
                if request.status == ValidationStatus::Pending && request.is_expired(Utc::now()) {
                    warn!(validation_id, "Validation expired while waiting");
                    let _ = self.mark_expired(validation_id);
                    return None;
                }
                if request.status != ValidationStatus::Pending {
                    // Status moved without a response row (cancelled externally)
                    return self.get_response(validation_id).ok().flatten();
                }
            }

            if tokio::time::Instant::now() + poll_interval > deadline {
                return None;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    fn mark_expired(&self, validation_id: &str) -> StoreResult<()> {
        if let Some(mut request) = self.get_request(validation_id)? {
            if request.status == ValidationStatus::Pending {
                request.status = ValidationStatus::Expired;
                self.store.put(
                    CF_VALIDATIONS,
                    &schema::keys::validation(validation_id),
                    &request,
                )?;
            }
        }
        Ok(())
    }

    /// Sweep pending requests past their deadline into `expired`.
    pub fn mark_expired_validations(&self) -> StoreResult<usize> {
        let rows: Vec<ValidationRequest> = self.store.list(CF_VALIDATIONS, "val:")?;
        let now = Utc::now();
        let mut expired = 0;
        for request in rows {
            if request.status == ValidationStatus::Pending && request.is_expired(now) {
                self.mark_expired(&request.validation_id)?;
                expired += 1;
            }
        }
        Ok(expired)
    }

    // =========================================================================
    // Actions
    // =========================================================================

    pub fn create_action(
        &self,
        validation_id: &str,
        action_type: ActionType,
        input: Option<Value>,
    ) -> StoreResult<i64> {
        let action_id = self.store.next_id("validation_actions")?;
        let action = ValidationAction {
            action_id,
            validation_id: validation_id.to_string(),
            action_type,
            status: ActionStatus::Pending,
            input,
            result: None,
            merge_commit_hash: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.store.put(
            CF_VALIDATION_ACTIONS,
            &schema::keys::validation_action(validation_id, action_id),
            &action,
        )?;
        Ok(action_id)
    }

    pub fn update_action(
        &self,
        validation_id: &str,
        action_id: i64,
        status: ActionStatus,
        result: Option<Value>,
        error: Option<&str>,
        merge_commit_hash: Option<&str>,
    ) -> StoreResult<()> {
        let key = schema::keys::validation_action(validation_id, action_id);
        let mut action = self
            .store
            .get::<ValidationAction>(CF_VALIDATION_ACTIONS, &key)?
            .ok_or_else(|| StoreError::not_found(format!("action {}", action_id)))?;
        action.status = status;
        if result.is_some() {
            action.result = result;
        }
        action.error = error.map(String::from);
        if merge_commit_hash.is_some() {
            action.merge_commit_hash = merge_commit_hash.map(String::from);
        }
        if matches!(
            status,
            ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Cancelled
        ) {
            action.completed_at = Some(Utc::now());
        }
        self.store.put(CF_VALIDATION_ACTIONS, &key, &action)
    }

    pub fn list_actions(&self, validation_id: &str) -> StoreResult<Vec<ValidationAction>> {
        let mut actions: Vec<ValidationAction> = self.store.list(
            CF_VALIDATION_ACTIONS,
            &schema::keys::validation_action_prefix(validation_id),
        )?;
        actions.sort_by_key(|a| a.action_id);
        Ok(actions)
    }

    // =========================================================================
    // Listing & stats
    // =========================================================================

    /// Pending validations (optionally with expired ones), ordered: pending
    /// before expired, urgent (expiring within the hour) before the rest,
    /// then most recent first.
    pub fn list_pending(&self, include_expired: bool) -> StoreResult<Vec<ValidationSummary>> {
        self.mark_expired_validations()?;

        let rows: Vec<ValidationRequest> = self.store.list(CF_VALIDATIONS, "val:")?;
        let now = Utc::now();
        let mut summaries: Vec<ValidationSummary> = rows
            .into_iter()
            .filter(|r| {
                r.status == ValidationStatus::Pending
                    || (include_expired && r.status == ValidationStatus::Expired)
            })
            .map(|r| {
                let is_urgent = r.status == ValidationStatus::Pending
                    && r.expires_at < now + chrono::Duration::hours(1);
                let has_test_failures = r
                    .test_results
                    .as_deref()
                    .and_then(|t| serde_json::from_str::<Value>(t).ok())
                    .map(|v| v["success"] == Value::Bool(false))
                    .unwrap_or(false);
                let pr_url = r
                    .pr_info
                    .as_deref()
                    .and_then(|p| serde_json::from_str::<Value>(p).ok())
                    .and_then(|v| v["url"].as_str().map(String::from));
                ValidationSummary {
                    validation_id: r.validation_id,
                    task_title: r.task_title,
                    status: r.status,
                    created_at: r.created_at,
                    expires_at: r.expires_at,
                    files_count: r.files_modified.len(),
                    pr_url,
                    is_urgent,
                    has_test_failures,
                }
            })
            .collect();

        summaries.sort_by(|a, b| {
            let pending_rank =
                |s: &ValidationSummary| u8::from(s.status != ValidationStatus::Pending);
            let urgent_rank = |s: &ValidationSummary| u8::from(!s.is_urgent);
            pending_rank(a)
                .cmp(&pending_rank(b))
                .then(urgent_rank(a).cmp(&urgent_rank(b)))
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(summaries)
    }

    pub fn stats(&self) -> StoreResult<ValidationStats> {
        let rows: Vec<ValidationRequest> = self.store.list(CF_VALIDATIONS, "val:")?;
        let now = Utc::now();
        let mut stats = ValidationStats {
            total_validations: rows.len() as u64,
            ..Default::default()
        };

        let mut durations = Vec::new();
        for request in &rows {
            match request.status {
                ValidationStatus::Pending => {
                    stats.pending_validations += 1;
                    if request.expires_at < now + chrono::Duration::hours(1) {
                        stats.urgent_validations += 1;
                    }
                }
                ValidationStatus::Approved => stats.approved_validations += 1,
                ValidationStatus::Rejected => stats.rejected_validations += 1,
                ValidationStatus::Expired => stats.expired_validations += 1,
                _ => {}
            }
            if let Ok(Some(response)) = self.get_response(&request.validation_id) {
                if let Some(seconds) = response.validation_duration_seconds {
                    durations.push(seconds as f64 / 60.0);
                }
            }
        }
        if !durations.is_empty() {
            stats.avg_validation_time_minutes =
                durations.iter().sum::<f64>() / durations.len() as f64;
        }
        Ok(stats)
    }
}
