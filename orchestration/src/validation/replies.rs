//! Interpretation of Monday replies as validation decisions.
//!
//! Replies are free text in the requester's language ("oui", "non merci",
//! "debug ça", "change la couleur en vert"). Interpretation is keyword
//! driven and deliberately conservative: anything unrecognized is ignored so
//! chatter in the thread never resolves a validation.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::types::{ValidationResponse, ValidationStatus};

/// Decision extracted from a human reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplyDecision {
    Approved,
    Rejected,
    /// Rejection carrying modification instructions; the workflow should
    /// reimplement with them.
    RejectedWithRetry { instructions: String },
    /// Explicit request to run the assisted debug pass.
    Debug,
    /// Stop entirely.
    Abandoned,
}

const APPROVE_KEYWORDS: &[&str] = &[
    "oui", "yes", "ok", "okay", "approuve", "approuvé", "approved", "valide", "validé", "lgtm",
    "parfait", "👍",
];

const REJECT_KEYWORDS: &[&str] = &["non", "no", "rejete", "rejeté", "rejected", "refuse", "refusé"];

const DEBUG_KEYWORDS: &[&str] = &["debug", "débug", "corrige", "fix"];

const ABANDON_KEYWORDS: &[&str] = &["stop", "abandon", "abandonne", "annule", "cancel"];

const MODIFY_KEYWORDS: &[&str] = &["modifie", "modifier", "change", "plutôt", "utilise", "use"];

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

fn contains_keyword(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

fn starts_with_keyword(text: &str, keywords: &[&str]) -> bool {
    let head = first_word(text).trim_matches(|c: char| !c.is_alphanumeric() && c != '👍');
    keywords.iter().any(|k| head.eq_ignore_ascii_case(k) || head == *k)
}

/// Interpret a reply body. Returns `None` when the reply is not a decision.
pub fn interpret_reply(text: &str) -> Option<ReplyDecision> {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    if starts_with_keyword(&normalized, ABANDON_KEYWORDS) {
        return Some(ReplyDecision::Abandoned);
    }
    if starts_with_keyword(&normalized, DEBUG_KEYWORDS) {
        return Some(ReplyDecision::Debug);
    }
    if starts_with_keyword(&normalized, APPROVE_KEYWORDS) {
        return Some(ReplyDecision::Approved);
    }
    if starts_with_keyword(&normalized, REJECT_KEYWORDS) {
        // A rejection carrying more than the bare keyword is a
        // modification request
        let remainder = normalized
            .split_whitespace()
            .skip(1)
            .collect::<Vec<_>>()
            .join(" ");
        let remainder = remainder
            .trim_start_matches([',', ':', '-', ' '])
            .to_string();
        if remainder.len() > 3 {
            return Some(ReplyDecision::RejectedWithRetry {
                instructions: text
                    .trim()
                    .splitn(2, char::is_whitespace)
                    .nth(1)
                    .unwrap_or("")
                    .trim_start_matches([',', ':', '-', ' '])
                    .to_string(),
            });
        }
        return Some(ReplyDecision::Rejected);
    }
    if contains_keyword(&normalized, MODIFY_KEYWORDS) {
        return Some(ReplyDecision::RejectedWithRetry {
            instructions: text.trim().to_string(),
        });
    }
    None
}

/// Materialize a decision into a response row.
pub fn decision_to_response(
    validation_id: &str,
    decision: &ReplyDecision,
    validated_by: Option<&str>,
    prior_rejection_count: u32,
) -> ValidationResponse {
    let mut response = ValidationResponse {
        validation_id: validation_id.to_string(),
        status: ValidationStatus::Approved,
        comments: None,
        validated_by: validated_by.map(String::from),
        validated_at: Utc::now(),
        should_merge: false,
        should_continue_workflow: true,
        rejection_count: prior_rejection_count,
        modification_instructions: None,
        should_retry_workflow: false,
        validation_duration_seconds: None,
    };

    match decision {
        ReplyDecision::Approved => {
            response.status = ValidationStatus::Approved;
            response.should_merge = true;
        }
        ReplyDecision::Rejected => {
            response.status = ValidationStatus::Rejected;
            response.rejection_count = prior_rejection_count + 1;
        }
        ReplyDecision::RejectedWithRetry { instructions } => {
            response.status = ValidationStatus::Rejected;
            response.rejection_count = prior_rejection_count + 1;
            response.modification_instructions = Some(instructions.clone());
            response.should_retry_workflow = true;
        }
        ReplyDecision::Debug => {
            response.status = ValidationStatus::Rejected;
            response.comments = Some("debug requested".to_string());
            response.should_retry_workflow = true;
            response.modification_instructions = None;
        }
        ReplyDecision::Abandoned => {
            response.status = ValidationStatus::Cancelled;
            response.should_continue_workflow = false;
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approvals() {
        assert_eq!(interpret_reply("oui"), Some(ReplyDecision::Approved));
        assert_eq!(interpret_reply("Oui !"), Some(ReplyDecision::Approved));
        assert_eq!(interpret_reply("yes, go ahead"), Some(ReplyDecision::Approved));
        assert_eq!(interpret_reply("LGTM"), Some(ReplyDecision::Approved));
    }

    #[test]
    fn test_rejections() {
        assert_eq!(interpret_reply("non"), Some(ReplyDecision::Rejected));
        assert_eq!(interpret_reply("No."), Some(ReplyDecision::Rejected));
    }

    #[test]
    fn test_rejection_with_instructions() {
        let decision = interpret_reply("non, utilise UTF-8 BOM").unwrap();
        match decision {
            ReplyDecision::RejectedWithRetry { instructions } => {
                assert!(instructions.contains("utilise UTF-8 BOM"));
            }
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_modification_without_no() {
        let decision = interpret_reply("Change la couleur en vert").unwrap();
        assert!(matches!(decision, ReplyDecision::RejectedWithRetry { .. }));
    }

    #[test]
    fn test_debug_and_abandon() {
        assert_eq!(interpret_reply("debug"), Some(ReplyDecision::Debug));
        assert_eq!(interpret_reply("stop"), Some(ReplyDecision::Abandoned));
        assert_eq!(interpret_reply("Annule tout"), Some(ReplyDecision::Abandoned));
    }

    #[test]
    fn test_chatter_is_ignored() {
        assert_eq!(interpret_reply("merci pour l'info"), None);
        assert_eq!(interpret_reply(""), None);
        assert_eq!(interpret_reply("On verra demain"), None);
    }

    #[test]
    fn test_decision_to_response_statuses() {
        let approved = decision_to_response("v-1", &ReplyDecision::Approved, Some("alex"), 0);
        assert_eq!(approved.status, ValidationStatus::Approved);
        assert!(approved.should_merge);

        let retry = decision_to_response(
            "v-1",
            &ReplyDecision::RejectedWithRetry {
                instructions: "Use UTF-8 BOM".to_string(),
            },
            None,
            0,
        );
        assert_eq!(retry.status, ValidationStatus::Rejected);
        assert_eq!(retry.rejection_count, 1);
        assert!(retry.should_retry_workflow);
        assert_eq!(
            retry.modification_instructions.as_deref(),
            Some("Use UTF-8 BOM")
        );

        let abandoned = decision_to_response("v-1", &ReplyDecision::Abandoned, None, 0);
        assert_eq!(abandoned.status, ValidationStatus::Cancelled);
        assert!(!abandoned.should_continue_workflow);
    }

    #[test]
    fn test_response_statuses_stay_in_domain() {
        for decision in [
            ReplyDecision::Approved,
            ReplyDecision::Rejected,
            ReplyDecision::Debug,
            ReplyDecision::Abandoned,
        ] {
            let response = decision_to_response("v", &decision, None, 0);
            assert!(response.status.valid_for_response());
        }
    }
}
