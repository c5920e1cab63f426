//! Parsing of `@vydata` mentions in Monday comments.
//!
//! Comments arrive as HTML fragments (`<p>@vydata do X</p>`, entity-encoded
//! spaces). The parser decodes entities, strips tags, normalizes whitespace,
//! requires the mention at the very start of the comment, and validates the
//! extracted command text. It also recognizes the agent's own message
//! signatures so the agent never triggers itself.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Minimum command length after the mention.
const MIN_TEXT_LENGTH: usize = 5;

/// Maximum command length after the mention.
const MAX_TEXT_LENGTH: usize = 2000;

/// The mention that addresses the agent.
pub const MENTION_NAME: &str = "@vydata";

fn mention_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^@vydata[:\s,]?\s*(.+)$").expect("static pattern"))
}

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("static pattern"))
}

fn whitespace_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

fn alphanumeric_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z0-9]").expect("static pattern"))
}

/// Leading signatures of messages the agent posts itself.
const AGENT_SIGNATURES: &[&str] = &[
    r"^🤖",
    r"^✅ Validation",
    r"^✅ \*\*Tâche Complétée",
    r"^🤖 \*\*WORKFLOW TERMINÉ",
    r"^🤖 \*\*RÉACTIVATION",
    r"^🤖 \*\*Réponse VyData\*\*",
    r"^\[AGENT\]",
    r"^\[BOT\]",
];

fn agent_patterns() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        AGENT_SIGNATURES
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)).expect("static pattern"))
            .collect()
    })
}

/// Result of parsing one comment body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentionParseResult {
    pub has_mention: bool,
    /// Command text after the mention, cleaned of HTML and whitespace.
    pub cleaned_text: String,
    pub original_text: String,
    pub mention_name: String,
    pub is_valid: bool,
    pub error_message: Option<String>,
    // Reserved for the guardrails layer; defaulted until it runs.
    pub is_safe: bool,
    pub is_appropriate: bool,
    pub security_issues: Vec<String>,
    pub sanitized_text: Option<String>,
}

impl MentionParseResult {
    fn rejected(original: &str, cleaned: &str, error: impl Into<String>) -> Self {
        Self {
            has_mention: false,
            cleaned_text: cleaned.to_string(),
            original_text: original.to_string(),
            mention_name: MENTION_NAME.to_string(),
            is_valid: false,
            error_message: Some(error.into()),
            is_safe: true,
            is_appropriate: true,
            security_issues: Vec::new(),
            sanitized_text: None,
        }
    }
}

/// Parser for `@vydata` mentions. Stateless; all methods are pure.
#[derive(Debug, Default)]
pub struct MentionParser;

impl MentionParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw comment body.
    pub fn parse_mention(&self, text: &str) -> MentionParseResult {
        if text.trim().is_empty() {
            return MentionParseResult::rejected(text, "", "Texte vide ou invalide");
        }

        let cleaned = self.clean_html(text);
        let cleaned = self.normalize_whitespace(&cleaned);

        let Some(extracted) = self.detect_mention(&cleaned) else {
            return MentionParseResult::rejected(
                text,
                &cleaned,
                "Mention @vydata non trouvée au début du commentaire",
            );
        };

        if let Err(message) = self.validate_extracted_text(&extracted) {
            return MentionParseResult {
                has_mention: true,
                cleaned_text: extracted,
                original_text: text.to_string(),
                mention_name: MENTION_NAME.to_string(),
                is_valid: false,
                error_message: Some(message),
                is_safe: true,
                is_appropriate: true,
                security_issues: Vec::new(),
                sanitized_text: None,
            };
        }

        debug!(text = %extracted.chars().take(50).collect::<String>(), "Mention detected");
        MentionParseResult {
            has_mention: true,
            cleaned_text: extracted,
            original_text: text.to_string(),
            mention_name: MENTION_NAME.to_string(),
            is_valid: true,
            error_message: None,
            is_safe: true,
            is_appropriate: true,
            security_issues: Vec::new(),
            sanitized_text: None,
        }
    }

    /// Whether a comment was posted by the agent itself.
    pub fn is_agent_message(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let cleaned = self.normalize_whitespace(&self.clean_html(text));
        agent_patterns().iter().any(|p| p.is_match(&cleaned))
    }

    fn clean_html(&self, text: &str) -> String {
        let without_tags = tag_pattern().replace_all(text, "");
        html_escape::decode_html_entities(without_tags.as_ref())
            .trim()
            .to_string()
    }

    fn normalize_whitespace(&self, text: &str) -> String {
        whitespace_pattern()
            .replace_all(text, " ")
            .trim()
            .to_string()
    }

    fn detect_mention(&self, text: &str) -> Option<String> {
        if !text.to_lowercase().contains(MENTION_NAME) {
            return None;
        }
        if let Some(captures) = mention_pattern().captures(text) {
            let extracted = captures.get(1)?.as_str().trim().to_string();
            if !extracted.is_empty() {
                return Some(extracted);
            }
        }
        None
    }

    fn validate_extracted_text(&self, text: &str) -> Result<(), String> {
        if text.is_empty() {
            return Err("Aucun texte après @vydata".to_string());
        }
        if text.len() < MIN_TEXT_LENGTH {
            return Err(format!(
                "Texte trop court après @vydata (minimum {} caractères)",
                MIN_TEXT_LENGTH
            ));
        }
        if text.len() > MAX_TEXT_LENGTH {
            return Err(format!(
                "Texte trop long après @vydata (maximum {} caractères)",
                MAX_TEXT_LENGTH
            ));
        }
        if !alphanumeric_pattern().is_match(text) {
            return Err(
                "Le texte après @vydata ne contient pas de caractères alphanumériques".to_string(),
            );
        }
        Ok(())
    }
}
