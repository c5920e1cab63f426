//! LLM-backed intent classification for Monday comments.
//!
//! The model is asked for a strict JSON object; replies tolerate ```json
//! fences. On parse failure or provider error the deterministic keyword
//! classifier takes over with confidence capped at 0.5 so downstream
//! routing can tell the difference.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clients::llm::{strip_json_fences, CompletionRequest, LlmClient};

/// Classified kinds of inbound comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    NewRequest,
    Modification,
    BugReport,
    Question,
    Affirmation,
    ValidationResponse,
}

impl IntentType {
    /// Parse the LLM's uppercase tag ("NEW_REQUEST") or our snake_case.
    pub fn parse_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "new_request" => Some(Self::NewRequest),
            "modification" => Some(Self::Modification),
            "bug_report" => Some(Self::BugReport),
            "question" => Some(Self::Question),
            "affirmation" => Some(Self::Affirmation),
            "validation_response" => Some(Self::ValidationResponse),
            _ => None,
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NewRequest => "new_request",
            Self::Modification => "modification",
            Self::BugReport => "bug_report",
            Self::Question => "question",
            Self::Affirmation => "affirmation",
            Self::ValidationResponse => "validation_response",
        };
        write!(f, "{}", s)
    }
}

/// Requirements pulled out of a command-type comment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedRequirements {
    pub title: Option<String>,
    pub description: Option<String>,
    pub task_type: Option<String>,
    pub priority: Option<String>,
    #[serde(default)]
    pub files_mentioned: Vec<String>,
    #[serde(default)]
    pub technical_keywords: Vec<String>,
}

/// Classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateIntent {
    #[serde(rename = "type")]
    pub intent: IntentType,
    pub confidence: f64,
    pub requires_workflow: bool,
    pub reasoning: String,
    pub extracted_requirements: Option<ExtractedRequirements>,
}

/// Task context fed to the classification prompt.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub task_title: String,
    pub task_status: String,
    pub monday_status: Option<String>,
    pub original_description: String,
}

const ANALYZE_UPDATE_PROMPT: &str = r#"Analyse ce commentaire Monday.com et détermine s'il s'agit d'une NOUVELLE DEMANDE nécessitant un workflow.

CONTEXTE:
- Tâche : {task_title}
- Statut actuel : {task_status}
- Statut Monday : {monday_status}
- Description originale : {original_description}

COMMENTAIRE À ANALYSER:
{update_text}

INSTRUCTIONS:
1. Détermine le TYPE de commentaire :
   - NEW_REQUEST : Nouvelle fonctionnalité/implémentation demandée
   - MODIFICATION : Modification d'une feature existante
   - BUG_REPORT : Signalement de bug nécessitant correction
   - QUESTION : Simple question sans action requise
   - AFFIRMATION : Commentaire/Remerciement/Confirmation
   - VALIDATION_RESPONSE : Réponse à une validation (oui/non/approuvé)

2. Si NEW_REQUEST, MODIFICATION ou BUG_REPORT, extrais ce qui est demandé,
   le type de tâche (feature/bugfix/refactor/...), la priorité estimée
   (low/medium/high/urgent) et les fichiers potentiellement concernés.

RÉPONDS EN JSON (et UNIQUEMENT en JSON, sans texte avant ou après):
{
  "type": "NEW_REQUEST|MODIFICATION|BUG_REPORT|QUESTION|AFFIRMATION|VALIDATION_RESPONSE",
  "confidence": 0.85,
  "requires_workflow": true,
  "reasoning": "Explication de la décision",
  "extracted_requirements": {
    "title": "Titre court de la demande",
    "description": "Description détaillée",
    "task_type": "feature",
    "priority": "medium",
    "files_mentioned": ["file1.py"],
    "technical_keywords": ["React", "API"]
  }
}
"#;

/// Classifier over an injected LLM seam.
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Classify one cleaned comment against its task context.
    pub async fn analyze(&self, update_text: &str, context: &TaskContext) -> UpdateIntent {
        if update_text.trim().is_empty() {
            return UpdateIntent {
                intent: IntentType::Affirmation,
                confidence: 1.0,
                requires_workflow: false,
                reasoning: "Commentaire vide".to_string(),
                extracted_requirements: None,
            };
        }

        let prompt = ANALYZE_UPDATE_PROMPT
            .replace("{task_title}", &context.task_title)
            .replace("{task_status}", &context.task_status)
            .replace(
                "{monday_status}",
                context.monday_status.as_deref().unwrap_or("Non spécifié"),
            )
            .replace(
                "{original_description}",
                &context
                    .original_description
                    .chars()
                    .take(500)
                    .collect::<String>(),
            )
            .replace("{update_text}", update_text);

        let request = CompletionRequest::new(prompt).with_max_tokens(2000);
        match self.llm.complete(&request).await {
            Ok(completion) => match self.parse_response(&completion.content) {
                Some(intent) => {
                    info!(
                        intent = %intent.intent,
                        confidence = intent.confidence,
                        requires_workflow = intent.requires_workflow,
                        "Update classified"
                    );
                    intent
                }
                None => {
                    warn!("Classifier reply unparseable, using keyword fallback");
                    self.keyword_fallback(update_text, 0.5, "Échec parsing réponse LLM")
                }
            },
            Err(e) => {
                warn!(error = %e, "Classifier LLM unavailable, using keyword fallback");
                self.keyword_fallback(update_text, 0.3, &format!("Erreur d'analyse: {}", e))
            }
        }
    }

    fn parse_response(&self, content: &str) -> Option<UpdateIntent> {
        let cleaned = strip_json_fences(content);
        let value: serde_json::Value = serde_json::from_str(cleaned).ok()?;

        let intent = IntentType::parse_tag(value["type"].as_str()?)?;
        let extracted = value
            .get("extracted_requirements")
            .filter(|v| v.is_object())
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        Some(UpdateIntent {
            intent,
            confidence: value["confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0),
            requires_workflow: value["requires_workflow"].as_bool().unwrap_or(false),
            reasoning: value["reasoning"].as_str().unwrap_or_default().to_string(),
            extracted_requirements: extracted,
        })
    }

    fn keyword_fallback(&self, text: &str, confidence: f64, reasoning: &str) -> UpdateIntent {
        let intent = classify_by_keywords(text);
        let requires_workflow = matches!(
            intent,
            IntentType::NewRequest | IntentType::Modification | IntentType::BugReport
        );
        debug!(intent = %intent, "Keyword fallback classification");
        UpdateIntent {
            intent,
            confidence: confidence.min(0.5),
            requires_workflow,
            reasoning: reasoning.to_string(),
            extracted_requirements: None,
        }
    }
}

/// Deterministic keyword classifier used when the LLM is unusable.
pub fn classify_by_keywords(text: &str) -> IntentType {
    let lower = text.to_lowercase();
    let contains = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if contains(&["merci", "thank", "parfait", "d'accord", "👍"]) {
        return IntentType::Affirmation;
    }
    if contains(&["?", "comment", "pourquoi", "how", "why"]) {
        return IntentType::Question;
    }
    if contains(&["bug", "erreur", "ne fonctionne pas", "error", "broken"]) {
        return IntentType::BugReport;
    }
    if contains(&["ajouter", "créer", "implémenter", "add", "create", "implement"]) {
        return IntentType::NewRequest;
    }
    if contains(&["modifier", "changer", "update", "change", "modify"]) {
        return IntentType::Modification;
    }
    IntentType::Question
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::llm::Completion;
    use crate::clients::{CollaboratorError, CollaboratorResult};
    use async_trait::async_trait;

    struct ScriptedLlm {
        reply: Option<String>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: &CompletionRequest) -> CollaboratorResult<Completion> {
            match &self.reply {
                Some(reply) => Ok(Completion {
                    content: reply.clone(),
                    input_tokens: 10,
                    output_tokens: 10,
                    latency_ms: 1,
                    provider_used: "scripted".to_string(),
                    model: "scripted".to_string(),
                }),
                None => Err(CollaboratorError::api(500, "down")),
            }
        }
    }

    fn classifier(reply: Option<&str>) -> IntentClassifier {
        IntentClassifier::new(Arc::new(ScriptedLlm {
            reply: reply.map(String::from),
        }))
    }

    #[tokio::test]
    async fn test_parses_fenced_json_reply() {
        let reply = r#"```json
{"type": "QUESTION", "confidence": 0.92, "requires_workflow": false, "reasoning": "simple question"}
```"#;
        let intent = classifier(Some(reply))
            .analyze(
                "Pourquoi ce projet utilise-t-il Java ?",
                &TaskContext::default(),
            )
            .await;
        assert_eq!(intent.intent, IntentType::Question);
        assert!(!intent.requires_workflow);
        assert!((intent.confidence - 0.92).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_extracts_requirements() {
        let reply = r#"{"type": "MODIFICATION", "confidence": 0.88, "requires_workflow": true,
            "reasoning": "change request",
            "extracted_requirements": {"title": "Changer la couleur", "priority": "high",
                "files_mentioned": ["Button.css"], "technical_keywords": ["CSS"]}}"#;
        let intent = classifier(Some(reply))
            .analyze("Change la couleur du bouton", &TaskContext::default())
            .await;
        assert_eq!(intent.intent, IntentType::Modification);
        let extracted = intent.extracted_requirements.unwrap();
        assert_eq!(extracted.priority.as_deref(), Some("high"));
        assert_eq!(extracted.files_mentioned, vec!["Button.css"]);
    }

    #[tokio::test]
    async fn test_empty_input_is_affirmation() {
        let intent = classifier(None).analyze("   ", &TaskContext::default()).await;
        assert_eq!(intent.intent, IntentType::Affirmation);
        assert!(!intent.requires_workflow);
        assert!((intent.confidence - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unparseable_reply_falls_back_low_confidence() {
        let intent = classifier(Some("I think this is probably a question"))
            .analyze("Ajouter un endpoint REST", &TaskContext::default())
            .await;
        assert!(intent.confidence <= 0.5);
        assert_eq!(intent.intent, IntentType::NewRequest);
        assert!(intent.requires_workflow);
    }

    #[tokio::test]
    async fn test_llm_error_falls_back() {
        let intent = classifier(None)
            .analyze("Le bouton est broken", &TaskContext::default())
            .await;
        assert!(intent.confidence <= 0.5);
        assert_eq!(intent.intent, IntentType::BugReport);
    }

    #[test]
    fn test_keyword_classifier() {
        assert_eq!(classify_by_keywords("merci beaucoup"), IntentType::Affirmation);
        assert_eq!(
            classify_by_keywords("pourquoi ça marche ?"),
            IntentType::Question
        );
        assert_eq!(classify_by_keywords("il y a un bug"), IntentType::BugReport);
        assert_eq!(
            classify_by_keywords("ajouter une fonction"),
            IntentType::NewRequest
        );
        assert_eq!(
            classify_by_keywords("modifier le style"),
            IntentType::Modification
        );
        assert_eq!(classify_by_keywords("hmm"), IntentType::Question);
    }

    #[test]
    fn test_tag_parsing_rejects_unknown() {
        assert_eq!(IntentType::parse_tag("NEW_REQUEST"), Some(IntentType::NewRequest));
        assert_eq!(IntentType::parse_tag("question"), Some(IntentType::Question));
        assert_eq!(IntentType::parse_tag("SOMETHING_ELSE"), None);
    }
}
