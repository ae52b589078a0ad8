//! Refinement backends - rewrite the instruction text given a feedback report

use async_trait::async_trait;
use tracing::debug;

use super::llm::{ChatClient, ChatMessage};
use crate::error::{PipelineError, PipelineResult};

const IMPROVEMENT_TEMPLATE: &str = "\
You are a prompt improvement agent. Your task is to refine an agent prompt for evaluating news articles using human feedback.
The original prompt is provided below, followed by detailed human feedback; each entry is formatted as 'Score: <score> - <reasoning>'.
Ensure your revised prompt explicitly incorporates this feedback so that future evaluations align with human priorities.
Do not describe an output format; that is supplied separately.

Original Prompt:
{original_prompt}

Human Feedback:
{feedback_section}

Please output ONLY the revised prompt text with no additional commentary, greetings, or extra language. The output should consist solely of the improved prompt.";

/// Generative service that produces revised instruction text
#[async_trait]
pub trait PromptRefiner: Send + Sync {
    /// Return the revised instruction text; the caller validates and versions it
    async fn refine(&self, current: &str, feedback: &str) -> PipelineResult<String>;

    fn name(&self) -> &str;
}

/// Strip a surrounding markdown fence and whitespace from a model reply
pub fn clean_refined_text(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string (e.g. ```text) on the opening line
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.trim_end().trim_end_matches("```").trim().to_string()
}

pub fn render_improvement_prompt(current: &str, feedback: &str) -> String {
    IMPROVEMENT_TEMPLATE
        .replace("{original_prompt}", current.trim())
        .replace("{feedback_section}", feedback.trim())
}

/// Refiner backed by a chat-completions model
pub struct LlmRefiner {
    client: ChatClient,
    model: String,
    temperature: Option<f32>,
}

impl LlmRefiner {
    pub fn new(client: ChatClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: Some(0.7),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl PromptRefiner for LlmRefiner {
    async fn refine(&self, current: &str, feedback: &str) -> PipelineResult<String> {
        let messages = vec![ChatMessage::user(render_improvement_prompt(current, feedback))];
        let reply = self
            .client
            .complete(&self.model, messages, None, self.temperature)
            .await
            .map_err(|e| PipelineError::RefinementUnavailable(format!("{:#}", e)))?;
        debug!("Refiner reply: {}", crate::truncate_safe(&reply, 300));
        Ok(clean_refined_text(&reply))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Offline backend: keeps the wording and lets the calibration notes carry
/// the feedback
#[derive(Debug, Default, Clone, Copy)]
pub struct NotesRefiner;

#[async_trait]
impl PromptRefiner for NotesRefiner {
    async fn refine(&self, current: &str, _feedback: &str) -> PipelineResult<String> {
        Ok(current.to_string())
    }

    fn name(&self) -> &str {
        "notes"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_plain_text() {
        assert_eq!(clean_refined_text("  Be strict.\n"), "Be strict.");
    }

    #[test]
    fn test_clean_fenced_text() {
        assert_eq!(clean_refined_text("```text\nBe strict.\nPrefer casualties.\n```"), "Be strict.\nPrefer casualties.");
        assert_eq!(clean_refined_text("```\n```"), "");
    }

    #[test]
    fn test_template_renders_both_parts() {
        let prompt = render_improvement_prompt("Old prompt", "Score: 3.0 - too local");
        assert!(prompt.contains("Original Prompt:\nOld prompt"));
        assert!(prompt.contains("Human Feedback:\nScore: 3.0 - too local"));
        assert!(!prompt.contains("{original_prompt}"));
    }

    #[tokio::test]
    async fn test_notes_refiner_keeps_text() {
        let refined = NotesRefiner.refine("keep me", "feedback").await.unwrap();
        assert_eq!(refined, "keep me");
    }
}
