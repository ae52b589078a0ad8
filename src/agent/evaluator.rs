//! Evaluator gateway - turns an article plus the live instructions into a
//! worthiness score and rationale

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::llm::{ChatClient, ChatMessage};
use crate::error::{PipelineError, PipelineResult};
use crate::prompt::InstructionSet;
use crate::store::{ArticleRecord, Score};

/// Appended to every instruction set so refined wording can never drop the
/// output format the parser depends on
pub const RESPONSE_CONTRACT: &str = "\
Respond with a single JSON object and nothing else:
{\"score\": <integer from 1 to 10>, \"rationale\": \"<1-2 sentences explaining the score>\", \"summary\": \"<one-sentence summary of the story>\"}";

/// Article HTML beyond this many bytes is cut before it is sent
const MAX_BODY_BYTES: usize = 6000;

/// Parsed evaluator verdict
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: Score,
    pub rationale: String,
    pub summary: Option<String>,
}

/// External text-scoring service
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Score one article under the given instructions
    async fn evaluate(
        &self,
        article: &ArticleRecord,
        instructions: &InstructionSet,
    ) -> PipelineResult<Evaluation>;

    /// Model name recorded on each evaluation
    fn model(&self) -> &str;
}

/// Articles without body text never reach the backend
pub fn ensure_evaluable(article: &ArticleRecord) -> PipelineResult<()> {
    if article.has_body() {
        Ok(())
    } else {
        Err(PipelineError::MissingBody { id: article.id.clone() })
    }
}

/// Text description of an article handed to the evaluator
pub fn state_representation(article: &ArticleRecord) -> String {
    let mut state = format!("Title: {}\n", article.title);
    if let Some(name) = &article.location_name {
        state.push_str(&format!("Location: {}\n", name));
    }
    if let Some(count) = article.mention_count {
        state.push_str(&format!("Mentions: {}\n", count));
    }
    if let Some(link) = &article.link {
        state.push_str(&format!("Link: {}\n", link));
    }
    state.push_str(&format!(
        "HTML: {}",
        crate::truncate_safe(article.body_html.trim(), MAX_BODY_BYTES)
    ));
    state
}

/// Build the chat messages for one evaluation.
///
/// A `{state}` template is rendered in place as a single user message;
/// anything else becomes the system message with the article as the user turn.
pub fn build_messages(instructions: &InstructionSet, article: &ArticleRecord) -> Vec<ChatMessage> {
    let state = state_representation(article);
    if instructions.is_template() {
        let rendered = instructions.text.replace("{state}", &state);
        vec![ChatMessage::user(format!("{}\n\n{}", rendered, RESPONSE_CONTRACT))]
    } else {
        vec![
            ChatMessage::system(format!("{}\n\n{}", instructions.text.trim(), RESPONSE_CONTRACT)),
            ChatMessage::user(format!("Article details:\n{}", state)),
        ]
    }
}

fn first_string(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn score_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// First `{`-started JSON object in `text`, ignoring whatever follows it
fn first_json_object(text: &str) -> PipelineResult<Value> {
    let mut last_error = None;
    for (start, _) in text.match_indices('{') {
        let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(value @ Value::Object(_))) => return Ok(value),
            Some(Err(e)) => last_error = Some(e),
            _ => {}
        }
    }
    Err(PipelineError::EvaluatorMalformedResponse(match last_error {
        Some(e) => format!("invalid JSON ({}): {}", e, crate::truncate_safe(text, 200)),
        None => format!("no JSON object in response: {}", crate::truncate_safe(text, 200)),
    }))
}

/// Parse a raw evaluator reply.
///
/// Tolerates markdown fences and prose around the first JSON object. The
/// score must be an integer in 1..=10 and a non-empty rationale must be
/// present; anything else is a malformed response.
pub fn parse_evaluation(raw: &str) -> PipelineResult<Evaluation> {
    let trimmed = raw.trim();
    let obj = first_json_object(trimmed)?;

    let raw_score = ["score", "worthiness", "tweet_worthiness"]
        .iter()
        .find_map(|k| obj.get(*k))
        .ok_or_else(|| PipelineError::EvaluatorMalformedResponse("missing score".to_string()))?;
    let score = score_value(raw_score)
        .and_then(Score::new)
        .ok_or_else(|| PipelineError::EvaluatorMalformedResponse(format!("score {} outside 1..=10", raw_score)))?;

    let rationale = first_string(&obj, &["rationale", "reasoning", "summary"])
        .ok_or_else(|| PipelineError::EvaluatorMalformedResponse("missing rationale".to_string()))?;
    let summary = first_string(&obj, &["summary"]);

    Ok(Evaluation { score, rationale, summary })
}

/// Evaluator backed by a chat-completions model
pub struct LlmEvaluator {
    client: ChatClient,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl LlmEvaluator {
    pub fn new(client: ChatClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: Some(512),
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(
        &self,
        article: &ArticleRecord,
        instructions: &InstructionSet,
    ) -> PipelineResult<Evaluation> {
        ensure_evaluable(article)?;
        let messages = build_messages(instructions, article);
        let reply = self
            .client
            .complete(&self.model, messages, self.max_tokens, self.temperature)
            .await
            .map_err(|e| PipelineError::EvaluatorUnavailable(format!("{:#}", e)))?;
        debug!("Evaluator reply for {}: {}", article.id, crate::truncate_safe(&reply, 300));
        parse_evaluation(&reply)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
