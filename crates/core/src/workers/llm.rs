use std::sync::Arc;

use cogito_llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

use crate::error::WorkerError;
use crate::types::{Proposal, RATIONALE_MAX, RATIONALE_MIN, TaskContext, WorkerId};

use super::{ReasoningWorker, Specialization};

const MAX_TOKENS: u32 = 512;
const TEMPERATURE: f32 = 0.4;
/// Memory entries rendered into the request.
const CONTEXT_ENTRIES: usize = 8;

/// Worker backed by an external reasoning provider.
pub struct LlmWorker {
    id: WorkerId,
    spec: Specialization,
    brief: String,
    provider: Arc<dyn LlmProvider>,
}

impl LlmWorker {
    pub fn new(spec: Specialization, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            id: WorkerId::new(spec.as_str()),
            spec,
            brief: spec.description().to_owned(),
            provider,
        }
    }

    /// Replace the role brief sent as the system message.
    pub fn with_brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = brief.into();
        self
    }

    fn request(&self, ctx: &TaskContext) -> CompletionRequest {
        let memory: Vec<serde_json::Value> = ctx
            .memory
            .iter()
            .take(CONTEXT_ENTRIES)
            .map(|e| serde_json::json!({ "key": e.key, "value": e.value, "importance": e.importance }))
            .collect();
        let body = serde_json::json!({
            "event": {
                "kind": ctx.focus.event.kind.as_str(),
                "payload": ctx.focus.event.payload,
                "priority": ctx.focus.priority,
            },
            "memory": memory,
            "affect": {
                "dominant": ctx.affect.dominant.as_str(),
                "stability": ctx.affect.stability,
            },
        });
        CompletionRequest {
            messages: vec![
                ChatMessage::system(format!(
                    "{}\nReply with `DECISION: <decision>`, optionally `CONFIDENCE: <0-1>`, \
                     then 3 to 7 rationale lines starting with `- `.",
                    self.brief
                )),
                ChatMessage::user(body.to_string()),
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        }
    }
}

/// Parsed reply: decision, explicit confidence if any, rationale lines.
#[derive(Debug, PartialEq)]
pub struct ParsedReply {
    pub decision: String,
    pub confidence: Option<f32>,
    pub rationale: Vec<String>,
}

/// Parse the `DECISION:` / `CONFIDENCE:` / `- ` reply protocol.
pub fn parse_reply(text: &str) -> Result<ParsedReply, WorkerError> {
    let mut decision = None;
    let mut confidence = None;
    let mut rationale = Vec::new();

    for line in text.lines().map(str::trim) {
        if let Some(rest) = strip_prefix_ci(line, "DECISION:") {
            if decision.is_none() && !rest.trim().is_empty() {
                decision = Some(rest.trim().to_owned());
            }
        } else if let Some(rest) = strip_prefix_ci(line, "CONFIDENCE:") {
            confidence = rest.trim().parse::<f32>().ok().filter(|c| c.is_finite());
        } else if let Some(rest) = line.strip_prefix("- ") {
            let rest = rest.trim();
            if !rest.is_empty() {
                rationale.push(rest.to_owned());
            }
        }
    }

    let decision = decision.ok_or_else(|| WorkerError::Malformed("reply has no DECISION line".into()))?;
    Ok(ParsedReply { decision, confidence, rationale })
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &line[prefix.len()..])
}

/// Confidence for a reply that did not state one.
pub fn fallback_confidence(text: &str) -> f32 {
    let lower = text.to_lowercase();
    if lower.contains("error") || lower.contains("failed") {
        0.3
    } else if text.len() > 50 {
        0.8
    } else {
        0.5
    }
}

/// Pad with the decision summary or truncate so the rationale fits 3..=7 lines.
fn fit_rationale(mut lines: Vec<String>, decision: &str, spec: Specialization) -> Vec<String> {
    lines.truncate(RATIONALE_MAX);
    let fillers = [
        format!("{spec} proposes '{decision}'"),
        "no further rationale given".to_owned(),
        "reply parsed from backend output".to_owned(),
    ];
    let mut fillers = fillers.into_iter();
    while lines.len() < RATIONALE_MIN {
        match fillers.next() {
            Some(f) => lines.push(f),
            None => break,
        }
    }
    lines
}

#[async_trait::async_trait]
impl ReasoningWorker for LlmWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    fn specialization(&self) -> Specialization {
        self.spec
    }

    async fn propose(&self, ctx: &TaskContext) -> Result<Proposal, WorkerError> {
        let response = self.provider.complete(self.request(ctx)).await?;
        tracing::debug!(
            worker = %self.id,
            provider = self.provider.name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "backend replied"
        );

        let parsed = parse_reply(&response.content)?;
        let confidence = parsed
            .confidence
            .unwrap_or_else(|| fallback_confidence(&response.content));
        let rationale = fit_rationale(parsed.rationale, &parsed.decision, self.spec);
        Proposal::new(self.id.clone(), parsed.decision.into(), confidence, rationale)
    }
}
