//! Plan-revision oracle backed by the Gemini `generateContent` API.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::OracleConfig;
use crate::ports::{PlanOracle, PlanRevision, RevisionRequest};

const GRAMMAR_GUIDE: &str = "\
A plan is plain text with one phase per line:
  PhaseNumber \"Goal\" \"Hypothesis\" N \"Param1\" .. \"ParamN\" \"Min1\" .. \"MinN\" \"Max1\" .. \"MaxN\" NumTrials
PhaseNumber, N and NumTrials are bare integers; every other field is double-quoted.
N is between 1 and 3. Phase numbers start at 0 and follow line order.
Integer parameters take integer bounds such as \"2\"; size parameters take a magnitude
and unit such as \"32kB\" and are swept in powers of two. Byte units (B, kB, MB, GB)
may differ between min and max, e.g. \"128kB\" to \"4MB\"; any other unit must match.
Only sweep parameters whose global min and max differ, and keep bounds within them.";

pub struct GeminiOracle {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct OracleReply {
    plan: String,
    #[serde(default)]
    justification: String,
}

impl GeminiOracle {
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("oracle API key variable {} is not set", config.api_key_env))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

impl PlanOracle for GeminiOracle {
    fn revise(&mut self, request: &RevisionRequest) -> Result<PlanRevision> {
        let prompt = build_prompt(request)?;
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" }
        });
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        debug!(url = %url, prompt_bytes = prompt.len(), "sending revision request");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| anyhow!("failed to reach oracle: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(anyhow!("oracle API error: {} - {}", status, text));
        }
        let payload: Value = response
            .json()
            .map_err(|e| anyhow!("failed to decode oracle response: {}", e))?;
        let text = response_text(&payload)?;
        let revision = decode_reply(&text)?;
        info!(
            model = %self.model,
            trigger = ?request.trigger,
            plan_lines = revision.plan.lines().filter(|l| !l.trim().is_empty()).count(),
            "oracle returned a plan"
        );
        Ok(revision)
    }
}

pub fn build_prompt(request: &RevisionRequest) -> Result<String> {
    let context = serde_json::to_string_pretty(request)?;
    Ok(format!(
        "You plan design-space exploration experiments for a cycle-accurate CPU simulator.\n\n\
         {grammar}\n\n\
         Request: {instruction}\n\
         Phases before index {from} have already been entered and must stay as they are.\n\n\
         Experiment context (JSON):\n{context}\n\n\
         Answer with a JSON object {{\"plan\": \"<full plan text>\", \"justification\": \"<why>\"}}.",
        grammar = GRAMMAR_GUIDE,
        instruction = request.instruction,
        from = request.revise_from,
        context = context,
    ))
}

fn response_text(payload: &Value) -> Result<String> {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("oracle response has no candidate content"))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        return Err(anyhow!("oracle response text is empty"));
    }
    Ok(text)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

pub fn decode_reply(text: &str) -> Result<PlanRevision> {
    let reply: OracleReply = serde_json::from_str(strip_code_fence(text))
        .context("oracle reply is not a {plan, justification} object")?;
    Ok(PlanRevision {
        plan: reply.plan,
        justification: reply.justification,
    })
}
