//! Concurrent fan-out of prompts to an LLM backend.
//!
//! Every task in a batch runs at the same time under its own timeout. A
//! task's reply must contain a JSON object with the fields its agent type
//! requires. Failures stay local to their task; the batch always returns
//! one result per task, in input order.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::AgentsConfig;
use crate::error::{GuardrailError, Result};

/// Version header sent to the Messages API.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Longest backend error body echoed into an error message.
const MAX_ERROR_BODY: usize = 500;

/// The kinds of agent a batch can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    Research,
    SecurityScan,
    Documentation,
    Planning,
    CodeReview,
}

impl AgentType {
    pub const ALL: [AgentType; 5] = [
        AgentType::Research,
        AgentType::SecurityScan,
        AgentType::Documentation,
        AgentType::Planning,
        AgentType::CodeReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Research => "research",
            AgentType::SecurityScan => "security-scan",
            AgentType::Documentation => "documentation",
            AgentType::Planning => "planning",
            AgentType::CodeReview => "code-review",
        }
    }

    /// Top-level fields a reply must contain.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            AgentType::Research => &["summary", "findings", "sources"],
            AgentType::SecurityScan => &["vulnerabilities", "riskLevel", "recommendations"],
            AgentType::Documentation => &["title", "sections"],
            AgentType::Planning => &["goal", "steps", "risks"],
            AgentType::CodeReview => &["summary", "issues", "approved"],
        }
    }

    fn role(&self) -> &'static str {
        match self {
            AgentType::Research => "a research assistant who gathers and summarizes technical information",
            AgentType::SecurityScan => "a security reviewer who looks for vulnerabilities in code and SQL",
            AgentType::Documentation => "a technical writer who produces developer documentation",
            AgentType::Planning => "an engineering planner who breaks work into ordered steps",
            AgentType::CodeReview => "a code reviewer who checks changes for bugs and style problems",
        }
    }

    /// System prompt asking for a JSON-only reply with the required fields.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are {}. Respond with a single JSON object and nothing else. \
             The object must contain these top-level fields: {}.",
            self.role(),
            self.required_fields().join(", ")
        )
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTask {
    pub agent_type: AgentType,
    pub prompt: String,
    pub timeout: Duration,
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl AgentResult {
    fn failed(agent_type: AgentType, error: String, elapsed: Duration, timed_out: bool) -> Self {
        Self {
            agent_type,
            success: false,
            response: None,
            error: Some(error),
            elapsed_ms: elapsed.as_millis() as u64,
            timed_out,
        }
    }
}

/// Wire form of a batch request: `{ "agents": [{ "type", "prompt", "timeout" }] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub agents: Vec<BatchItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchItem {
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub prompt: String,
    /// Per-task timeout in milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Wire form of a batch response.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub agents: Vec<AgentResult>,
}

impl BatchResponse {
    pub fn all_succeeded(&self) -> bool {
        self.agents.iter().all(|a| a.success)
    }
}

impl BatchRequest {
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Convert to tasks, filling in `default_timeout_ms` where a task has none.
    pub fn into_tasks(self, default_timeout_ms: u64) -> Result<Vec<AgentTask>> {
        if self.agents.is_empty() {
            return Err(GuardrailError::InvalidRequest(
                "the agents list is empty".to_string(),
            ));
        }

        self.agents
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                if item.prompt.trim().is_empty() {
                    return Err(GuardrailError::InvalidRequest(format!(
                        "agents[{}] ({}) has an empty prompt",
                        i, item.agent_type
                    )));
                }
                let timeout_ms = match item.timeout {
                    Some(0) | None => default_timeout_ms,
                    Some(ms) => ms,
                };
                Ok(AgentTask {
                    agent_type: item.agent_type,
                    prompt: item.prompt,
                    timeout: Duration::from_millis(timeout_ms),
                })
            })
            .collect()
    }
}

/// Something that turns a prompt into reply text.
pub trait AgentBackend {
    fn complete(
        &self,
        agent_type: AgentType,
        prompt: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Run every task concurrently and gather one result per task, in order.
///
/// Returns only after every task has settled. A task that exceeds its
/// timeout is dropped locally; the upstream request is not cancelled.
pub async fn run_batch<B: AgentBackend>(backend: &B, tasks: Vec<AgentTask>) -> Vec<AgentResult> {
    log::info!("Dispatching agent batch; tasks={}", tasks.len());
    join_all(tasks.into_iter().map(|task| run_task(backend, task))).await
}

/// Parse a JSON request, run it, and build the response.
pub async fn handle_request<B: AgentBackend>(
    backend: &B,
    request: BatchRequest,
    default_timeout_ms: u64,
) -> Result<BatchResponse> {
    let tasks = request.into_tasks(default_timeout_ms)?;
    Ok(BatchResponse {
        agents: run_batch(backend, tasks).await,
    })
}

async fn run_task<B: AgentBackend>(backend: &B, task: AgentTask) -> AgentResult {
    let start = Instant::now();
    let reply = tokio::time::timeout(task.timeout, backend.complete(task.agent_type, &task.prompt)).await;
    let elapsed = start.elapsed();

    let result = match reply {
        Err(_) => AgentResult::failed(
            task.agent_type,
            format!("timed out after {} ms", task.timeout.as_millis()),
            elapsed,
            true,
        ),
        Ok(Err(e)) => AgentResult::failed(task.agent_type, e.to_string(), elapsed, false),
        Ok(Ok(text)) => match parse_reply(task.agent_type, &text) {
            Ok(value) => AgentResult {
                agent_type: task.agent_type,
                success: true,
                response: Some(value),
                error: None,
                elapsed_ms: elapsed.as_millis() as u64,
                timed_out: false,
            },
            Err(msg) => AgentResult::failed(task.agent_type, msg, elapsed, false),
        },
    };

    if result.success {
        log::info!(
            "Agent task succeeded; type={}, elapsed_ms={}",
            result.agent_type,
            result.elapsed_ms
        );
    } else {
        log::warn!(
            "Agent task failed; type={}, elapsed_ms={}, error={}",
            result.agent_type,
            result.elapsed_ms,
            result.error.as_deref().unwrap_or_default()
        );
    }
    result
}

/// Extract the JSON object from a reply and check its required fields.
pub fn parse_reply(agent_type: AgentType, text: &str) -> std::result::Result<Value, String> {
    let value = extract_json(text).ok_or_else(|| "response did not contain valid JSON".to_string())?;
    check_required_fields(agent_type, &value)?;
    Ok(value)
}

/// Find a JSON value in free text.
///
/// Tries, in order: the whole text, the first fenced code block, and the
/// span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str(block.trim()) {
            return Some(v);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Body of the first ```` ``` ```` fenced block, without its language tag.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

fn check_required_fields(agent_type: AgentType, value: &Value) -> std::result::Result<(), String> {
    let Some(object) = value.as_object() else {
        return Err(format!("{} response must be a JSON object", agent_type));
    };
    let missing: Vec<&str> = agent_type
        .required_fields()
        .iter()
        .copied()
        .filter(|f| !object.contains_key(*f))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "{} response is missing required field(s): {}",
            agent_type,
            missing.join(", ")
        ))
    }
}

// ── HTTP backend ──

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: String,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Backend speaking the Anthropic Messages API over HTTPS.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    api_key: String,
}

impl fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBackend")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl HttpBackend {
    /// Build from config. Fails when no API key is configured.
    pub fn new(config: &AgentsConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            GuardrailError::ConfigError(
                "ANTHROPIC_API_KEY is not set; the agent backend needs an API key".to_string(),
            )
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_key,
        })
    }
}

impl AgentBackend for HttpBackend {
    async fn complete(&self, agent_type: AgentType, prompt: &str) -> Result<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: agent_type.system_prompt(),
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        log::debug!("Sending agent request; type={}, model={}", agent_type, self.model);
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(GuardrailError::BackendError(format!("HTTP {}: {}", status, snippet)));
        }

        let parsed: MessagesResponse = response.json().await?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(GuardrailError::BackendError(
                "backend returned no text content".to_string(),
            ));
        }
        Ok(text)
    }
}
