//! Text generation backend: the [`TextGenerator`] seam, bounded retry, and a
//! blocking chat-completion client.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

/// MiniMax reports per-minute rate limiting with this `base_resp` code.
const RATE_LIMIT_CODE: i64 = 1002;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// Worth another attempt: timeouts, dropped connections, throttling.
    #[error("transient: {0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

pub trait TextGenerator {
    fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError>;
}

// ── Retry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl From<&GenerationConfig> for RetryPolicy {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff(),
        }
    }
}

/// Call `generator` until it succeeds, fails fatally, or `policy` runs out.
pub fn generate_with_retry(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    policy: &RetryPolicy,
) -> Result<String> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match generator.generate(request) {
            Ok(text) => {
                debug!(attempt, chars = text.chars().count(), "generation succeeded");
                return Ok(text);
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(attempt, max_attempts = attempts, error = %e, "generation failed, retrying");
                std::thread::sleep(policy.backoff);
                attempt += 1;
            }
            Err(e) => {
                warn!(attempt, error = %e, "generation failed");
                return Err(Error::Upstream(e));
            }
        }
    }
}

// ── Chat-completion client ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    base_resp: Option<BaseResp>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct BaseResp {
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}

pub struct ChatClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatClient {
    /// `None` when the key or group id is absent from the environment.
    pub fn from_env(config: &GenerationConfig) -> Result<Option<Self>> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let (Some(api_key), Some(group_id)) = (var(&config.api_key_env), var(&config.group_id_env))
        else {
            info!(
                key = %config.api_key_env,
                group = %config.group_id_env,
                "generation credentials not set, using mock output"
            );
            return Ok(None);
        };
        let client = Self::new(config, api_key)?;
        let shown: String = group_id.chars().take(8).collect();
        info!(group = %shown, model = %client.model, "generation client ready");
        Ok(Some(client))
    }

    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/text/chatcompletion_v2", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        })
    }
}

impl TextGenerator for ChatClient {
    fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(classify_send_error)?;

        let status = response.status();
        if let Some(err) = classify_status(status) {
            return Err(err);
        }

        let reply: ChatResponse = response
            .json()
            .map_err(|e| GenerationError::Fatal(format!("malformed response body: {e}")))?;
        reply_content(reply)
    }
}

fn classify_send_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() || e.is_connect() {
        GenerationError::Transient(e.to_string())
    } else {
        GenerationError::Fatal(e.to_string())
    }
}

/// `None` for success statuses.
fn classify_status(status: StatusCode) -> Option<GenerationError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(GenerationError::Transient(format!("HTTP {status}")))
    } else {
        Some(GenerationError::Fatal(format!("HTTP {status}")))
    }
}

fn reply_content(reply: ChatResponse) -> std::result::Result<String, GenerationError> {
    if let Some(base) = reply.base_resp
        && base.status_code != 0
    {
        let msg = format!("API error {}: {}", base.status_code, base.status_msg);
        return Err(if base.status_code == RATE_LIMIT_CODE {
            GenerationError::Transient(msg)
        } else {
            GenerationError::Fatal(msg)
        });
    }
    reply
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| GenerationError::Fatal("response has no choices".to_string()))
}

// ── Scripted generator (tests) ───────────────────────────────────────────

/// Replays a fixed queue of results and records every request it saw.
#[cfg(test)]
pub(crate) struct ScriptedGenerator {
    script: std::sync::Mutex<std::collections::VecDeque<std::result::Result<String, GenerationError>>>,
    seen: std::sync::Mutex<Vec<GenerationRequest>>,
}

#[cfg(test)]
impl ScriptedGenerator {
    pub(crate) fn new(
        script: impl IntoIterator<Item = std::result::Result<String, GenerationError>>,
    ) -> Self {
        Self {
            script: std::sync::Mutex::new(script.into_iter().collect()),
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn replying(text: &str) -> Self {
        Self::new([Ok(text.to_string())])
    }

    pub(crate) fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        self.seen.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Fatal("script exhausted".to_string())))
    }
}
