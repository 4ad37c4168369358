use crate::json::extract_json;
use agent_core::{AgentError, AgentResult, ChatModel, ChatOptions, ChatResponse, LlmConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Provider-agnostic chat client.
///
/// One shared reqwest client (one connection pool) serves every call. On a
/// context-window overflow the longest non-system message is trimmed by half
/// and the request retried exactly once.
#[derive(Clone)]
pub struct LlmClient {
    config: LlmConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OpenAiMessage,
    #[serde(default)]
    prompt_eval_count: i64,
    #[serde(default)]
    eval_count: i64,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, client }
    }

    /// Reuse an existing pool (e.g. shared with collectors).
    pub fn with_client(config: LlmConfig, client: Client) -> Self {
        Self { config, client }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn send(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> AgentResult<ChatResponse> {
        let model = options.model.as_deref().unwrap_or(&self.config.model);
        let temperature = options.temperature.unwrap_or(self.config.temperature);

        match self.config.provider.as_str() {
            "openai" => self.send_openai(model, temperature, system, user, options).await,
            _ => self.send_ollama(model, temperature, system, user, options).await,
        }
    }

    async fn send_openai(
        &self,
        model: &str,
        temperature: f64,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> AgentResult<ChatResponse> {
        let url = format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'));
        let mut body = json!({
            "model": model,
            "temperature": temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::LlmTransient(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_http_error(status.as_u16(), &text));
        }

        let parsed: OpenAiResponse = serde_json::from_str(&text)
            .map_err(|e| AgentError::LlmFatal(format!("bad completion payload: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::LlmFatal("completion had no choices".to_string()))?;
        let usage = parsed.usage.unwrap_or_default();

        Ok(ChatResponse {
            content: choice.message.content,
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
        })
    }

    async fn send_ollama(
        &self,
        model: &str,
        temperature: f64,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> AgentResult<ChatResponse> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let mut opts = json!({
            "temperature": temperature,
            "num_ctx": self.config.context_size,
        });
        if let Some(max_tokens) = options.max_tokens {
            opts["num_predict"] = json!(max_tokens);
        }
        let body = json!({
            "model": model,
            "stream": false,
            "options": opts,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::LlmTransient(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_http_error(status.as_u16(), &text));
        }

        let parsed: OllamaResponse = serde_json::from_str(&text)
            .map_err(|e| AgentError::LlmFatal(format!("bad chat payload: {e}")))?;

        Ok(ChatResponse {
            content: parsed.message.content,
            tokens_in: parsed.prompt_eval_count,
            tokens_out: parsed.eval_count,
        })
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn chat(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
    ) -> AgentResult<ChatResponse> {
        let mut response = match self.send(system, user, options).await {
            Ok(r) => r,
            Err(e) if is_context_overflow(&e) => {
                let trimmed = trim_middle_out(user, user.chars().count() / 2);
                tracing::warn!(
                    "context overflow from {} backend, retrying with trimmed prompt ({} -> {} chars)",
                    self.config.provider,
                    user.chars().count(),
                    trimmed.chars().count()
                );
                self.send(system, &trimmed, options).await?
            }
            Err(e) => return Err(e),
        };

        if options.expect_json {
            response.content = extract_json(&response.content)?;
        }
        Ok(response)
    }
}

fn map_transport_error(e: reqwest::Error) -> AgentError {
    AgentError::LlmTransient(e.to_string())
}

fn classify_http_error(status: u16, body: &str) -> AgentError {
    let lowered = body.to_lowercase();
    let overflow = lowered.contains("context length")
        || lowered.contains("context window")
        || lowered.contains("maximum context")
        || lowered.contains("too many tokens");
    if overflow {
        // Distinct message so the retry path can recognize it
        return AgentError::LlmFatal(format!("context overflow ({status}): {body}"));
    }
    if status == 429 || status >= 500 {
        AgentError::LlmTransient(format!("HTTP {status}: {body}"))
    } else {
        AgentError::LlmFatal(format!("HTTP {status}: {body}"))
    }
}

fn is_context_overflow(e: &AgentError) -> bool {
    matches!(e, AgentError::LlmFatal(msg) if msg.starts_with("context overflow"))
}

/// Keep the head and tail of a long prompt, dropping the middle down to
/// roughly `target_chars`. The extremes carry the instructions and the most
/// recent data; the middle is the safest cut.
fn trim_middle_out(text: &str, target_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= target_chars || target_chars < 16 {
        return text.to_string();
    }
    let keep = target_chars / 2;
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{head}\n...[trimmed]...\n{tail}")
}
