//! OpenAI-compatible chat-completions client used as an auxiliary extractor.

use std::time::Duration;

use chatsift_core::ExtractedFields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::debug;

use crate::auxiliary::{AuxiliaryError, AuxiliaryExtractor};

pub const DEFAULT_BASE_URL: &str = "https://api.novita.ai/v3/openai";
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-v3-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 512;

const SYSTEM_PROMPT: &str = "Ты помощник, который извлекает структурированную информацию из текста. \
Отвечай только JSON-объектом без пояснений.";

/// Connection settings for [`LlmExtractor`].
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Asks a chat model to pull date, phone, address and name out of a message.
///
/// The trait entry point is blocking: it drives the request on `runtime` and
/// must be called from outside any async context (the pipeline's worker
/// threads). Async callers use [`LlmExtractor::extract_async`].
pub struct LlmExtractor {
    client: reqwest::Client,
    config: LlmConfig,
    runtime: Handle,
}

impl LlmExtractor {
    /// An empty API key yields [`AuxiliaryError::Unavailable`].
    pub fn new(mut config: LlmConfig, runtime: Handle) -> Result<Self, AuxiliaryError> {
        if config.api_key.trim().is_empty() {
            return Err(AuxiliaryError::Unavailable("no API key configured".into()));
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            runtime,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub async fn extract_async(&self, raw_text: &str) -> Result<ExtractedFields, AuxiliaryError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let prompt = build_prompt(raw_text);
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        debug!(url = %url, model = %self.config.model, "requesting extraction");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuxiliaryError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = resp.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AuxiliaryError::Parse("reply has no content".into()))?;
        parse_reply(&content)
    }
}

impl AuxiliaryExtractor for LlmExtractor {
    fn name(&self) -> &str {
        "llm"
    }

    fn extract(&self, raw_text: &str) -> Result<ExtractedFields, AuxiliaryError> {
        self.runtime.block_on(self.extract_async(raw_text))
    }
}

fn build_prompt(raw_text: &str) -> String {
    format!(
        "Извлеки из текста следующую информацию:\n\
         - date: дата (в формате ГГГГ-ММ-ДД)\n\
         - phone: номер телефона\n\
         - address: адрес\n\
         - name: имя человека\n\n\
         Верни JSON-объект с ключами date, phone, address, name. \
         Если информация не найдена, используй null.\n\n\
         Текст:\n{raw_text}"
    )
}

/// Decode the model's reply into fields.
///
/// Tolerates a surrounding Markdown code fence. Null and blank values are
/// omitted; numbers and booleans are stringified; string arrays are joined
/// with `", "`.
pub fn parse_reply(content: &str) -> Result<ExtractedFields, AuxiliaryError> {
    let body = strip_code_fence(content);
    let value: Value =
        serde_json::from_str(body).map_err(|e| AuxiliaryError::Parse(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(AuxiliaryError::Parse("reply is not a JSON object".into()));
    };

    let mut fields = ExtractedFields::new();
    for (key, value) in map {
        let text = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(items) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
            Value::Null | Value::Object(_) => continue,
        };
        fields.set(&key.trim().to_lowercase(), &text);
    }
    Ok(fields)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let fields =
            parse_reply(r#"{"date": "2024-05-16", "phone": null, "name": "Анна"}"#).unwrap();
        assert_eq!(fields.get("date"), Some("2024-05-16"));
        assert_eq!(fields.get("name"), Some("Анна"));
        assert!(!fields.contains("phone"));
    }

    #[test]
    fn strips_code_fence() {
        let reply = "```json\n{\"address\": \"ул. Ленина, 1\"}\n```";
        let fields = parse_reply(reply).unwrap();
        assert_eq!(fields.get("address"), Some("ул. Ленина, 1"));
    }

    #[test]
    fn stringifies_scalars_and_arrays() {
        let fields = parse_reply(r#"{"phone": ["+7 999", "8 800"], "price": 1500}"#).unwrap();
        assert_eq!(fields.get("phone"), Some("+7 999, 8 800"));
        assert_eq!(fields.get("price"), Some("1500"));
    }

    #[test]
    fn blank_values_omitted() {
        let fields = parse_reply(r#"{"date": "  ", "name": ""}"#).unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn non_object_reply_is_parse_error() {
        assert!(matches!(
            parse_reply("I could not find anything"),
            Err(AuxiliaryError::Parse(_))
        ));
        assert!(matches!(parse_reply("[1, 2]"), Err(AuxiliaryError::Parse(_))));
    }

    #[test]
    fn prompt_embeds_text() {
        let prompt = build_prompt("Дата: 16.05.2008");
        assert!(prompt.contains("Дата: 16.05.2008"));
        assert!(prompt.contains("date, phone, address, name"));
    }

    #[test]
    fn missing_api_key_is_unavailable() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = LlmExtractor::new(LlmConfig::new("  "), rt.handle().clone());
        assert!(matches!(result, Err(AuxiliaryError::Unavailable(_))));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let mut config = LlmConfig::new("key");
        config.base_url = "http://localhost:8080/v1/".into();
        let llm = LlmExtractor::new(config, rt.handle().clone()).unwrap();
        assert_eq!(llm.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn unreachable_endpoint_is_an_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let mut config = LlmConfig::new("key");
        config.base_url = "http://127.0.0.1:9".into();
        config.timeout = Duration::from_secs(2);
        let llm = LlmExtractor::new(config, rt.handle().clone()).unwrap();
        assert!(llm.extract("Дата: 16.05.2008").is_err());
    }
}
