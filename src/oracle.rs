//! Classification oracle abstraction and implementations.
//!
//! Defines the [`Oracle`] trait consumed by the ingestion pipeline and
//! retrieval paths, and two implementations:
//! - **[`DisabledOracle`]**: every call fails; the pipeline degrades to
//!   catch-all classification.
//! - **[`ChatCompletionsOracle`]**: calls an OpenAI-compatible
//!   `/chat/completions` endpoint with images attached as base64 data URLs.
//!
//! Also provides the lenient parsers that turn free-form model output into
//! a category from the configured set.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Result, StashError};

/// Maximum number of tags kept per record.
pub const MAX_TAGS: usize = 8;

/// External multimodal/text model used for classification and moderation.
///
/// `provider` selects the model/provider for the call; it is resolved by the
/// caller from configuration and conversation context.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Free-text description of the image content.
    async fn describe_image(&self, provider: &str, image: &[u8]) -> Result<String>;

    /// Raw model answer naming the emotion of `text`. Callers map it onto
    /// the category set with [`match_category`].
    async fn classify_text(&self, provider: &str, text: &str, categories: &[String])
        -> Result<String>;

    /// Raw category+tags payload for an image, ideally
    /// `{"category": "...", "tags": [...]}`. Parsed with [`parse_classification`].
    async fn classify_image(
        &self,
        provider: &str,
        image: &[u8],
        categories: &[String],
    ) -> Result<String>;

    /// Whether the image satisfies the moderation criterion.
    async fn moderate(&self, provider: &str, image: &[u8], criterion: &str) -> Result<bool>;
}

/// Instantiates the oracle selected by the configuration.
pub fn create_oracle(config: &Config) -> anyhow::Result<Arc<dyn Oracle>> {
    if config.oracle_enabled() {
        Ok(Arc::new(ChatCompletionsOracle::new(config)?))
    } else {
        Ok(Arc::new(DisabledOracle))
    }
}

// ============ Parsing ============

/// First configured category whose name occurs in `text`, else the catch-all.
pub fn match_category(text: &str, categories: &[String], catch_all: &str) -> String {
    categories
        .iter()
        .find(|c| text.contains(c.as_str()))
        .cloned()
        .unwrap_or_else(|| catch_all.to_string())
}

/// Parses a category+tags payload.
///
/// Well-formed JSON (optionally wrapped in prose or code fences) yields its
/// category, coerced into the configured set, and up to [`MAX_TAGS`] tags;
/// a non-list `tags` value becomes empty. Malformed payloads fall back to a
/// substring search for any category name.
pub fn parse_classification(
    raw: &str,
    categories: &[String],
    catch_all: &str,
) -> (String, Vec<String>) {
    let Some(data) = extract_json_object(raw) else {
        return (match_category(raw, categories, catch_all), Vec::new());
    };

    let category = data
        .get("category")
        .and_then(|c| c.as_str())
        .map(str::trim)
        .filter(|c| categories.iter().any(|known| known.as_str() == *c))
        .unwrap_or(catch_all)
        .to_string();

    let tags = match data.get("tags") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|t| match t {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .take(MAX_TAGS)
            .collect(),
        _ => Vec::new(),
    };

    (category, tags)
}

fn extract_json_object(raw: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let trimmed = raw.trim();
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(trimmed) {
        return Some(map);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&trimmed[start..=end]) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Interprets a yes/no moderation answer. Anything not affirmative is a veto.
pub fn parse_verdict(answer: &str) -> bool {
    let a = answer.trim().to_lowercase();
    ["yes", "true", "pass", "是", "通过", "合规"]
        .iter()
        .any(|p| a.starts_with(p))
}

// ============ Prompts ============

fn category_list(categories: &[String]) -> String {
    categories.join("、")
}

fn classify_image_prompt(categories: &[String]) -> String {
    format!(
        "请将这张表情包图片按情绪类别进行分类，类别从: {} 中选择一个，并给出3到5个标签词，只返回JSON，如 {{\"category\":\"{}\",\"tags\":[\"可爱\",\"微笑\"]}}.",
        category_list(categories),
        categories.first().map(String::as_str).unwrap_or_default()
    )
}

fn classify_text_prompt(text: &str, categories: &[String]) -> String {
    format!(
        "请基于这段文本的情绪选择一个类别: {}。只返回类别名称。文本: {}",
        category_list(categories),
        text
    )
}

const DESCRIBE_PROMPT: &str = "请用一句话客观描述这张图片的内容，包括人物、动作、表情和图中文字。";

fn moderation_prompt(criterion: &str) -> String {
    format!(
        "请判断这张图片是否满足以下要求: {}。满足则只回答\"是\"，否则只回答\"否\"。",
        criterion
    )
}

// ============ Disabled Oracle ============

/// Oracle used when no endpoint is configured. Every call fails.
pub struct DisabledOracle;

#[async_trait]
impl Oracle for DisabledOracle {
    async fn describe_image(&self, _provider: &str, _image: &[u8]) -> Result<String> {
        Err(StashError::oracle("oracle is disabled"))
    }

    async fn classify_text(
        &self,
        _provider: &str,
        _text: &str,
        _categories: &[String],
    ) -> Result<String> {
        Err(StashError::oracle("oracle is disabled"))
    }

    async fn classify_image(
        &self,
        _provider: &str,
        _image: &[u8],
        _categories: &[String],
    ) -> Result<String> {
        Err(StashError::oracle("oracle is disabled"))
    }

    async fn moderate(&self, _provider: &str, _image: &[u8], _criterion: &str) -> Result<bool> {
        Err(StashError::oracle("oracle is disabled"))
    }
}

// ============ Chat Completions Oracle ============

/// Oracle backed by an OpenAI-compatible chat completions API.
///
/// The provider id is sent as the `model` field. The API key is read from the
/// environment variable named by `oracle_api_key_env`; when unset, requests
/// are sent without authorization (useful for local gateways).
pub struct ChatCompletionsOracle {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl ChatCompletionsOracle {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.oracle_timeout_secs))
            .build()?;
        let endpoint = format!(
            "{}/chat/completions",
            config.oracle_base_url.trim_end_matches('/')
        );
        Ok(Self {
            client,
            endpoint,
            api_key: std::env::var(&config.oracle_api_key_env).ok(),
            max_retries: config.oracle_max_retries,
        })
    }

    async fn complete(&self, model: &str, prompt: &str, image: Option<&[u8]>) -> Result<String> {
        let mut content = vec![serde_json::json!({ "type": "text", "text": prompt })];
        if let Some(bytes) = image {
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": { "url": data_url(bytes) },
            }));
        }
        let body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": content }],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value =
                            response.json().await.map_err(StashError::oracle)?;
                        return parse_completion(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(StashError::oracle(format!(
                            "API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    return Err(StashError::oracle(format!(
                        "API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(StashError::oracle(e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| StashError::oracle("completion failed after retries")))
    }
}

#[async_trait]
impl Oracle for ChatCompletionsOracle {
    async fn describe_image(&self, provider: &str, image: &[u8]) -> Result<String> {
        self.complete(provider, DESCRIBE_PROMPT, Some(image)).await
    }

    async fn classify_text(
        &self,
        provider: &str,
        text: &str,
        categories: &[String],
    ) -> Result<String> {
        self.complete(provider, &classify_text_prompt(text, categories), None)
            .await
    }

    async fn classify_image(
        &self,
        provider: &str,
        image: &[u8],
        categories: &[String],
    ) -> Result<String> {
        self.complete(provider, &classify_image_prompt(categories), Some(image))
            .await
    }

    async fn moderate(&self, provider: &str, image: &[u8], criterion: &str) -> Result<bool> {
        let answer = self
            .complete(provider, &moderation_prompt(criterion), Some(image))
            .await?;
        Ok(parse_verdict(&answer))
    }
}

/// Extracts `choices[0].message.content` from a completion response.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| StashError::oracle("invalid completion response: missing content"))
}

fn data_url(bytes: &[u8]) -> String {
    let ext = crate::store::extension_for(None, bytes);
    let mime = match ext.as_str() {
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        ".bmp" => "image/bmp",
        _ => "image/jpeg",
    };
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}
