//! HTTP classifier speaking the OpenAI-compatible chat-completions API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::prompts;
use super::{ClassificationResult, ClassificationStatus, Classifier, ClassifyError};
use crate::extract::{ContentDescriptor, DescriptorKind};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Classifier connection settings.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Client-side rate limit: requests allowed per sliding minute.
    pub max_requests_per_minute: usize,
}

impl ClassifierConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 500,
            timeout: Duration::from_secs(30),
            max_requests_per_minute: 20,
        }
    }

    /// Load credentials from the environment, reading `.env` if present.
    /// `OPENAI_API_KEY` is required; `OPENAI_BASE_URL` and `LLM_MODEL`
    /// override the defaults.
    pub fn from_env() -> Result<Self, ClassifyError> {
        dotenvy::dotenv().ok();

        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or(ClassifyError::Credentials)?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            if !base_url.is_empty() {
                config.base_url = base_url;
            }
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            if !model.is_empty() {
                config.model = model;
            }
        }
        Ok(config)
    }
}

/// Sliding-window request limiter, keyed by model so several engines can
/// share one client without starving each other.
struct SlidingWindow {
    requests: DashMap<String, Vec<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl SlidingWindow {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Record a request if the window has room, returning whether it may
    /// proceed.
    fn check_and_record(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.requests.entry(key.to_string()).or_default();
        let timestamps = entry.value_mut();

        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            warn!(
                key,
                requests = timestamps.len(),
                max = self.max_requests,
                "classifier rate limit window is full"
            );
            return false;
        }

        timestamps.push(now);
        true
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
struct ContentPart {
    #[serde(rename = "type")]
    part_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<ImageUrl>,
}

impl ContentPart {
    fn text(text: String) -> Self {
        Self {
            part_type: "text".to_string(),
            text: Some(text),
            image_url: None,
        }
    }

    fn image(mime: &str, base64: &str) -> Self {
        Self {
            part_type: "image_url".to_string(),
            text: None,
            image_url: Some(ImageUrl {
                url: format!("data:{mime};base64,{base64}"),
            }),
        }
    }
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Shape the oracle is asked to answer in. Missing confidence defaults to
/// a neutral 0.5, mirroring lenient parsing of model output.
#[derive(Deserialize)]
struct RawClassification {
    #[serde(default)]
    folder_name: String,
    #[serde(default)]
    category: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

fn default_confidence() -> f64 {
    0.5
}

/// OpenAI-compatible classification oracle.
pub struct HttpClassifier {
    client: reqwest::Client,
    config: ClassifierConfig,
    limiter: SlidingWindow,
}

impl HttpClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, ClassifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ClassifyError::Connection(e.to_string()))?;

        let limiter = SlidingWindow::new(config.max_requests_per_minute, Duration::from_secs(60));

        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    /// Build a classifier from environment credentials.
    pub fn from_env() -> Result<Self, ClassifyError> {
        Self::new(ClassifierConfig::from_env()?)
    }

    fn build_message(&self, descriptor: &ContentDescriptor) -> ChatMessage {
        let file_type = descriptor.extension.as_deref().unwrap_or("unknown");

        let content = match &descriptor.kind {
            DescriptorKind::Text(preview) => vec![ContentPart::text(
                prompts::build_classification_prompt(
                    &descriptor.file_name,
                    file_type,
                    descriptor.size,
                    preview,
                ),
            )],
            DescriptorKind::Image { mime, base64 } => vec![
                ContentPart::text(prompts::build_vision_prompt(&descriptor.file_name, file_type)),
                ContentPart::image(mime, base64),
            ],
            DescriptorKind::Opaque => vec![ContentPart::text(
                prompts::build_classification_prompt(
                    &descriptor.file_name,
                    file_type,
                    descriptor.size,
                    "",
                ),
            )],
        };

        ChatMessage {
            role: "user".to_string(),
            content,
        }
    }

    async fn send(&self, message: ChatMessage) -> Result<String, ClassifyError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![message],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifyError::Timeout
                } else {
                    ClassifyError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClassifyError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Connection(format!(
                "API error ({status}): {body}"
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifyError::Parse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ClassifyError::Parse("response contained no content".to_string()))
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        fingerprint: &str,
        descriptor: &ContentDescriptor,
    ) -> Result<ClassificationResult, ClassifyError> {
        if !self.limiter.check_and_record(&self.config.model) {
            return Err(ClassifyError::RateLimited);
        }

        debug!(
            fingerprint,
            file = %descriptor.file_name,
            model = %self.config.model,
            "requesting classification"
        );

        let text = self.send(self.build_message(descriptor)).await?;
        parse_result(&text)
    }
}

/// Extract the JSON object from the oracle's answer, tolerating markdown
/// fences and surrounding prose.
fn parse_result(text: &str) -> Result<ClassificationResult, ClassifyError> {
    let start = text
        .find('{')
        .ok_or_else(|| ClassifyError::Parse(format!("no JSON object in: {text}")))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| ClassifyError::Parse(format!("unterminated JSON object in: {text}")))?;
    if end < start {
        return Err(ClassifyError::Parse(format!("malformed JSON in: {text}")));
    }

    let raw: RawClassification = serde_json::from_str(&text[start..=end])
        .map_err(|e| ClassifyError::Parse(e.to_string()))?;

    if raw.folder_name.is_empty() {
        return Err(ClassifyError::Parse(
            "response is missing folder_name".to_string(),
        ));
    }

    Ok(ClassificationResult {
        status: ClassificationStatus::Success,
        folder_name: raw.folder_name,
        category: raw.category,
        confidence: raw.confidence.clamp(0.0, 1.0),
        reason: (!raw.reason.is_empty()).then_some(raw.reason),
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let result = parse_result(
            r#"{"folder_name": "재무", "category": "문서", "confidence": 0.9, "reason": "청구서"}"#,
        )
        .unwrap();
        assert_eq!(result.folder_name, "재무");
        assert_eq!(result.category, "문서");
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.reason.as_deref(), Some("청구서"));
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "```json\n{\"folder_name\": \"영수증\", \"category\": \"문서\", \"confidence\": 0.8, \"reason\": \"ok\"}\n```";
        let result = parse_result(text).unwrap();
        assert_eq!(result.folder_name, "영수증");
    }

    #[test]
    fn test_parse_defaults_missing_confidence() {
        let result =
            parse_result(r#"{"folder_name": "회의록", "category": "문서"}"#).unwrap();
        assert_eq!(result.confidence, 0.5);
        assert!(result.reason.is_none());
    }

    #[test]
    fn test_parse_clamps_confidence() {
        let result = parse_result(r#"{"folder_name": "회의록", "confidence": 1.7}"#).unwrap();
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_parse_rejects_missing_folder_name() {
        assert!(matches!(
            parse_result(r#"{"category": "문서"}"#),
            Err(ClassifyError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(matches!(
            parse_result("I could not classify this file."),
            Err(ClassifyError::Parse(_))
        ));
    }

    #[test]
    fn test_limiter_allows_under_limit() {
        let limiter = SlidingWindow::new(3, Duration::from_secs(60));
        assert!(limiter.check_and_record("model"));
        assert!(limiter.check_and_record("model"));
        assert!(limiter.check_and_record("model"));
    }

    #[test]
    fn test_limiter_blocks_over_limit() {
        let limiter = SlidingWindow::new(2, Duration::from_secs(60));
        assert!(limiter.check_and_record("model"));
        assert!(limiter.check_and_record("model"));
        assert!(!limiter.check_and_record("model"));
    }

    #[test]
    fn test_limiter_is_per_key() {
        let limiter = SlidingWindow::new(1, Duration::from_secs(60));
        assert!(limiter.check_and_record("a"));
        assert!(limiter.check_and_record("b"));
        assert!(!limiter.check_and_record("a"));
    }
}
