//! OpenAI-compatible API access.
//!
//! The pipeline talks to the model through the [`ContentModel`] trait so the
//! orchestration can be exercised against an in-memory fake. [`OpenAiClient`]
//! is the real implementation: chat completions (optionally with an inline
//! image for vision models), image generation and image download.
//!
//! Retries are not done here; callers wrap these calls in a
//! [`Backoff`](crate::retry::Backoff) where the failure is worth retrying.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Timeout for plain downloads and other short external calls.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed for one chat completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub user: String,
    /// `data:` URL of an image to attach to the user message.
    pub image_data_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            user: user.into(),
            image_data_url: None,
            max_tokens: 1000,
            temperature: 0.7,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn image(mut self, data_url: impl Into<String>) -> Self {
        self.image_data_url = Some(data_url.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    pub fn presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }
}

/// Image generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
}

/// The model operations the pipeline depends on.
pub trait ContentModel {
    /// Run a chat completion and return the first choice's text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, Box<dyn Error>>;

    /// Generate one image and return where it can be fetched from
    /// (an `https://` URL or a `data:` URL).
    async fn generate_image(&self, request: &ImageRequest) -> Result<String, Box<dyn Error>>;

    /// Fetch the bytes behind a URL returned by [`ContentModel::generate_image`].
    async fn download(&self, url: &str) -> Result<Vec<u8>, Box<dyn Error>>;
}

// --- wire types ---

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    n: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: WireContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent<'a> {
    Text(&'a str),
    Parts(Vec<WirePart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: WireImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct WireImageUrl<'a> {
    url: &'a str,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageBody<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
    b64_json: Option<String>,
}

impl<'a> ChatBody<'a> {
    fn from_request(request: &'a CompletionRequest) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(WireMessage {
                role: "system",
                content: WireContent::Text(system),
            });
        }
        let content = match &request.image_data_url {
            None => WireContent::Text(&request.user),
            Some(url) => WireContent::Parts(vec![
                WirePart::Text { text: &request.user },
                WirePart::ImageUrl {
                    image_url: WireImageUrl { url, detail: "low" },
                },
            ]),
        };
        messages.push(WireMessage { role: "user", content });

        Self {
            model: &request.model,
            messages,
            max_tokens: request.max_tokens,
            n: 1,
            temperature: request.temperature,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
        }
    }
}

fn first_choice(response: ChatResponse) -> Result<String, Box<dyn Error>> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .ok_or_else(|| "model returned no content".into())
}

fn first_image(response: ImageResponse) -> Result<String, Box<dyn Error>> {
    let data = response
        .data
        .into_iter()
        .next()
        .ok_or("image API returned no data")?;
    match (data.url, data.b64_json) {
        (Some(url), _) => Ok(url),
        (None, Some(b64)) => Ok(format!("data:image/png;base64,{b64}")),
        (None, None) => Err("image API returned neither url nor b64_json".into()),
    }
}

/// Decode a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    if !meta.ends_with(";base64") {
        return None;
    }
    BASE64.decode(payload).ok()
}

/// Encode image bytes as a `data:` URL for vision requests.
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

/// Client for an OpenAI-compatible REST endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    /// Build a client whose model calls give up after `timeout`.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, Box<dyn Error>> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, Box<dyn Error>> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, error = %error_text, path, "API error");
            return Err(format!("API error {status} on {path}: {error_text}").into());
        }
        Ok(response.json::<R>().await?)
    }
}

impl ContentModel for OpenAiClient {
    #[instrument(level = "info", skip_all, fields(model = %request.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, Box<dyn Error>> {
        let t0 = Instant::now();
        let body = ChatBody::from_request(request);
        let response: ChatResponse = self.post_json("chat/completions", &body).await?;
        let content = first_choice(response)?;
        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            bytes = content.len(),
            "Chat completion finished"
        );
        Ok(content)
    }

    #[instrument(level = "info", skip_all, fields(model = %request.model, size = %request.size))]
    async fn generate_image(&self, request: &ImageRequest) -> Result<String, Box<dyn Error>> {
        let t0 = Instant::now();
        let body = ImageBody {
            model: &request.model,
            prompt: &request.prompt,
            n: 1,
            size: &request.size,
        };
        let response: ImageResponse = self.post_json("images/generations", &body).await?;
        let url = first_image(response)?;
        info!(elapsed_ms = t0.elapsed().as_millis() as u64, "Image generated");
        Ok(url)
    }

    #[instrument(level = "info", skip_all)]
    async fn download(&self, url: &str) -> Result<Vec<u8>, Box<dyn Error>> {
        if url.starts_with("data:") {
            return decode_data_url(url).ok_or_else(|| "malformed data URL".into());
        }
        let response = self.http.get(url).timeout(SHORT_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("failed to download image, status {status}").into());
        }
        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), "Downloaded image");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_request_body() {
        let request = CompletionRequest::new("gpt-4.1", "Write something")
            .system("You MUST respond in English.")
            .max_tokens(1500)
            .frequency_penalty(0.1)
            .presence_penalty(0.4);
        let body = serde_json::to_value(ChatBody::from_request(&request)).unwrap();

        assert_eq!(
            body,
            json!({
                "model": "gpt-4.1",
                "messages": [
                    {"role": "system", "content": "You MUST respond in English."},
                    {"role": "user", "content": "Write something"}
                ],
                "max_tokens": 1500,
                "n": 1,
                "temperature": 0.7f32,
                "frequency_penalty": 0.1f32,
                "presence_penalty": 0.4f32
            })
        );
    }

    #[test]
    fn test_vision_request_body_has_parts() {
        let request = CompletionRequest::new("gpt-4o-mini", "Describe")
            .image("data:image/png;base64,AAAA")
            .max_tokens(100);
        let body = serde_json::to_value(ChatBody::from_request(&request)).unwrap();

        assert!(body.get("frequency_penalty").is_none());
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        let parts = &body["messages"][0]["content"];
        assert_eq!(parts[0], json!({"type": "text", "text": "Describe"}));
        assert_eq!(
            parts[1],
            json!({
                "type": "image_url",
                "image_url": {"url": "data:image/png;base64,AAAA", "detail": "low"}
            })
        );
    }

    #[test]
    fn test_first_choice_trims_and_errors_on_empty() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "  hello \n"}}]
        }))
        .unwrap();
        assert_eq!(first_choice(response).unwrap(), "hello");

        let empty: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(first_choice(empty).is_err());
    }

    #[test]
    fn test_first_image_prefers_url_then_b64() {
        let with_url: ImageResponse =
            serde_json::from_value(json!({"data": [{"url": "https://img.test/a.png"}]})).unwrap();
        assert_eq!(first_image(with_url).unwrap(), "https://img.test/a.png");

        let with_b64: ImageResponse =
            serde_json::from_value(json!({"data": [{"b64_json": "AQID"}]})).unwrap();
        assert_eq!(first_image(with_b64).unwrap(), "data:image/png;base64,AQID");

        let none: ImageResponse = serde_json::from_value(json!({"data": [{}]})).unwrap();
        assert!(first_image(none).is_err());
    }

    #[test]
    fn test_data_url_codec() {
        let url = encode_data_url("image/png", &[1, 2, 3]);
        assert_eq!(url, "data:image/png;base64,AQID");
        assert_eq!(decode_data_url(&url), Some(vec![1, 2, 3]));
        assert_eq!(decode_data_url("https://example.com"), None);
        assert_eq!(decode_data_url("data:text/plain,hello"), None);
    }

    #[tokio::test]
    async fn test_download_decodes_data_urls_without_network() {
        let client = OpenAiClient::new("key", "https://api.test/v1/", SHORT_TIMEOUT).unwrap();
        let bytes = client.download("data:image/png;base64,AQID").await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }
}
