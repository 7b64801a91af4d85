use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ModelCallError;

/// Text generation capability shared by every stage.
///
/// One `invoke` is at most one attempt against the service. Implementations
/// must tolerate concurrent calls through a shared reference.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, prompt: &str, system: Option<&str>) -> Result<String, ModelCallError>;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    format: &'a str, // "json" for structured output
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new("http://localhost:11434".to_string(), "llama3".to_string())
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn invoke(&self, prompt: &str, system: Option<&str>) -> Result<String, ModelCallError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            system,
            stream: false,
            format: "json", // Force JSON output
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(ModelCallError::Network)?;
        let response = check_status(response).await?;

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ModelCallError::MalformedEnvelope(e.to_string()))?;

        Ok(ollama_response.response)
    }
}

/// Client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: SecretString,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    pub fn new(base_url: String, model: String, api_key: SecretString) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn invoke(&self, prompt: &str, system: Option<&str>) -> Result<String, ModelCallError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(ModelCallError::Network)?;
        let response = check_status(response).await?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelCallError::MalformedEnvelope(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelCallError::MalformedEnvelope("no message content".to_string()))
    }
}

const MAX_ERROR_BODY: usize = 512;

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ModelCallError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status.as_u16() {
        code @ (401 | 403) => Err(ModelCallError::Unauthorized { status: code }),
        429 => Err(ModelCallError::RateLimited),
        code => {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            Err(ModelCallError::Status { status: code, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_request_omits_missing_system() {
        let request = OllamaRequest {
            model: "llama3",
            prompt: "hi",
            system: None,
            stream: false,
            format: "json",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["format"], "json");
    }

    #[test]
    fn test_chat_response_envelope() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"[\"q\"]"}}]}"#;
        let chat: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(chat.choices[0].message.content.as_deref(), Some("[\"q\"]"));
    }

    #[test]
    fn test_openai_base_url_is_normalized() {
        let client = OpenAiClient::new(
            "https://example.test/v1/".to_string(),
            "gpt-4o".to_string(),
            SecretString::from("key".to_string()),
        );
        assert_eq!(client.base_url, "https://example.test/v1");
    }
}
