//! HTTP provider speaking the OpenAI-compatible chat-completions protocol.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::provider::{GenerationProvider, GenerationRequest, ProviderError};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Text-generation provider backed by an HTTP endpoint.
///
/// Performs one POST per call. Timeouts and retries are left to the gateway.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpProvider {
    /// Create a provider for `endpoint` using `model`.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
            model: model.into(),
        }
    }

    /// Send `api_key` as a bearer token.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.is_empty()).then_some(api_key);
        self
    }

    /// The configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest) -> ChatCompletionBody<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatCompletionBody {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens,
        }
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn extract_content(payload: &Value) -> Result<String, ProviderError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ProviderError::MalformedPayload("missing choices[0].message.content".to_string())
        })
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        debug!("Sending generation request");

        let mut builder = self.client.post(&self.endpoint).json(&self.body(request));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Provider returned error status");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;

        extract_content(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_content() {
        let payload = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Once upon a time" } }]
        });
        assert_eq!(extract_content(&payload).unwrap(), "Once upon a time");
    }

    #[test]
    fn test_extract_content_missing() {
        assert!(matches!(
            extract_content(&json!({ "choices": [] })),
            Err(ProviderError::MalformedPayload(_))
        ));
        assert!(matches!(
            extract_content(&json!({ "choices": [{ "message": { "content": null } }] })),
            Err(ProviderError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_body_shape() {
        let provider = HttpProvider::new("http://localhost:8080/v1/chat/completions", "story-1");
        let request = GenerationRequest::new("a story")
            .with_system("be brief")
            .with_max_tokens(200);

        let body = serde_json::to_value(provider.body(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "story-1",
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "a story" }
                ],
                "max_tokens": 200
            })
        );
    }

    #[test]
    fn test_blank_api_key_ignored() {
        let provider = HttpProvider::new("http://localhost", "m").with_api_key("");
        assert!(provider.api_key.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // Port 9 on loopback is the discard service and normally closed
        let provider = HttpProvider::new("http://127.0.0.1:9/v1/chat/completions", "m");
        let result = provider.generate(&GenerationRequest::new("hi")).await;
        assert!(matches!(result, Err(ProviderError::Transport(_))));
    }
}
