use async_trait::async_trait;
use codeburn_core::{Language, Problem};
use serde::{Deserialize, Serialize};

use crate::generator::{system_prompt, Generator, GeneratorError, Result};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    host: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
    #[serde(default)]
    details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
struct ModelDetails {
    quantization_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OllamaModel {
    pub id: String,
    pub quantization: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub message: ResponseMessage,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: String,
}

impl OllamaClient {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn list_models(&self) -> Result<Vec<OllamaModel>> {
        let url = format!("{}/api/tags", self.host);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GeneratorError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GeneratorError::Ollama(format!(
                "Failed to list models: {}",
                resp.status()
            )));
        }

        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| GeneratorError::Http(e.to_string()))?;

        let models = tags
            .models
            .into_iter()
            .map(|m| OllamaModel {
                id: m.name,
                quantization: m.details.and_then(|d| d.quantization_level),
            })
            .collect();

        Ok(models)
    }

    pub async fn chat(
        &self,
        model: &str,
        system: &str,
        prompt: &str,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.host);

        let options = if temperature.is_some() || max_tokens.is_some() {
            Some(ChatOptions {
                temperature,
                num_predict: max_tokens,
            })
        } else {
            None
        };

        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            options,
        };

        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GeneratorError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GeneratorError::Ollama(format!(
                "Chat failed: {} - {}",
                status, body
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| GeneratorError::Http(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| {
            GeneratorError::Http(format!(
                "Failed to parse response: {} - Body: {}",
                e,
                truncate(&body, 500)
            ))
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// A model served by Ollama, used as a solution generator.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OllamaGenerator {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, problem: &Problem, language: Language) -> Result<String> {
        tracing::debug!(model = %self.model, problem = %problem.id, "Requesting solution");
        let response = self
            .client
            .chat(
                &self.model,
                &system_prompt(language),
                &problem.statement,
                self.temperature,
                self.max_tokens,
            )
            .await?;
        tracing::debug!(
            problem = %problem.id,
            tokens = response.eval_count,
            "Received solution"
        );
        Ok(response.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_omits_empty_options() {
        let request = ChatRequest {
            model: "llama3.1:8b".to_string(),
            messages: vec![],
            stream: false,
            options: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("options").is_none());
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn test_chat_response_parses() {
        let body = r#"{"model":"m","message":{"role":"assistant","content":"```python\npass\n```"},"done":true,"eval_count":12}"#;
        let resp: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.message.role, "assistant");
        assert_eq!(resp.eval_count, Some(12));
    }

    #[test]
    fn test_tags_response_tolerates_missing_details() {
        let body = r#"{"models":[
            {"name":"llama3.1:8b","size":4920753328,"details":{"parameter_size":"8.0B","quantization_level":"Q4_K_M"}},
            {"name":"bare"}
        ]}"#;
        let tags: TagsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(tags.models.len(), 2);
        let quant = tags.models[0].details.as_ref().and_then(|d| d.quantization_level.as_deref());
        assert_eq!(quant, Some("Q4_K_M"));
        assert!(tags.models[1].details.is_none());
    }

    #[test]
    fn test_host_trailing_slash_trimmed() {
        let client = OllamaClient::new("http://localhost:11434/");
        assert_eq!(client.host(), "http://localhost:11434");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
