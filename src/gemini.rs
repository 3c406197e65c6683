use crate::config::{env_or, env_required, ModelConfig};
use crate::embeddings::{Embedder, Embedding};
use crate::error::{RagError, Result};
use crate::synthesis::ChatModel;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Configuration for Gemini API
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub models: ModelConfig,
    pub timeout: Duration,
}

impl GeminiConfig {
    /// Create a new configuration from environment variables
    pub fn from_env(models: ModelConfig, timeout: Duration) -> Result<Self> {
        Ok(GeminiConfig {
            api_key: env_required("GEMINI_API_KEY")?,
            base_url: env_or("GEMINI_BASE_URL", DEFAULT_BASE_URL.to_string())?,
            models,
            timeout,
        })
    }
}

/// Client for interacting with Gemini API
///
/// Serves both as the embedder and as the chat model, using the models named
/// in its [`ModelConfig`].
#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RagError::Config(format!("HTTP client error: {}", e)))?;

        Ok(GeminiClient { config, client })
    }

    /// Get the client configuration
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn endpoint(&self, model: &str, action: Option<&str>) -> Result<String> {
        let model = model.trim();
        if model.is_empty() {
            return Err(RagError::ModelUnavailable {
                model: String::new(),
                reason: "no model configured".to_string(),
            });
        }

        let base = self.config.base_url.trim_end_matches('/');
        let path = model_path(model);
        Ok(match action {
            Some(action) => format!("{}/{}:{}?key={}", base, path, action, self.config.api_key),
            None => format!("{}/{}?key={}", base, path, self.config.api_key),
        })
    }

    fn transport_error(&self, model: &str, err: reqwest::Error) -> RagError {
        if err.is_timeout() {
            RagError::Timeout {
                operation: "gemini request",
                secs: self.config.timeout.as_secs(),
            }
        } else if err.is_connect() {
            RagError::ModelUnavailable {
                model: model.to_string(),
                reason: err.to_string(),
            }
        } else {
            RagError::Provider {
                model: model.to_string(),
                message: err.to_string(),
            }
        }
    }

    async fn check_status(&self, model: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        debug!("Gemini {} responded {}", model, status);
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if status == reqwest::StatusCode::NOT_FOUND {
            Err(RagError::ModelUnavailable {
                model: model.to_string(),
                reason: format!("{} {}", status, error_text),
            })
        } else {
            Err(RagError::Provider {
                model: model.to_string(),
                message: format!("API request failed: {} {}", status, error_text),
            })
        }
    }

    async fn post<Req, Resp>(&self, model: &str, action: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(model, Some(action))?;
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(model, e))?;

        self.check_status(model, response)
            .await?
            .json::<Resp>()
            .await
            .map_err(|e| RagError::Provider {
                model: model.to_string(),
                message: format!("Invalid response: {}", e),
            })
    }

    /// Fetch model metadata to prove the model exists
    async fn resolve_model(&self, model: &str) -> Result<()> {
        let url = self.endpoint(model, None)?;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(model, e))?;
        self.check_status(model, response).await?;
        Ok(())
    }

    fn embed_request<'a>(&self, text: &'a str) -> EmbedContentRequest<'a> {
        let models = &self.config.models;
        EmbedContentRequest {
            model: model_path(&models.embedding_model),
            content: Content::new(text, None),
            output_dimensionality: Some(models.embedding_dimension),
        }
    }

    /// Generate text with the configured chat model
    pub async fn generate_text(
        &self,
        system_prompt: &str,
        prompt: &str,
        temperature: f32,
    ) -> Result<String> {
        let model = &self.config.models.chat_model;
        let request = GenerateRequest {
            system_instruction: (!system_prompt.is_empty())
                .then(|| Content::new(system_prompt, None)),
            contents: vec![Content::new(prompt, Some("user"))],
            generation_config: GenerationConfig { temperature },
        };

        let response: GenerateResponse = self.post(model, "generateContent", &request).await?;

        // Extract the generated text from the response
        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<String>>()
                    .concat()
            })
            .ok_or_else(|| RagError::Provider {
                model: model.clone(),
                message: "No response generated".to_string(),
            })
    }
}

impl Embedder for GeminiClient {
    fn embedding_model(&self) -> &str {
        &self.config.models.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let model = self.embedding_model();
        let response: EmbedContentResponse = self
            .post(model, "embedContent", &self.embed_request(text))
            .await?;

        match response.embedding {
            Some(data) if !data.values.is_empty() => Ok(Embedding::new(data.values)),
            _ => Err(RagError::EmptyEmbeddingResult {
                model: model.to_string(),
            }),
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.embedding_model();
        let request = BatchEmbedRequest {
            requests: texts.iter().map(|text| self.embed_request(text)).collect(),
        };
        let response: BatchEmbedResponse = self.post(model, "batchEmbedContents", &request).await?;

        if response.embeddings.len() != texts.len()
            || response.embeddings.iter().any(|e| e.values.is_empty())
        {
            return Err(RagError::EmptyEmbeddingResult {
                model: model.to_string(),
            });
        }

        Ok(response
            .embeddings
            .into_iter()
            .map(|data| Embedding::new(data.values))
            .collect())
    }

    async fn resolve_embedding_model(&self) -> Result<()> {
        self.resolve_model(self.embedding_model()).await
    }
}

impl ChatModel for GeminiClient {
    fn chat_model(&self) -> &str {
        &self.config.models.chat_model
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f32) -> Result<String> {
        self.generate_text(system_prompt, user_prompt, temperature).await
    }

    async fn resolve_chat_model(&self) -> Result<()> {
        self.resolve_model(self.chat_model()).await
    }
}

/// `models/<name>`, accepting names given with or without the prefix
fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

// Request/response structures for the Gemini API

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize, Debug)]
struct EmbedContentResponse {
    embedding: Option<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

impl<'a> Content<'a> {
    fn new(text: &'a str, role: Option<&'static str>) -> Self {
        Content {
            role,
            parts: vec![Part { text }],
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn config(base_url: String) -> GeminiConfig {
        GeminiConfig {
            api_key: "test-key".to_string(),
            base_url,
            models: ModelConfig {
                embedding_model: "text-embedding-004".to_string(),
                chat_model: "gemini-2.0-flash".to_string(),
                embedding_dimension: 3,
            },
            timeout: Duration::from_secs(5),
        }
    }

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::new(config(server.base_url())).expect("client")
    }

    #[test]
    fn test_model_path_prefix() {
        assert_eq!(model_path("text-embedding-004"), "models/text-embedding-004");
        assert_eq!(model_path("models/gemini-2.0-flash"), "models/gemini-2.0-flash");
    }

    #[tokio::test]
    async fn embed_sends_model_and_dimension() {
        let server = MockServer::start_async().await;

        let embed_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/models/text-embedding-004:embedContent")
                .query_param("key", "test-key")
                .json_body(json!({
                    "model": "models/text-embedding-004",
                    "content": { "parts": [ { "text": "hello" } ] },
                    "outputDimensionality": 3
                }));
            then.status(200)
                .json_body(json!({ "embedding": { "values": [0.1, 0.2, 0.3] } }));
        });

        let embedding = client(&server).embed("hello").await.unwrap();

        assert_eq!(embedding.values, vec![0.1, 0.2, 0.3]);
        embed_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn embed_maps_not_found_to_model_unavailable() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/models/text-embedding-004:embedContent");
            then.status(404).body("model not found");
        });

        let err = client(&server).embed("hello").await.unwrap_err();
        assert!(matches!(err, RagError::ModelUnavailable { ref model, .. } if model == "text-embedding-004"));
    }

    #[tokio::test]
    async fn embed_rejects_empty_vector() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/models/text-embedding-004:embedContent");
            then.status(200).json_body(json!({ "embedding": { "values": [] } }));
        });

        let err = client(&server).embed("hello").await.unwrap_err();
        assert!(matches!(err, RagError::EmptyEmbeddingResult { .. }));
    }

    #[tokio::test]
    async fn embed_batch_preserves_order() {
        let server = MockServer::start_async().await;

        let batch_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/models/text-embedding-004:batchEmbedContents");
            then.status(200).json_body(json!({
                "embeddings": [
                    { "values": [1.0, 0.0, 0.0] },
                    { "values": [0.0, 1.0, 0.0] }
                ]
            }));
        });

        let embeddings = client(&server).embed_batch(&["first", "second"]).await.unwrap();

        assert_eq!(embeddings[0].values, vec![1.0, 0.0, 0.0]);
        assert_eq!(embeddings[1].values, vec![0.0, 1.0, 0.0]);
        batch_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn embed_batch_rejects_short_response() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST)
                .path("/models/text-embedding-004:batchEmbedContents");
            then.status(200)
                .json_body(json!({ "embeddings": [ { "values": [1.0, 0.0, 0.0] } ] }));
        });

        let err = client(&server)
            .embed_batch(&["first", "second"])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmptyEmbeddingResult { .. }));
    }

    #[tokio::test]
    async fn generate_uses_system_instruction_and_first_candidate() {
        let server = MockServer::start_async().await;

        let generate_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/models/gemini-2.0-flash:generateContent")
                .json_body(json!({
                    "systemInstruction": { "parts": [ { "text": "Context: chunk" } ] },
                    "contents": [ { "role": "user", "parts": [ { "text": "Question?" } ] } ],
                    "generationConfig": { "temperature": 0.0 }
                }));
            then.status(200).json_body(json!({
                "candidates": [
                    { "content": { "parts": [ { "text": "First" }, { "text": " answer" } ] } },
                    { "content": { "parts": [ { "text": "Second answer" } ] } }
                ]
            }));
        });

        let reply = client(&server)
            .complete("Context: chunk", "Question?", 0.0)
            .await
            .unwrap();

        assert_eq!(reply, "First answer");
        generate_mock.assert_calls(1);
    }

    #[tokio::test]
    async fn generate_without_candidates_is_provider_error() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/models/gemini-2.0-flash:generateContent");
            then.status(200).json_body(json!({ "candidates": [] }));
        });

        let err = client(&server).complete("", "Question?", 0.0).await.unwrap_err();
        assert!(matches!(err, RagError::Provider { .. }));
    }

    #[tokio::test]
    async fn generate_reports_rate_limit() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/models/gemini-2.0-flash:generateContent");
            then.status(429).body("rate limited");
        });

        let err = client(&server).complete("", "Question?", 0.0).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("429"));
        assert!(msg.contains("rate limited"));
    }

    #[tokio::test]
    async fn resolve_checks_model_metadata() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(GET).path("/models/text-embedding-004");
            then.status(200).json_body(json!({ "name": "models/text-embedding-004" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/models/gemini-2.0-flash");
            then.status(404).body("not found");
        });

        let client = client(&server);
        assert!(client.resolve_embedding_model().await.is_ok());
        assert!(matches!(
            client.resolve_chat_model().await,
            Err(RagError::ModelUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_provider_is_model_unavailable() {
        let client = GeminiClient::new(config("http://127.0.0.1:1".to_string())).unwrap();

        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, RagError::ModelUnavailable { .. }));
    }

    #[tokio::test]
    async fn empty_model_name_is_unavailable() {
        let mut config = config("http://127.0.0.1:1".to_string());
        config.models.chat_model = "  ".to_string();
        let client = GeminiClient::new(config).unwrap();

        let err = client.complete("", "hi", 0.0).await.unwrap_err();
        assert!(matches!(err, RagError::ModelUnavailable { .. }));
    }
}
