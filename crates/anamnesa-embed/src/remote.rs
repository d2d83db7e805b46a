//! Generative Language API embeddings (`text-embedding-004` by default).
//!
//! Documents go through `batchEmbedContents` with the `RETRIEVAL_DOCUMENT`
//! task type, queries through `embedContent` with `RETRIEVAL_QUERY`.
use std::time::Duration;

use anamnesa_core::config::EmbeddingConfig;
use anamnesa_core::error::EmbeddingServiceError;
use anamnesa_core::traits::Embedder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub struct RemoteEmbedder {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: String,
    dim: usize,
    max_input_chars: usize,
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct Values {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Values,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    embeddings: Vec<Values>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl RemoteEmbedder {
    /// Reads the API key from the environment variable named in `config.api_key_env`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingServiceError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EmbeddingServiceError::NotConfigured(format!("{} is not set", config.api_key_env)))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self, EmbeddingServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| EmbeddingServiceError::NotConfigured(format!("HTTP client: {e}")))?;
        let model = config.model.trim_start_matches("models/").to_string();
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            id: format!("remote:{model}:d{}", config.dim),
            model,
            api_key,
            dim: config.dim,
            max_input_chars: config.max_input_chars,
        })
    }

    fn model_path(&self) -> String {
        format!("models/{}", self.model)
    }

    fn truncate<'a>(&self, text: &'a str) -> &'a str {
        match text.char_indices().nth(self.max_input_chars) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<R, EmbeddingServiceError> {
        let url = format!("{}/{}:{method}", self.api_base, self.model_path());
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingServiceError::Timeout
                } else {
                    EmbeddingServiceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbeddingServiceError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body).map(|b| b.error.message).unwrap_or(body);
            return Err(EmbeddingServiceError::Api { status: status.as_u16(), message });
        }
        response
            .json::<R>()
            .await
            .map_err(|e| EmbeddingServiceError::InvalidResponse(e.to_string()))
    }

    fn check_dim(&self, v: Vec<f32>) -> Result<Vec<f32>, EmbeddingServiceError> {
        if v.len() == self.dim {
            Ok(v)
        } else {
            Err(EmbeddingServiceError::DimensionMismatch { expected: self.dim, actual: v.len() })
        }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model_path();
        let requests = texts
            .iter()
            .map(|t| EmbedRequest {
                model: &model,
                content: Content { parts: [Part { text: self.truncate(t) }] },
                task_type: "RETRIEVAL_DOCUMENT",
            })
            .collect();
        let response: BatchResponse = self.post("batchEmbedContents", &BatchRequest { requests }).await?;
        if response.embeddings.len() != texts.len() {
            return Err(EmbeddingServiceError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }
        response.embeddings.into_iter().map(|e| self.check_dim(e.values)).collect()
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingServiceError> {
        let model = self.model_path();
        let request = EmbedRequest {
            model: &model,
            content: Content { parts: [Part { text: self.truncate(text) }] },
            task_type: "RETRIEVAL_QUERY",
        };
        let response: EmbedResponse = self.post("embedContent", &request).await?;
        self.check_dim(response.embedding.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_not_configured() {
        let cfg = EmbeddingConfig { api_key_env: "ANAMNESA_TEST_UNSET_KEY".into(), ..EmbeddingConfig::default() };
        assert!(matches!(RemoteEmbedder::from_config(&cfg), Err(EmbeddingServiceError::NotConfigured(_))));
    }

    #[test]
    fn request_shape_matches_api() -> Result<(), serde_json::Error> {
        let req = EmbedRequest {
            model: "models/text-embedding-004",
            content: Content { parts: [Part { text: "demam" }] },
            task_type: "RETRIEVAL_QUERY",
        };
        let json = serde_json::to_value(&req)?;
        assert_eq!(json["taskType"], "RETRIEVAL_QUERY");
        assert_eq!(json["content"]["parts"][0]["text"], "demam");
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_retryable() -> Result<(), EmbeddingServiceError> {
        let cfg = EmbeddingConfig {
            api_base: "http://127.0.0.1:9".into(),
            request_timeout_ms: 2_000,
            max_input_chars: 4,
            ..EmbeddingConfig::default()
        };
        let e = RemoteEmbedder::new(&cfg, "k".into())?;
        assert_eq!(e.truncate("abcdefgh"), "abcd");
        let err = e.embed_query("demam").await.err();
        assert!(err.is_some_and(|e| e.is_retryable()));
        Ok(())
    }
}
