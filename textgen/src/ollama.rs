//! Ollama backend for locally hosted models.

use crate::{require_content, Error, GenerateRequest, Generation, TextGenerator, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "gpt-oss:120b";

/// Ollama HTTP client.
#[derive(Clone)]
pub struct Ollama {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl Ollama {
    pub fn new() -> Result<Self, Error> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client against a specific server root.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, Error> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!("Invalid Ollama URL: {base_url}")));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_api_request(&self, request: &GenerateRequest) -> ApiRequest {
        ApiRequest {
            model: request
                .options
                .model
                .clone()
                .unwrap_or_else(|| self.model.clone()),
            prompt: request.prompt.clone(),
            system: request.system_prompt.clone(),
            stream: false,
            options: ApiOptions {
                temperature: request.options.temperature,
                num_predict: request.options.max_tokens,
            },
        }
    }
}

#[async_trait]
impl TextGenerator for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn connect(&self) -> Result<(), Error> {
        if self.health_check().await {
            Ok(())
        } else {
            Err(Error::Network(format!(
                "Ollama server not reachable at {}",
                self.base_url
            )))
        }
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, url = %self.base_url, "Ollama health check failed");
                false
            }
        }
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Generation, Error> {
        let api_request = self.build_api_request(&request);

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&api_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        parse_response(api_response)
    }
}

fn parse_response(api_response: ApiResponse) -> Result<Generation, Error> {
    Ok(Generation {
        content: require_content(api_response.response)?,
        model: api_response.model,
        usage: Usage {
            input_tokens: api_response.prompt_eval_count,
            output_tokens: api_response.eval_count,
        },
    })
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: ApiOptions,
}

#[derive(Debug, Serialize)]
struct ApiOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: usize,
    #[serde(default)]
    eval_count: usize,
}
