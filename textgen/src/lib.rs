//! Text-generation clients for the narrative engine.
//!
//! This crate provides:
//! - The [`TextGenerator`] trait, an opaque "prompt in, text out" service
//! - Request/option types shared by every backend
//! - A Claude backend (Anthropic Messages API)
//! - An Ollama backend (local models over HTTP)
//!
//! Backends only move text. Interpreting that text is the caller's job,
//! so a response without any text content is reported as
//! [`Error::EmptyContent`] rather than an empty success.

mod claude;
mod ollama;

pub use claude::Claude;
pub use ollama::Ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when talking to a text-generation backend.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Response contained no text content")]
    EmptyContent,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Configuration problems and client-side API errors (other than rate
    /// limiting) will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::NoApiKey | Error::Config(_) => false,
            Error::Api { status, .. } => *status == 429 || *status >= 500,
            Error::Network(_) | Error::Timeout(_) | Error::Parse(_) | Error::EmptyContent => true,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            Error::Parse(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}

/// Sampling options for a single generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Model override; backends fall back to their configured default.
    #[serde(default)]
    pub model: Option<String>,
    pub max_tokens: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 1024,
            temperature: Some(0.8),
        }
    }
}

/// A single generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub options: GenerateOptions,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            options: GenerateOptions::default(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.options.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }
}

/// Token usage reported by a backend (zero when the backend does not say).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Text produced by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub usage: Usage,
}

impl Generation {
    pub fn text(&self) -> &str {
        &self.content
    }
}

/// An opaque text-generation service.
///
/// Implementations must be shareable across agents (`Send + Sync`); every
/// method takes `&self`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Backend name for logs and health reports.
    fn name(&self) -> &str;

    /// Establish whatever the backend needs before the first request.
    async fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Release backend resources.
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Cheap reachability probe.
    async fn health_check(&self) -> bool;

    /// Generate text for a prompt.
    async fn generate(&self, request: GenerateRequest) -> Result<Generation, Error>;
}

/// Reject whitespace-only content.
pub(crate) fn require_content(content: String) -> Result<String, Error> {
    if content.trim().is_empty() {
        Err(Error::EmptyContent)
    } else {
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = GenerateRequest::new("The door creaks open.")
            .with_system("You narrate cosmic horror.")
            .with_max_tokens(256)
            .with_temperature(1.7)
            .with_model("llama3.1");

        assert_eq!(request.prompt, "The door creaks open.");
        assert_eq!(request.system_prompt.as_deref(), Some("You narrate cosmic horror."));
        assert_eq!(request.options.max_tokens, 256);
        assert_eq!(request.options.temperature, Some(1.0));
        assert_eq!(request.options.model.as_deref(), Some("llama3.1"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(Error::EmptyContent.is_retryable());
        assert!(Error::Api { status: 503, message: String::new() }.is_retryable());
        assert!(Error::Api { status: 429, message: String::new() }.is_retryable());
        assert!(!Error::Api { status: 401, message: String::new() }.is_retryable());
        assert!(!Error::NoApiKey.is_retryable());
    }

    #[test]
    fn test_require_content() {
        assert!(matches!(require_content("  \n".into()), Err(Error::EmptyContent)));
        assert_eq!(require_content("text".into()).unwrap(), "text");
    }
}
