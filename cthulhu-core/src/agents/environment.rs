//! Environment agent: describes the surroundings.

use super::runtime::{
    generic_fallback, parse_json, sanitize_text_items, truncate_chars, AgentBehavior, AgentConfig,
    AgentError, AgentInput, AgentKind, AgentOutput, LlmAgent, SceneDescription,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use textgen::TextGenerator;

const ENVIRONMENT_PROMPT: &str = include_str!("prompts/environment.txt");

#[derive(Debug, Clone, Default)]
pub struct EnvironmentBehavior;

pub type EnvironmentAgent = LlmAgent<EnvironmentBehavior>;

impl LlmAgent<EnvironmentBehavior> {
    pub fn new(generator: Arc<dyn TextGenerator>, config: AgentConfig) -> Self {
        Self::with_behavior(EnvironmentBehavior, generator, config)
    }
}

#[derive(Deserialize)]
struct RawScene {
    description: String,
    #[serde(default)]
    details: Vec<Value>,
}

impl AgentBehavior for EnvironmentBehavior {
    fn kind(&self) -> AgentKind {
        AgentKind::Environment
    }

    fn system_prompt(&self) -> &str {
        ENVIRONMENT_PROMPT
    }

    fn build_prompt(&self, input: &AgentInput, _history: &str, config: &AgentConfig) -> Option<String> {
        let AgentInput::Environment(request) = input else {
            return None;
        };
        let mut prompt = truncate_chars(&request.digest.render(), config.context_window / 2);
        match &request.focus {
            Some(focus) => prompt.push_str(&format!("\nDescribe {focus} within this scene.")),
            None => prompt.push_str("\nDescribe the scene as the investigator takes it in."),
        }
        Some(prompt)
    }

    fn parse(&self, _input: &AgentInput, raw: &str, _config: &AgentConfig) -> Result<AgentOutput, AgentError> {
        let scene: RawScene = parse_json(raw)?;
        let description = scene.description.trim().to_string();
        if description.is_empty() {
            return Err(AgentError::InvalidResponse("empty description".to_string()));
        }
        Ok(AgentOutput::Environment(SceneDescription {
            description,
            details: sanitize_text_items(&scene.details, 120),
        }))
    }

    fn fallback(&self, input: &AgentInput) -> AgentOutput {
        match input {
            AgentInput::Environment(request) => {
                let location = request.digest.location();
                AgentOutput::Environment(SceneDescription {
                    description: location.opening_text().to_string(),
                    details: location.leads().iter().take(2).map(|s| s.to_string()).collect(),
                })
            }
            other => generic_fallback(other),
        }
    }

    fn max_tokens(&self, _input: &AgentInput) -> usize {
        400
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::runtime::{ContextDigest, EnvironmentRequest};
    use crate::location::Location;
    use crate::narrative::NarrativeContext;

    fn input() -> AgentInput {
        AgentInput::Environment(EnvironmentRequest {
            digest: ContextDigest::from_context(&NarrativeContext::new("basement"), 5),
            focus: None,
        })
    }

    #[test]
    fn test_parse_scene() {
        let raw = r#"Sure! {"description": "Damp stone walls sweat in the lamplight.", "details": ["a rusted hook", 3, null]}"#;
        let output = EnvironmentBehavior.parse(&input(), raw, &AgentConfig::default()).unwrap();
        let AgentOutput::Environment(scene) = output else {
            panic!("expected environment output");
        };
        assert_eq!(scene.details, vec!["a rusted hook", "3"]);
    }

    #[test]
    fn test_fallback_uses_location_text() {
        let AgentOutput::Environment(scene) = EnvironmentBehavior.fallback(&input()) else {
            panic!("expected environment output");
        };
        assert_eq!(scene.description, Location::Basement.opening_text());
        assert_eq!(scene.details.len(), 2);
    }
}
