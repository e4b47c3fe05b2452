//! Rule agent: picks a skill for actions the fixed tables do not cover.

use super::runtime::{
    generic_fallback, parse_json, AgentBehavior, AgentConfig, AgentError, AgentInput, AgentKind,
    AgentOutput, LlmAgent, RuleRuling,
};
use crate::action::DEFAULT_SKILL;
use crate::character::{base_skill_value, normalize_skill};
use std::sync::Arc;
use textgen::TextGenerator;

const RULE_PROMPT: &str = include_str!("prompts/rule.txt");

/// Largest difficulty adjustment the referee may apply.
pub const MAX_MODIFIER: i32 = 20;

#[derive(Debug, Clone, Default)]
pub struct RuleBehavior;

pub type RuleAgent = LlmAgent<RuleBehavior>;

impl LlmAgent<RuleBehavior> {
    pub fn new(generator: Arc<dyn TextGenerator>, config: AgentConfig) -> Self {
        Self::with_behavior(RuleBehavior, generator, config)
    }
}

impl AgentBehavior for RuleBehavior {
    fn kind(&self) -> AgentKind {
        AgentKind::Rule
    }

    fn system_prompt(&self) -> &str {
        RULE_PROMPT
    }

    fn build_prompt(&self, input: &AgentInput, _history: &str, _config: &AgentConfig) -> Option<String> {
        let AgentInput::Rule(request) = input else {
            return None;
        };
        Some(format!(
            "Scene: {} (tension {})\nAction ({}): {}\n\nWhich skill applies?",
            request.digest.scene_id, request.digest.tension, request.action_type, request.action
        ))
    }

    fn parse(&self, _input: &AgentInput, raw: &str, _config: &AgentConfig) -> Result<AgentOutput, AgentError> {
        let ruling: RuleRuling = parse_json(raw)?;
        let skill = ruling
            .skill
            .map(|s| normalize_skill(&s))
            .filter(|s| is_known_skill(s))
            .ok_or_else(|| AgentError::InvalidResponse("unknown or missing skill".to_string()))?;
        Ok(AgentOutput::Rule(RuleRuling {
            skill: Some(skill),
            modifier: ruling.modifier.clamp(-MAX_MODIFIER, MAX_MODIFIER),
            rationale: ruling.rationale.trim().to_string(),
        }))
    }

    fn fallback(&self, input: &AgentInput) -> AgentOutput {
        match input {
            AgentInput::Rule(_) => AgentOutput::Rule(RuleRuling {
                skill: Some(DEFAULT_SKILL.to_string()),
                modifier: 0,
                rationale: "No specific skill applies; trust to luck".to_string(),
            }),
            other => generic_fallback(other),
        }
    }

    fn max_tokens(&self, _input: &AgentInput) -> usize {
        200
    }
}

fn is_known_skill(skill: &str) -> bool {
    matches!(skill, "luck" | "sanity" | "idea" | "know" | "dodge") || base_skill_value(skill).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::agents::runtime::{ContextDigest, RuleRequest};
    use crate::narrative::NarrativeContext;

    fn input() -> AgentInput {
        AgentInput::Rule(RuleRequest {
            digest: ContextDigest::from_context(&NarrativeContext::new("forest"), 5),
            action: "Follow the tracks".to_string(),
            action_type: ActionType::Movement,
        })
    }

    #[test]
    fn test_parse_normalizes_and_clamps() {
        let raw = r#"{"skill": "Spot Hidden", "modifier": 45, "rationale": "Tracks are faint"}"#;
        let AgentOutput::Rule(ruling) = RuleBehavior.parse(&input(), raw, &AgentConfig::default()).unwrap() else {
            panic!("expected rule output");
        };
        assert_eq!(ruling.skill.as_deref(), Some("spot_hidden"));
        assert_eq!(ruling.modifier, MAX_MODIFIER);
    }

    #[test]
    fn test_rejects_unknown_skill() {
        let raw = r#"{"skill": "basket_weaving", "modifier": 0}"#;
        assert!(RuleBehavior.parse(&input(), raw, &AgentConfig::default()).is_err());
    }

    #[test]
    fn test_fallback_is_luck() {
        let AgentOutput::Rule(ruling) = RuleBehavior.fallback(&input()) else {
            panic!("expected rule output");
        };
        assert_eq!(ruling.skill.as_deref(), Some(DEFAULT_SKILL));
    }
}
