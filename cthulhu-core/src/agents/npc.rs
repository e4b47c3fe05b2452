//! NPC agent: voices non-player characters.

use super::runtime::{
    generic_fallback, parse_json, truncate_chars, AgentBehavior, AgentConfig, AgentError,
    AgentInput, AgentKind, AgentOutput, LlmAgent, NpcReply,
};
use std::sync::Arc;
use textgen::TextGenerator;

const NPC_PROMPT: &str = include_str!("prompts/npc.txt");

const EVASIVE_LINES: &[&str] = &[
    "I don't know anything about that. You should leave it alone.",
    "Please, not so loud. They listen at night, you know.",
    "I've said all I'm going to say. Good day to you.",
];

#[derive(Debug, Clone, Default)]
pub struct NpcBehavior;

pub type NpcAgent = LlmAgent<NpcBehavior>;

impl LlmAgent<NpcBehavior> {
    pub fn new(generator: Arc<dyn TextGenerator>, config: AgentConfig) -> Self {
        Self::with_behavior(NpcBehavior, generator, config)
    }
}

impl AgentBehavior for NpcBehavior {
    fn kind(&self) -> AgentKind {
        AgentKind::Npc
    }

    fn system_prompt(&self) -> &str {
        NPC_PROMPT
    }

    fn build_prompt(&self, input: &AgentInput, history: &str, config: &AgentConfig) -> Option<String> {
        let AgentInput::Npc(request) = input else {
            return None;
        };
        let mut prompt = truncate_chars(&request.digest.render(), config.context_window / 2);
        if !history.is_empty() {
            prompt.push_str("\n## Earlier conversation\n");
            prompt.push_str(history);
        }
        let speaker = request.npc.as_deref().unwrap_or("whoever is present");
        prompt.push_str(&format!(
            "\n## The investigator says to {speaker}\n{}\n",
            request.player_line
        ));
        Some(prompt)
    }

    fn parse(&self, _input: &AgentInput, raw: &str, _config: &AgentConfig) -> Result<AgentOutput, AgentError> {
        let reply: NpcReply = parse_json(raw)?;
        if reply.dialogue.trim().is_empty() {
            return Err(AgentError::InvalidResponse("empty dialogue".to_string()));
        }
        Ok(AgentOutput::Npc(NpcReply {
            speaker: reply.speaker.trim().to_string(),
            dialogue: reply.dialogue.trim().to_string(),
            attitude: reply.attitude.map(|a| a.trim().to_lowercase()),
        }))
    }

    fn fallback(&self, input: &AgentInput) -> AgentOutput {
        match input {
            AgentInput::Npc(request) => {
                let line = EVASIVE_LINES[request.digest.turn_number as usize % EVASIVE_LINES.len()];
                AgentOutput::Npc(NpcReply {
                    speaker: request.npc.clone().unwrap_or_else(|| "The stranger".to_string()),
                    dialogue: line.to_string(),
                    attitude: Some("wary".to_string()),
                })
            }
            other => generic_fallback(other),
        }
    }

    fn max_tokens(&self, _input: &AgentInput) -> usize {
        300
    }

    fn exchange(&self, input: &AgentInput, output: &AgentOutput) -> Option<(String, String)> {
        match (input, output) {
            (AgentInput::Npc(request), AgentOutput::Npc(reply)) => Some((
                request.player_line.clone(),
                format!("{}: {}", reply.speaker, reply.dialogue),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::runtime::{ContextDigest, NpcRequest};
    use crate::narrative::NarrativeContext;

    fn input() -> AgentInput {
        AgentInput::Npc(NpcRequest {
            digest: ContextDigest::from_context(&NarrativeContext::new("library"), 5),
            npc: Some("Librarian".to_string()),
            player_line: "Have you seen Professor Armitage?".to_string(),
        })
    }

    #[test]
    fn test_parse_reply() {
        let raw = r#"{"speaker": "Librarian ", "dialogue": " He left at dusk. ", "attitude": "Wary"}"#;
        let output = NpcBehavior.parse(&input(), raw, &AgentConfig::default()).unwrap();
        let AgentOutput::Npc(reply) = output else {
            panic!("expected npc output");
        };
        assert_eq!(reply.speaker, "Librarian");
        assert_eq!(reply.dialogue, "He left at dusk.");
        assert_eq!(reply.attitude.as_deref(), Some("wary"));
    }

    #[test]
    fn test_rejects_empty_dialogue() {
        let raw = r#"{"speaker": "Librarian", "dialogue": ""}"#;
        assert!(NpcBehavior.parse(&input(), raw, &AgentConfig::default()).is_err());
    }

    #[test]
    fn test_fallback_keeps_speaker() {
        let AgentOutput::Npc(reply) = NpcBehavior.fallback(&input()) else {
            panic!("expected npc output");
        };
        assert_eq!(reply.speaker, "Librarian");
        assert!(!reply.dialogue.is_empty());
    }

    #[test]
    fn test_ignores_other_inputs() {
        let other = AgentInput::Memory(crate::agents::runtime::MemoryRequest::Recall {
            query: "x".into(),
            scene_id: "study".into(),
            limit: 1,
        });
        assert!(NpcBehavior.build_prompt(&other, "", &AgentConfig::default()).is_none());
    }
}
