//! Story agent: narrates action outcomes and proposes player choices.
//!
//! Narration is requested in a sectioned plain-text format, which models
//! follow more reliably than JSON for prose. Choices are requested as a
//! JSON array.

use super::runtime::{
    parse_json, sanitize_text_items, truncate_chars, AgentBehavior, AgentConfig, AgentError,
    AgentInput, AgentKind, AgentOutput, ChoiceRequest, LlmAgent, StoryDraft, StoryRequest,
    ThreadNote,
};
use crate::dice::SkillTier;
use crate::location::{leads_for_scene, GENERAL_CHOICES};
use crate::narrative::{TensionLevel, ThreadStatus};
use serde_json::Value;
use std::sync::Arc;
use textgen::TextGenerator;

/// Longest accepted opportunity or choice text.
pub const MAX_ITEM_CHARS: usize = 120;

const STORY_PROMPT: &str = include_str!("prompts/story.txt");
const CHOICES_PROMPT: &str = include_str!("prompts/choices.txt");

const SUCCESS_LINES: &[&str] = &[
    "Your patience is rewarded. Something small but telling comes into focus.",
    "For a moment the pieces align, and you see what others have missed.",
    "Your hands are steady and your eyes sharp. The detail you needed is there.",
];

const FAILURE_LINES: &[&str] = &[
    "Whatever you hoped to find eludes you, and the silence seems to deepen.",
    "Minutes slip away. You are left with nothing but the feeling of being watched.",
    "Your efforts come to nothing. Somewhere in the house a floorboard settles.",
];

const FUMBLE_LINES: &[&str] = &[
    "It goes badly wrong. The noise you make carries much further than it should.",
    "Your hand slips, and for a terrible instant something notices you.",
];

const NEUTRAL_LINES: &[&str] = &[
    "You take a slow breath and steady yourself before going on.",
    "The air is heavy and still. Nothing moves, yet nothing feels at rest.",
    "You press on, every sense straining against the gloom.",
];

/// Narration and choice behavior.
#[derive(Debug, Clone, Default)]
pub struct StoryBehavior;

pub type StoryAgent = LlmAgent<StoryBehavior>;

impl LlmAgent<StoryBehavior> {
    pub fn new(generator: Arc<dyn TextGenerator>, config: AgentConfig) -> Self {
        Self::with_behavior(StoryBehavior, generator, config)
    }
}

impl StoryBehavior {
    fn story_prompt(&self, request: &StoryRequest, history: &str, config: &AgentConfig) -> String {
        let mut prompt = truncate_chars(&request.digest.render(), config.context_window / 2);
        if let Some(character) = &request.character {
            prompt.push('\n');
            prompt.push_str(&character.render());
        }
        if !history.is_empty() {
            prompt.push_str("\n## Recent events\n");
            prompt.push_str(history);
        }
        if !request.notes.is_empty() {
            prompt.push_str("\n## Notes\n");
            for note in &request.notes {
                prompt.push_str(&format!("- {}\n", truncate_chars(note, 300)));
            }
        }

        prompt.push_str(&format!(
            "\n## Player action ({})\n{}\n",
            request.action_type, request.action
        ));
        if let Some(check) = &request.check {
            let skill = request.skill.as_deref().unwrap_or("skill");
            prompt.push_str(&format!(
                "\n## Dice\n{skill} check: rolled {} against {}, {}\n",
                check.roll, check.target, check.tier
            ));
        }
        prompt.push_str("\nNarrate the outcome.");
        prompt
    }

    fn choices_prompt(&self, request: &ChoiceRequest, config: &AgentConfig) -> String {
        let mut prompt = truncate_chars(&request.digest.render(), config.context_window / 2);
        if let Some(character) = &request.character {
            prompt.push('\n');
            prompt.push_str(&character.render());
        }
        if !request.avoid.is_empty() {
            prompt.push_str("\n## Already offered, do not repeat\n");
            for text in &request.avoid {
                prompt.push_str(&format!("- {text}\n"));
            }
        }
        prompt.push_str(&format!("\nOffer exactly {} distinct choices.", request.count));
        prompt
    }
}

impl AgentBehavior for StoryBehavior {
    fn kind(&self) -> AgentKind {
        AgentKind::Story
    }

    fn system_prompt(&self) -> &str {
        STORY_PROMPT
    }

    fn build_prompt(&self, input: &AgentInput, history: &str, config: &AgentConfig) -> Option<String> {
        match input {
            AgentInput::Story(request) => Some(self.story_prompt(request, history, config)),
            // The choice format replaces the narration format entirely.
            AgentInput::Choices(request) => Some(format!(
                "{CHOICES_PROMPT}\n{}",
                self.choices_prompt(request, config)
            )),
            _ => None,
        }
    }

    fn parse(&self, input: &AgentInput, raw: &str, _config: &AgentConfig) -> Result<AgentOutput, AgentError> {
        match input {
            AgentInput::Choices(_) => {
                let values: Vec<Value> = parse_json(raw)?;
                let choices = sanitize_text_items(&values, MAX_ITEM_CHARS);
                if choices.is_empty() {
                    return Err(AgentError::InvalidResponse("no usable choices".to_string()));
                }
                Ok(AgentOutput::Choices(choices))
            }
            _ => parse_story_sections(raw).map(AgentOutput::Story),
        }
    }

    fn fallback(&self, input: &AgentInput) -> AgentOutput {
        match input {
            AgentInput::Story(request) => AgentOutput::Story(fallback_draft(request)),
            AgentInput::Choices(request) => AgentOutput::Choices(
                request
                    .digest
                    .location()
                    .choices()
                    .iter()
                    .chain(GENERAL_CHOICES)
                    .map(|c| c.text.to_string())
                    .take(request.count.max(1))
                    .collect(),
            ),
            other => super::runtime::generic_fallback(other),
        }
    }

    fn max_tokens(&self, input: &AgentInput) -> usize {
        match input {
            AgentInput::Choices(_) => 300,
            _ => 800,
        }
    }

    fn exchange(&self, input: &AgentInput, output: &AgentOutput) -> Option<(String, String)> {
        match (input, output) {
            (AgentInput::Story(request), AgentOutput::Story(draft)) => {
                Some((request.action.clone(), draft.text.clone()))
            }
            _ => None,
        }
    }
}

/// Deterministic narration keyed on the check outcome and turn number.
pub fn fallback_draft(request: &StoryRequest) -> StoryDraft {
    let turn = request.digest.turn_number as usize;
    let lines = match request.check.as_ref().map(|c| c.tier) {
        Some(SkillTier::Fumble) => FUMBLE_LINES,
        Some(tier) if tier.is_success() => SUCCESS_LINES,
        Some(_) => FAILURE_LINES,
        None => NEUTRAL_LINES,
    };
    let text = lines[turn % lines.len()].to_string();

    let opportunities = leads_for_scene(&request.digest.scene_id)
        .into_iter()
        .take(3)
        .map(str::to_string)
        .collect();

    StoryDraft {
        text,
        opportunities,
        ..StoryDraft::default()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Text,
    Opportunities,
    Tension,
    Threads,
    Scene,
}

fn section_header(line: &str) -> Option<(Section, &str)> {
    let line = line.trim_start_matches(['#', '*', ' ']);
    let (head, rest) = line.split_once(':')?;
    let section = match head.trim_end_matches('*').trim().to_uppercase().as_str() {
        "STORY_TEXT" => Section::Text,
        "INVESTIGATION_OPPORTUNITIES" => Section::Opportunities,
        "TENSION_CHANGE" => Section::Tension,
        "STORY_THREADS" => Section::Threads,
        "NEW_SCENE" => Section::Scene,
        _ => return None,
    };
    Some((section, rest.trim_start_matches('*').trim()))
}

fn bullet(line: &str) -> Option<&str> {
    let trimmed = line.trim_start_matches(['-', '*', '•']);
    if trimmed.len() != line.len() {
        return Some(trimmed.trim());
    }
    let digits = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if digits.len() != line.len() {
        if let Some(rest) = digits.strip_prefix(['.', ')']) {
            return Some(rest.trim());
        }
    }
    None
}

/// Parse the sectioned narration format.
///
/// Only `STORY_TEXT` is required. An unknown tension word is ignored rather
/// than rejected.
pub fn parse_story_sections(raw: &str) -> Result<StoryDraft, AgentError> {
    let mut text_parts: Vec<String> = Vec::new();
    let mut opportunities: Vec<Value> = Vec::new();
    let mut tension_word = String::new();
    let mut threads: Vec<ThreadNote> = Vec::new();
    let mut scene = String::new();
    let mut current: Option<Section> = None;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((section, rest)) = section_header(line) {
            current = Some(section);
            match section {
                Section::Text if !rest.is_empty() => text_parts.push(rest.to_string()),
                Section::Tension => tension_word = rest.to_string(),
                Section::Scene => scene = rest.to_string(),
                _ => {}
            }
            continue;
        }

        match current {
            Some(Section::Text) => text_parts.push(line.to_string()),
            Some(Section::Opportunities) => {
                if let Some(item) = bullet(line) {
                    opportunities.push(Value::String(item.to_string()));
                }
            }
            Some(Section::Threads) => {
                if let Some(item) = bullet(line) {
                    if let Some(note) = thread_note(item) {
                        threads.push(note);
                    }
                }
            }
            Some(Section::Tension) if tension_word.is_empty() => tension_word = line.to_string(),
            _ => {}
        }
    }

    let text = text_parts.join(" ");
    if text.trim().is_empty() {
        return Err(AgentError::InvalidResponse("missing STORY_TEXT".to_string()));
    }

    let tension_word = tension_word.trim_matches(['[', ']', '*', '.', ' ']);
    let tension = match tension_word.parse::<TensionLevel>() {
        Ok(level) => Some(level),
        Err(_) if tension_word.is_empty() => None,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unknown tension suggestion");
            None
        }
    };

    let scene = scene.trim_matches(['[', ']', '*', '.', ' ']);
    let new_scene = match scene.to_lowercase().as_str() {
        "" | "none" | "n/a" | "same" => None,
        _ => Some(scene.to_lowercase().replace(' ', "_")),
    };

    Ok(StoryDraft {
        text,
        opportunities: sanitize_text_items(&opportunities, MAX_ITEM_CHARS),
        tension,
        threads,
        new_scene,
    })
}

fn thread_note(item: &str) -> Option<ThreadNote> {
    let (name, detail) = match item.split_once(':') {
        Some((name, detail)) => (name.trim(), detail.trim()),
        None => (item.trim(), ""),
    };
    if name.is_empty() {
        return None;
    }
    Some(ThreadNote {
        name: name.to_string(),
        status: ThreadStatus::from_word(detail),
        detail: detail.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::agents::runtime::ContextDigest;
    use crate::dice::SkillCheck;
    use crate::narrative::NarrativeContext;

    fn request(check: Option<SkillCheck>) -> StoryRequest {
        StoryRequest {
            digest: ContextDigest::from_context(&NarrativeContext::new("study"), 5),
            character: None,
            action: "Search the desk".to_string(),
            action_type: ActionType::Investigate,
            skill: Some("spot_hidden".to_string()),
            check,
            notes: Vec::new(),
        }
    }

    #[test]
    fn test_parse_full_response() {
        let raw = "STORY_TEXT: The drawer sticks, then gives.\nInside lies a letter.\n\n\
                   INVESTIGATION_OPPORTUNITIES:\n- Read the letter\n- Check the drawer's false bottom\n\
                   1. Look out the window\n\n\
                   TENSION_CHANGE: Uneasy\n\n\
                   STORY_THREADS:\n- Missing professor: progressing\n- The letter: new\n\n\
                   NEW_SCENE: none";
        let draft = parse_story_sections(raw).unwrap();
        assert_eq!(draft.text, "The drawer sticks, then gives. Inside lies a letter.");
        assert_eq!(draft.opportunities.len(), 3);
        assert_eq!(draft.opportunities[2], "Look out the window");
        assert_eq!(draft.tension, Some(TensionLevel::Uneasy));
        assert_eq!(draft.threads.len(), 2);
        assert_eq!(draft.threads[0].status, ThreadStatus::Progressing);
        assert_eq!(draft.threads[1].status, ThreadStatus::Open);
        assert_eq!(draft.new_scene, None);
    }

    #[test]
    fn test_parse_markdown_headers_and_scene() {
        let raw = "**STORY_TEXT:** You descend.\n**TENSION_CHANGE:** [cosmic horror]\n**NEW_SCENE:** Basement";
        let draft = parse_story_sections(raw).unwrap();
        assert_eq!(draft.text, "You descend.");
        assert_eq!(draft.tension, Some(TensionLevel::CosmicHorror));
        assert_eq!(draft.new_scene.as_deref(), Some("basement"));
    }

    #[test]
    fn test_parse_requires_story_text() {
        let result = parse_story_sections("TENSION_CHANGE: calm");
        assert!(matches!(result, Err(AgentError::InvalidResponse(_))));
    }

    #[test]
    fn test_unknown_tension_is_ignored() {
        let draft = parse_story_sections("STORY_TEXT: Quiet.\nTENSION_CHANGE: spooky").unwrap();
        assert_eq!(draft.tension, None);
    }

    #[test]
    fn test_parse_choices_json() {
        let input = AgentInput::Choices(ChoiceRequest {
            digest: ContextDigest::from_context(&NarrativeContext::new("study"), 5),
            character: None,
            count: 4,
            avoid: Vec::new(),
        });
        let output = StoryBehavior
            .parse(&input, "```json\n[\"Open the safe\", \"\", null, \"Open the safe\"]\n```", &AgentConfig::default())
            .unwrap();
        assert_eq!(output, AgentOutput::Choices(vec!["Open the safe".to_string()]));

        let err = StoryBehavior.parse(&input, "[]", &AgentConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_fallback_follows_outcome() {
        let success = SkillCheck {
            roll: 10,
            skill_value: 50,
            modifier: 0,
            target: 50,
            tier: SkillTier::ExtremeSuccess,
        };
        let draft = fallback_draft(&request(Some(success)));
        assert!(SUCCESS_LINES.contains(&draft.text.as_str()));
        assert_eq!(draft.opportunities.len(), 3);

        let draft = fallback_draft(&request(None));
        assert!(NEUTRAL_LINES.contains(&draft.text.as_str()));
    }

    #[test]
    fn test_prompt_includes_dice() {
        let check = SkillCheck {
            roll: 42,
            skill_value: 60,
            modifier: 0,
            target: 60,
            tier: SkillTier::Success,
        };
        let prompt = StoryBehavior
            .build_prompt(&AgentInput::Story(request(Some(check))), "", &AgentConfig::default())
            .unwrap();
        assert!(prompt.contains("spot_hidden check: rolled 42 against 60, success"));
        assert!(prompt.contains("Search the desk"));
    }
}
