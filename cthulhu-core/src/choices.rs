//! Player choice generation.
//!
//! One strategy for every call site: ask the story agent first, and when
//! that yields nothing usable build choices from the location tables. The
//! deterministic path adds recovery and escape options from character and
//! tension state and skips anything offered within the repetition window.
//!
//! Whatever path runs, the returned choices have distinct text and there
//! is always at least one.

use crate::action::{classify_action, ActionType};
use crate::agents::runtime::{sanitize_text_items, AgentInput, AgentOutput, ChoiceRequest, CharacterDigest, ContextDigest, NarrativeAgent};
use crate::character::CharacterSnapshot;
use crate::location::{
    ChoiceTemplate, ESCAPE_CHOICES, GENERAL_ALTERNATES, GENERAL_CHOICES, RECOVERY_CHOICES,
    ULTIMATE_FALLBACK,
};
use crate::narrative::{Choice, ChoiceKind, ChoiceMetadata};
use crate::story::{normalize, StoryStateMachine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

pub const MIN_CHOICES: usize = 3;
pub const MAX_CHOICES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceConfig {
    /// Choices per turn, between 3 and 5.
    pub count: usize,
    pub max_text_chars: usize,
    /// Sanity below this surfaces a recovery option.
    pub low_sanity_threshold: i32,
    /// Hit point ratio below this surfaces a recovery option.
    pub low_health_ratio: f64,
    /// Upper bound on the agent call, retries included.
    pub timeout: Duration,
}

impl Default for ChoiceConfig {
    fn default() -> Self {
        Self {
            count: 4,
            max_text_chars: 120,
            low_sanity_threshold: 50,
            low_health_ratio: 0.7,
            timeout: Duration::from_secs(60),
        }
    }
}

impl ChoiceConfig {
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count.clamp(MIN_CHOICES, MAX_CHOICES);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Running counters. They only ever increase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceStats {
    pub total_requests: u64,
    /// Sets made entirely of agent choices.
    pub ai_successes: u64,
    /// Agent sets that had to be topped up with templates.
    #[serde(default)]
    pub ai_partial: u64,
    pub ai_failures: u64,
    pub fallback_uses: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ChoiceGenerator {
    config: ChoiceConfig,
    stats: ChoiceStats,
}

impl ChoiceGenerator {
    pub fn new(config: ChoiceConfig) -> Self {
        Self {
            config: ChoiceConfig {
                count: config.count.clamp(MIN_CHOICES, MAX_CHOICES),
                ..config
            },
            stats: ChoiceStats::default(),
        }
    }

    pub fn config(&self) -> &ChoiceConfig {
        &self.config
    }

    pub fn stats(&self) -> ChoiceStats {
        self.stats
    }

    /// Choices for the current turn, recorded in the story's choice history.
    ///
    /// `agent` is normally the story agent. Pass `None` to force the
    /// deterministic path.
    pub async fn get_current_choices(
        &mut self,
        story: &mut StoryStateMachine,
        agent: Option<&dyn NarrativeAgent>,
        character: &CharacterSnapshot,
    ) -> Vec<Choice> {
        self.stats.total_requests += 1;
        let recent = story.recent_choice_texts(story.config().repetition_window);

        let ai_texts = match agent {
            Some(agent) if agent.is_ready() => self.request_from_agent(story, agent, character, &recent).await,
            Some(agent) => {
                tracing::debug!(agent = agent.name(), "Agent not ready; using fallback choices");
                None
            }
            None => None,
        };

        let choices = match ai_texts {
            Some(texts) => {
                let mut choices = self.build_from_texts(story, &texts);
                if choices.len() >= self.config.count {
                    self.stats.ai_successes += 1;
                } else {
                    self.stats.ai_partial += 1;
                    let taken: HashSet<String> = choices.iter().map(|c| normalize(&c.text)).collect();
                    let extra = self.fallback_templates(story, character, &recent, &taken);
                    let start = choices.len();
                    choices.extend(
                        extra
                            .into_iter()
                            .take(self.config.count - start)
                            .enumerate()
                            .map(|(i, t)| template_choice(story, start + i, t)),
                    );
                }
                choices
            }
            None => {
                self.stats.fallback_uses += 1;
                self.fallback_choices(story, character)
            }
        };

        story.record_presented(&choices);
        choices
    }

    async fn request_from_agent(
        &mut self,
        story: &StoryStateMachine,
        agent: &dyn NarrativeAgent,
        character: &CharacterSnapshot,
        recent: &HashSet<String>,
    ) -> Option<Vec<String>> {
        let mut avoid: Vec<String> = recent.iter().cloned().collect();
        avoid.sort();
        let input = AgentInput::Choices(ChoiceRequest {
            digest: ContextDigest::from_context(story.context(), story.config().repetition_window),
            character: Some(CharacterDigest::from(character)),
            count: self.config.count,
            avoid,
        });

        let response = match tokio::time::timeout(self.config.timeout, agent.process_input(&input)).await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!(timeout = ?self.config.timeout, "Choice generation timed out");
                self.stats.ai_failures += 1;
                return None;
            }
        };

        if response.is_fallback() {
            self.stats.ai_failures += 1;
            return None;
        }
        let AgentOutput::Choices(raw) = response.into_output() else {
            tracing::warn!("Story agent returned a non-choice output");
            self.stats.ai_failures += 1;
            return None;
        };

        let values: Vec<Value> = raw.into_iter().map(Value::String).collect();
        let texts: Vec<String> = sanitize_text_items(&values, self.config.max_text_chars)
            .into_iter()
            .filter(|t| !recent.contains(&normalize(t)))
            .take(self.config.count)
            .collect();

        if texts.is_empty() {
            tracing::debug!("Agent choices were empty or all recently offered");
            self.stats.ai_failures += 1;
            return None;
        }
        Some(texts)
    }

    fn build_from_texts(&self, story: &StoryStateMachine, texts: &[String]) -> Vec<Choice> {
        let location = story.location().as_str().to_string();
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| Choice {
                id: choice_id(story, i),
                text: text.clone(),
                metadata: ChoiceMetadata {
                    location: location.clone(),
                    kind: kind_for_text(text),
                    fallback: false,
                },
            })
            .collect()
    }

    /// Deterministic choices for the current scene and character state.
    pub fn fallback_choices(&self, story: &StoryStateMachine, character: &CharacterSnapshot) -> Vec<Choice> {
        let recent = story.recent_choice_texts(story.config().repetition_window);
        let templates = self.fallback_templates(story, character, &recent, &HashSet::new());
        templates
            .into_iter()
            .take(self.config.count)
            .enumerate()
            .map(|(i, t)| template_choice(story, i, t))
            .collect()
    }

    /// Distinct templates in priority order, recent ones last.
    fn fallback_templates(
        &self,
        story: &StoryStateMachine,
        character: &CharacterSnapshot,
        recent: &HashSet<String>,
        taken: &HashSet<String>,
    ) -> Vec<ChoiceTemplate> {
        let location = story.location();
        let turn = story.turn_number() as usize;
        let mut pool: Vec<ChoiceTemplate> = Vec::new();

        let low_sanity = character.is_low_sanity(self.config.low_sanity_threshold);
        let low_health = character.hit_points.ratio() < self.config.low_health_ratio;
        if low_sanity || low_health {
            pool.push(RECOVERY_CHOICES[turn % RECOVERY_CHOICES.len()]);
        }
        if story.tension().is_high() {
            pool.push(ESCAPE_CHOICES[turn % ESCAPE_CHOICES.len()]);
        }
        pool.extend_from_slice(location.choices());
        pool.extend_from_slice(location.alternate_choices());
        pool.extend_from_slice(GENERAL_CHOICES);
        pool.extend_from_slice(GENERAL_ALTERNATES);

        let mut seen = taken.clone();
        let mut fresh = Vec::new();
        let mut stale = Vec::new();
        for template in pool {
            let key = normalize(template.text);
            if !seen.insert(key.clone()) {
                continue;
            }
            if recent.contains(&key) {
                stale.push(template);
            } else {
                fresh.push(template);
            }
        }

        // Everything was offered recently: rotate so the oldest repeat first.
        if !stale.is_empty() {
            let offset = turn % stale.len();
            stale.rotate_left(offset);
        }
        fresh.extend(stale);

        if fresh.is_empty() && !taken.contains(&normalize(ULTIMATE_FALLBACK.text)) {
            fresh.push(ULTIMATE_FALLBACK);
        }
        if fresh.is_empty() {
            tracing::debug!("No fallback templates left beyond those already taken");
        }
        fresh
    }
}

/// Unique per turn, presentation and position.
fn choice_id(story: &StoryStateMachine, index: usize) -> String {
    format!(
        "choice_{}_{}_{}",
        story.turn_number(),
        story.next_presentation(),
        index + 1
    )
}

fn template_choice(story: &StoryStateMachine, index: usize, template: ChoiceTemplate) -> Choice {
    Choice {
        id: choice_id(story, index),
        text: template.text.to_string(),
        metadata: ChoiceMetadata {
            location: story.location().as_str().to_string(),
            kind: template.kind,
            fallback: true,
        },
    }
}

fn kind_for_text(text: &str) -> ChoiceKind {
    match classify_action(text).action_type {
        ActionType::Investigate => ChoiceKind::Investigate,
        ActionType::Dialogue => ChoiceKind::Dialogue,
        ActionType::Movement => ChoiceKind::Movement,
        ActionType::Other => ChoiceKind::General,
    }
}
