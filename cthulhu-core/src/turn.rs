//! Turn orchestration.
//!
//! [`TurnController::process_player_action`] runs one full turn:
//!
//! 1. classify the action and map it to a skill
//! 2. roll the skill check, plus sanity and fall damage where they apply
//! 3. ask the story agent for narration under the turn timeout
//! 4. apply the outcome to the [`StoryStateMachine`]
//! 5. return a [`TurnResult`]
//!
//! Steps 3 and 4 always complete. A failed, slow or misbehaving agent
//! produces fallback narration, and the turn counter still advances.

use crate::action::{classify_action, ActionAnalysis, ActionType, DEFAULT_SKILL};
use crate::agents::runtime::{
    AgentInput, AgentKind, AgentOutput, CharacterDigest, ContextDigest, EnvironmentRequest,
    MemoryRequest, NarrativeAgent, NpcRequest, RuleRequest, StoryDraft, StoryRequest,
};
use crate::agents::story::fallback_draft;
use crate::agents::AgentManager;
use crate::character::{CharacterError, CharacterSnapshot, Pool};
use crate::choices::{ChoiceConfig, ChoiceGenerator, ChoiceStats};
use crate::dice::{DiceEngine, DiceError, DiceExpression, SanityCheck, SanityLoss, SkillCheck, SkillTier};
use crate::location::is_horror_scene;
use crate::narrative::{Choice, ContentMetadata, ContentSource, StoryContent};
use crate::objectives::{ObjectiveProgress, ObjectiveTracker};
use crate::story::{StoryStateMachine, ThreadChange, TurnSummary, TurnUpdate};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Setup errors. Nothing in a running turn produces one.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Invalid dice configuration: {0}")]
    Dice(#[from] DiceError),

    #[error("Invalid character: {0}")]
    Character(#[from] CharacterError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Budget for all agent calls in one turn.
    pub timeout: Duration,
    /// Sanity loss for horror encounters, as `success/failure`.
    pub sanity_loss: String,
    /// Damage from a fumbled climb, jump or fall.
    pub fall_damage: String,
    /// Ask the rule agent when the fixed tables map no skill.
    pub consult_rule_agent: bool,
    /// Journal entries recalled into the narration prompt.
    pub memory_recall_limit: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            sanity_loss: "1d4/1d8".to_string(),
            fall_damage: "1d3".to_string(),
            consult_rule_agent: false,
            memory_recall_limit: 3,
        }
    }
}

impl TurnConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sanity_loss(mut self, spec: impl Into<String>) -> Self {
        self.sanity_loss = spec.into();
        self
    }

    pub fn with_rule_agent(mut self, consult: bool) -> Self {
        self.consult_rule_agent = consult;
        self
    }
}

/// Derived-state changes for the character collaborator to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterUpdates {
    pub sanity_check: Option<SanityCheck>,
    /// Sanity after the turn, clamped to `[0, maximum]`.
    pub sanity: Pool,
    pub sanity_change: i32,
    pub hit_points: Pool,
    pub hit_point_change: i32,
    pub temporary_insanity: bool,
    /// Sanity reached zero.
    pub madness: bool,
}

impl CharacterUpdates {
    fn unchanged(character: &CharacterSnapshot) -> Self {
        Self {
            sanity_check: None,
            sanity: character.sanity,
            sanity_change: 0,
            hit_points: character.hit_points,
            hit_point_change: 0,
            temporary_insanity: false,
            madness: false,
        }
    }

    fn apply_sanity(&mut self, check: SanityCheck) {
        self.sanity = Pool::new(check.current, check.maximum);
        self.sanity_change = check.current - check.previous;
        self.temporary_insanity = check.temporary_insanity;
        self.madness = check.permanent_insanity;
        self.sanity_check = Some(check);
    }

    fn apply_damage(&mut self, damage: i32) {
        let after = self.hit_points.after_loss(damage);
        self.hit_point_change = after - self.hit_points.current;
        self.hit_points = Pool::new(after, self.hit_points.maximum);
    }

    pub fn is_empty(&self) -> bool {
        self.sanity_change == 0 && self.hit_point_change == 0
    }
}

/// Outcome of one processed action.
#[derive(Debug, Clone)]
pub struct TurnResult {
    turn_number: u32,
    player_action: String,
    story_content: StoryContent,
    success: bool,
    processing_time: Duration,
    action: ActionAnalysis,
    skill: String,
    skill_check: SkillCheck,
    character_updates: CharacterUpdates,
    summary: TurnSummary,
    objectives: ObjectiveProgress,
}

impl TurnResult {
    pub fn turn_number(&self) -> u32 {
        self.turn_number
    }

    pub fn player_action(&self) -> &str {
        &self.player_action
    }

    pub fn story_content(&self) -> &StoryContent {
        &self.story_content
    }

    /// The turn completed. Narrative fallbacks do not make this false.
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn processing_time(&self) -> Duration {
        self.processing_time
    }

    pub fn action(&self) -> &ActionAnalysis {
        &self.action
    }

    pub fn skill(&self) -> &str {
        &self.skill
    }

    pub fn skill_check(&self) -> &SkillCheck {
        &self.skill_check
    }

    pub fn character_updates(&self) -> &CharacterUpdates {
        &self.character_updates
    }

    pub fn summary(&self) -> &TurnSummary {
        &self.summary
    }

    /// Objectives and achievements that changed this turn.
    pub fn objectives(&self) -> &ObjectiveProgress {
        &self.objectives
    }
}

/// Controller counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnStats {
    pub turns_processed: u64,
    pub ai_turns: u64,
    pub fallback_turns: u64,
    pub error_fallback_turns: u64,
    pub total_processing_time: Duration,
}

impl TurnStats {
    pub fn average_turn_time(&self) -> Duration {
        match u32::try_from(self.turns_processed) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_processing_time / n,
        }
    }
}

struct Narration {
    draft: StoryDraft,
    metadata: ContentMetadata,
}

/// Drives turns for one session.
pub struct TurnController {
    story: StoryStateMachine,
    dice: DiceEngine,
    agents: Arc<AgentManager>,
    choices: ChoiceGenerator,
    config: TurnConfig,
    sanity_loss: SanityLoss,
    fall_damage: DiceExpression,
    last_content: Option<StoryContent>,
    objectives: ObjectiveTracker,
    stats: TurnStats,
}

impl TurnController {
    /// Fails only when the configured dice expressions are malformed.
    pub fn new(story: StoryStateMachine, agents: Arc<AgentManager>, config: TurnConfig) -> Result<Self, TurnError> {
        let sanity_loss = SanityLoss::parse(&config.sanity_loss)?;
        let fall_damage = DiceExpression::parse(&config.fall_damage)?;
        let objectives = ObjectiveTracker::for_scene(story.scene_id());
        Ok(Self {
            story,
            dice: DiceEngine::new(),
            agents,
            choices: ChoiceGenerator::default(),
            config,
            sanity_loss,
            fall_damage,
            last_content: None,
            objectives,
            stats: TurnStats::default(),
        })
    }

    pub fn with_dice(mut self, dice: DiceEngine) -> Self {
        self.dice = dice;
        self
    }

    pub fn with_choice_config(mut self, config: ChoiceConfig) -> Self {
        self.choices = ChoiceGenerator::new(config);
        self
    }

    /// Replace the scenario tracker, e.g. with one restored from a save.
    pub fn with_objectives(mut self, objectives: ObjectiveTracker) -> Self {
        self.objectives = objectives;
        self
    }

    pub fn story(&self) -> &StoryStateMachine {
        &self.story
    }

    pub fn story_mut(&mut self) -> &mut StoryStateMachine {
        &mut self.story
    }

    pub fn dice(&self) -> &DiceEngine {
        &self.dice
    }

    pub fn agents(&self) -> &Arc<AgentManager> {
        &self.agents
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    pub fn stats(&self) -> &TurnStats {
        &self.stats
    }

    pub fn objectives(&self) -> &ObjectiveTracker {
        &self.objectives
    }

    pub fn choice_stats(&self) -> ChoiceStats {
        self.choices.stats()
    }

    fn ready_agent(&self, kind: AgentKind) -> Option<Arc<dyn NarrativeAgent>> {
        self.agents.agent_for(kind).filter(|a| a.is_ready())
    }

    /// Choices for the current turn.
    pub async fn get_current_choices(&mut self, character: &CharacterSnapshot) -> Vec<Choice> {
        let agent = self.ready_agent(AgentKind::Story);
        self.choices
            .get_current_choices(&mut self.story, agent.as_deref(), character)
            .await
    }

    /// Narration from the most recent turn, or the opening of the current scene.
    pub fn current_story_content(&self) -> StoryContent {
        match &self.last_content {
            Some(content) if content.scene_id() == self.story.scene_id() => content.clone(),
            _ => StoryContent::new(
                self.story.location().opening_text(),
                self.story.context(),
                ContentMetadata::new(ContentSource::Fallback, "scene_opening")
                    .with_reason("opening narration"),
            ),
        }
    }

    /// Process one player action. Always completes and always advances the
    /// turn counter by one.
    #[tracing::instrument(skip_all, fields(turn = self.story.turn_number() + 1, scene = %self.story.scene_id()))]
    pub async fn process_player_action(&mut self, action: &str, character: &CharacterSnapshot) -> TurnResult {
        let start = Instant::now();
        let action_text = self.resolve_selection(action);
        let analysis = classify_action(&action_text);
        let horror = is_horror_scene(self.story.scene_id());

        // Mechanics
        let (skill, modifier) = self.choose_skill(&analysis).await;
        let (skill, skill_value) = match character.skill_value(&skill) {
            Ok(value) => (skill, value),
            Err(e) => {
                tracing::warn!(error = %e, "Rolling luck instead");
                (DEFAULT_SKILL.to_string(), character.luck)
            }
        };
        let check = self.dice.skill_check(skill_value, modifier);
        tracing::debug!(%skill, roll = check.roll, target = check.target, tier = %check.tier, "Skill check");

        let mut updates = CharacterUpdates::unchanged(character);
        if horror || self.story.tension().is_high() {
            let sanity = self.dice.sanity_check_with(
                character.sanity.current,
                character.sanity.maximum,
                &self.sanity_loss,
            );
            updates.apply_sanity(sanity);
        }
        if analysis.action_type == ActionType::Movement && check.tier == SkillTier::Fumble {
            let damage = self.dice.roll_expression(&self.fall_damage).total.max(0);
            updates.apply_damage(damage);
        }

        // Narrative
        let request = StoryRequest {
            digest: ContextDigest::from_context(self.story.context(), self.story.config().repetition_window),
            character: Some(CharacterDigest::from(character)),
            action: action_text.clone(),
            action_type: analysis.action_type,
            skill: Some(skill.clone()),
            check: Some(check.clone()),
            notes: Vec::new(),
        };
        let narration = self.narrate(request).await;
        match narration.metadata.source {
            ContentSource::Ai => self.stats.ai_turns += 1,
            ContentSource::Fallback => self.stats.fallback_turns += 1,
            ContentSource::ErrorFallback => self.stats.error_fallback_turns += 1,
        }

        // State
        let mut update = TurnUpdate::new(Some(check.tier), horror);
        update.suggested_tension = narration.draft.tension;
        update.new_scene = narration.draft.new_scene.clone();
        update.opportunity_candidates = narration.draft.opportunities.clone();
        update.threads = narration
            .draft
            .threads
            .iter()
            .map(|t| ThreadChange::new(&t.name, t.status).with_detail(&t.detail))
            .collect();
        if updates.temporary_insanity {
            update.flags.push(("temporary_insanity".to_string(), true.into()));
        }
        if updates.madness {
            update.flags.push(("madness".to_string(), true.into()));
        }
        let summary = self.story.apply_turn(update);

        let content = StoryContent::new(narration.draft.text.clone(), self.story.context(), narration.metadata);
        self.remember(&action_text, &content, &check, &updates).await;
        self.last_content = Some(content.clone());

        let processing_time = start.elapsed();
        self.stats.turns_processed += 1;
        self.stats.total_processing_time += processing_time;
        tracing::info!(
            turn = summary.turn_number,
            source = content.source().as_str(),
            tension = %summary.tension_after,
            elapsed = ?processing_time,
            "Turn complete"
        );

        let mut result = TurnResult {
            turn_number: summary.turn_number,
            player_action: action_text,
            story_content: content,
            success: true,
            processing_time,
            action: analysis,
            skill,
            skill_check: check,
            character_updates: updates,
            summary,
            objectives: ObjectiveProgress::default(),
        };
        result.objectives = self.objectives.observe(&result, self.story.context());
        result
    }

    /// Map a numbered or verbatim choice to its text, logging the selection.
    fn resolve_selection(&mut self, action: &str) -> String {
        let trimmed = action.trim();
        let presented: Vec<(String, String)> = self
            .story
            .presented_this_turn()
            .into_iter()
            .map(|r| (r.choice_id.clone(), r.text.clone()))
            .collect();

        let selected = match trimmed.parse::<usize>() {
            Ok(n) => {
                let found = n.checked_sub(1).and_then(|i| presented.get(i));
                if found.is_none() {
                    tracing::warn!(choice = n, available = presented.len(), "No such choice; treating as free text");
                }
                found
            }
            Err(_) => presented.iter().find(|(_, text)| text.eq_ignore_ascii_case(trimmed)),
        };

        match selected {
            Some((id, text)) => {
                self.story.record_selection(id, text);
                text.clone()
            }
            None => trimmed.to_string(),
        }
    }

    async fn choose_skill(&self, analysis: &ActionAnalysis) -> (String, i32) {
        if let Some(skill) = analysis.skill {
            return (skill.to_string(), 0);
        }
        if !self.config.consult_rule_agent {
            return (DEFAULT_SKILL.to_string(), 0);
        }
        let Some(agent) = self.ready_agent(AgentKind::Rule) else {
            return (DEFAULT_SKILL.to_string(), 0);
        };

        let input = AgentInput::Rule(RuleRequest {
            digest: ContextDigest::from_context(self.story.context(), self.story.config().repetition_window),
            action: analysis.original.clone(),
            action_type: analysis.action_type,
        });
        match tokio::time::timeout(self.config.timeout, agent.process_input(&input)).await {
            Ok(response) => match response.into_output() {
                AgentOutput::Rule(ruling) => match ruling.skill {
                    Some(skill) => (skill, ruling.modifier),
                    None => (DEFAULT_SKILL.to_string(), 0),
                },
                _ => (DEFAULT_SKILL.to_string(), 0),
            },
            Err(_) => {
                tracing::warn!("Rule agent timed out");
                (DEFAULT_SKILL.to_string(), 0)
            }
        }
    }

    /// Narration for the turn, never failing.
    async fn narrate(&self, request: StoryRequest) -> Narration {
        let fallback = fallback_draft(&request);
        let Some(agent) = self.ready_agent(AgentKind::Story) else {
            let reason = if self.agents.any_ready() {
                "story agent not ready"
            } else {
                "no agents ready"
            };
            tracing::warn!(reason, "Using fallback narration");
            return Narration {
                draft: fallback,
                metadata: ContentMetadata::new(ContentSource::Fallback, AgentKind::Story.name()).with_reason(reason),
            };
        };

        let work = AssertUnwindSafe(self.consult_story_agent(agent, request)).catch_unwind();
        match tokio::time::timeout(self.config.timeout, work).await {
            Ok(Ok(narration)) => narration,
            Ok(Err(_)) => {
                tracing::error!("Story generation panicked; using error fallback");
                Narration {
                    draft: fallback,
                    metadata: ContentMetadata::new(ContentSource::ErrorFallback, AgentKind::Story.name())
                        .with_reason("story generation panicked"),
                }
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.config.timeout, "Turn timed out; using fallback narration");
                Narration {
                    draft: fallback,
                    metadata: ContentMetadata::new(ContentSource::Fallback, AgentKind::Story.name())
                        .with_reason("turn timed out"),
                }
            }
        }
    }

    async fn consult_story_agent(&self, agent: Arc<dyn NarrativeAgent>, mut request: StoryRequest) -> Narration {
        request.notes = self.gather_notes(&request).await;
        let fallback = fallback_draft(&request);

        let response = agent.process_input(&AgentInput::Story(request)).await;
        let reason = response.metadata().reason.clone();
        let is_fallback = response.is_fallback();
        match response.into_output() {
            AgentOutput::Story(draft) if !is_fallback => Narration {
                draft,
                metadata: ContentMetadata::new(ContentSource::Ai, agent.name()),
            },
            AgentOutput::Story(draft) => {
                let mut metadata = ContentMetadata::new(ContentSource::Fallback, agent.name());
                if let Some(reason) = reason {
                    metadata = metadata.with_reason(reason);
                }
                Narration { draft, metadata }
            }
            other => {
                tracing::error!(agent = agent.name(), output = other.text(), "Story agent returned the wrong output kind");
                Narration {
                    draft: fallback,
                    metadata: ContentMetadata::new(ContentSource::ErrorFallback, agent.name())
                        .with_reason("unexpected output kind"),
                }
            }
        }
    }

    /// Flavor from the memory, NPC and environment agents, when available.
    async fn gather_notes(&self, request: &StoryRequest) -> Vec<String> {
        let mut notes = Vec::new();

        if let Some(memory) = self.ready_agent(AgentKind::Memory) {
            let recall = AgentInput::Memory(MemoryRequest::Recall {
                query: request.action.clone(),
                scene_id: request.digest.scene_id.clone(),
                limit: self.config.memory_recall_limit,
            });
            if let AgentOutput::Memory(found) = memory.process_input(&recall).await.into_output() {
                match found.summary {
                    Some(summary) => notes.push(format!("Remembered: {summary}")),
                    None => notes.extend(found.entries.into_iter().map(|e| format!("Remembered: {e}"))),
                }
            }
        }

        let side_input = match request.action_type {
            ActionType::Dialogue => self.ready_agent(AgentKind::Npc).map(|agent| {
                (
                    agent,
                    AgentInput::Npc(NpcRequest {
                        digest: request.digest.clone(),
                        npc: None,
                        player_line: request.action.clone(),
                    }),
                )
            }),
            ActionType::Movement => self.ready_agent(AgentKind::Environment).map(|agent| {
                (
                    agent,
                    AgentInput::Environment(EnvironmentRequest {
                        digest: request.digest.clone(),
                        focus: None,
                    }),
                )
            }),
            _ => None,
        };
        if let Some((agent, input)) = side_input {
            let response = agent.process_input(&input).await;
            if !response.is_fallback() {
                notes.push(response.content());
            }
        }

        notes
    }

    async fn remember(&self, action: &str, content: &StoryContent, check: &SkillCheck, updates: &CharacterUpdates) {
        let Some(memory) = self.ready_agent(AgentKind::Memory) else {
            return;
        };
        let mut importance: u8 = 5;
        if check.tier >= SkillTier::ExtremeSuccess || check.tier == SkillTier::Fumble {
            importance += 2;
        }
        if is_horror_scene(content.scene_id()) {
            importance += 1;
        }
        if updates.temporary_insanity || updates.madness {
            importance += 2;
        }

        let record = AgentInput::Memory(MemoryRequest::Record {
            turn: self.story.turn_number(),
            scene_id: content.scene_id().to_string(),
            text: format!("{action}: {}", content.text()),
            importance: importance.min(10),
        });
        memory.process_input(&record).await;
    }
}
