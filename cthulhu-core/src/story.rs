//! Per-session story state machine.
//!
//! Owns the [`NarrativeContext`] and applies one [`TurnUpdate`] per
//! processed action: the turn counter advances, tension moves at most one
//! step, threads are introduced or advanced, and investigation leads are
//! refreshed against a sliding anti-repetition window.

use crate::dice::SkillTier;
use crate::location::{leads_for_scene, Location};
use crate::narrative::{
    Choice, ChoiceRecord, FlagValue, NarrativeContext, OpportunitySet, TensionLevel, ThreadStatus,
    ThreadUpdate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoryError {
    #[error("Story thread name cannot be empty")]
    EmptyThreadName,

    #[error("Unknown story thread: {0}")]
    UnknownThread(String),

    #[error("Flag name cannot be empty")]
    EmptyFlagName,
}

/// Tuning for opportunity refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryConfig {
    /// Turns an opportunity stays suppressed after being offered.
    pub repetition_window: usize,
    pub min_opportunities: usize,
    pub max_opportunities: usize,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            repetition_window: 3,
            min_opportunities: 3,
            max_opportunities: 5,
        }
    }
}

impl StoryConfig {
    pub fn with_repetition_window(mut self, turns: usize) -> Self {
        self.repetition_window = turns;
        self
    }

    pub fn with_opportunity_range(mut self, min: usize, max: usize) -> Self {
        self.min_opportunities = min;
        self.max_opportunities = max.max(min);
        self
    }
}

/// A thread change proposed by a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadChange {
    pub name: String,
    pub status: ThreadStatus,
    pub detail: String,
}

impl ThreadChange {
    pub fn new(name: impl Into<String>, status: ThreadStatus) -> Self {
        Self {
            name: name.into(),
            status,
            detail: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Everything a completed turn feeds back into the story state.
#[derive(Debug, Clone, Default)]
pub struct TurnUpdate {
    /// Tier of the turn's skill check, if one was rolled.
    pub outcome: Option<SkillTier>,
    pub horror_adjacent: bool,
    /// Tension the narrator suggested for the next beat.
    pub suggested_tension: Option<TensionLevel>,
    pub threads: Vec<ThreadChange>,
    pub opportunity_candidates: Vec<String>,
    pub new_scene: Option<String>,
    pub flags: Vec<(String, FlagValue)>,
}

impl TurnUpdate {
    pub fn new(outcome: Option<SkillTier>, horror_adjacent: bool) -> Self {
        Self {
            outcome,
            horror_adjacent,
            ..Self::default()
        }
    }
}

/// What [`StoryStateMachine::apply_turn`] changed.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSummary {
    pub turn_number: u32,
    pub tension_before: TensionLevel,
    pub tension_after: TensionLevel,
    pub threads_introduced: Vec<String>,
    pub threads_advanced: Vec<String>,
    pub opportunities: Vec<String>,
}

pub(crate) fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Single owner of a session's narrative context.
#[derive(Debug, Clone)]
pub struct StoryStateMachine {
    context: NarrativeContext,
    config: StoryConfig,
}

impl StoryStateMachine {
    pub fn new(scene_id: impl Into<String>, config: StoryConfig) -> Self {
        Self::from_context(NarrativeContext::new(scene_id), config)
    }

    /// Resume from a saved context.
    pub fn from_context(context: NarrativeContext, config: StoryConfig) -> Self {
        Self { context, config }
    }

    pub fn context(&self) -> &NarrativeContext {
        &self.context
    }

    pub fn into_context(self) -> NarrativeContext {
        self.context
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    pub fn turn_number(&self) -> u32 {
        self.context.turn_number
    }

    pub fn tension(&self) -> TensionLevel {
        self.context.tension_level
    }

    pub fn scene_id(&self) -> &str {
        &self.context.scene_id
    }

    pub fn location(&self) -> Location {
        Location::from_scene(&self.context.scene_id)
    }

    // ========================================================================
    // Tension
    // ========================================================================

    pub fn escalate(&mut self) -> TensionLevel {
        self.context.tension_level = self.context.tension_level.escalate();
        self.context.tension_level
    }

    pub fn deescalate(&mut self) -> TensionLevel {
        self.context.tension_level = self.context.tension_level.deescalate();
        self.context.tension_level
    }

    pub fn set_tension(&mut self, level: TensionLevel) {
        self.context.tension_level = level;
    }

    /// Tension after a resolved outcome.
    ///
    /// Success in a horror-adjacent scene escalates, success elsewhere
    /// de-escalates. A failure holds, then moves one step toward any
    /// suggestion.
    fn next_tension(&self, update: &TurnUpdate) -> TensionLevel {
        let current = self.context.tension_level;
        match update.outcome.map(SkillTier::is_success) {
            Some(true) if update.horror_adjacent => current.escalate(),
            Some(true) => current.deescalate(),
            _ => match update.suggested_tension {
                Some(target) => current.step_toward(target),
                None => current,
            },
        }
    }

    // ========================================================================
    // Threads and flags
    // ========================================================================

    pub fn upsert_thread(
        &mut self,
        name: &str,
        status: ThreadStatus,
        detail: &str,
    ) -> Result<ThreadUpdate, StoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoryError::EmptyThreadName);
        }
        let turn = self.context.turn_number;
        Ok(self.context.story_threads.upsert(name, status, detail, turn))
    }

    pub fn resolve_thread(&mut self, name: &str) -> Result<(), StoryError> {
        if !self.context.story_threads.contains(name) {
            return Err(StoryError::UnknownThread(name.to_string()));
        }
        self.upsert_thread(name, ThreadStatus::Resolved, "")?;
        Ok(())
    }

    pub fn set_flag(&mut self, name: &str, value: impl Into<FlagValue>) -> Result<(), StoryError> {
        if name.trim().is_empty() {
            return Err(StoryError::EmptyFlagName);
        }
        self.context
            .narrative_flags
            .insert(name.trim().to_string(), value.into());
        Ok(())
    }

    /// Flip a boolean flag, returning its new value.
    pub fn toggle_flag(&mut self, name: &str) -> bool {
        let next = !self.context.flag(name);
        self.context
            .narrative_flags
            .insert(name.to_string(), FlagValue::Bool(next));
        next
    }

    pub fn change_scene(&mut self, scene_id: impl Into<String>) {
        let scene_id = scene_id.into();
        if scene_id != self.context.scene_id {
            tracing::info!(from = %self.context.scene_id, to = %scene_id, "Scene change");
            self.context.scene_id = scene_id;
        }
    }

    // ========================================================================
    // Investigation opportunities
    // ========================================================================

    /// Opportunities offered within the repetition window.
    fn recent_opportunities(&self) -> HashSet<String> {
        let window = self.config.repetition_window;
        self.context
            .opportunity_log
            .iter()
            .rev()
            .take(window)
            .flat_map(|set| set.items.iter().map(|item| normalize(item)))
            .collect()
    }

    /// Choose this turn's opportunities from the proposed candidates.
    ///
    /// Candidates offered within the last K turns are dropped. The set is
    /// capped at the maximum and topped up to the minimum from the
    /// location's deterministic leads. Only when every lead was offered
    /// recently are the oldest ones repeated.
    pub fn refresh_opportunities(&mut self, candidates: &[String]) -> Vec<String> {
        let recent = self.recent_opportunities();
        let min = self.config.min_opportunities;
        let max = self.config.max_opportunities.max(min);

        let mut chosen: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut offer = |item: &str, chosen: &mut Vec<String>, allow_recent: bool| {
            let key = normalize(item);
            if key.is_empty() || seen.contains(&key) || (!allow_recent && recent.contains(&key)) {
                return;
            }
            seen.insert(key);
            chosen.push(item.trim().to_string());
        };

        for candidate in candidates {
            if chosen.len() >= max {
                break;
            }
            offer(candidate, &mut chosen, false);
        }

        let suppressed = candidates.len().saturating_sub(chosen.len());
        if suppressed > 0 {
            tracing::debug!(suppressed, "Dropped repeated investigation candidates");
        }

        if chosen.len() < min {
            for lead in leads_for_scene(&self.context.scene_id) {
                if chosen.len() >= min {
                    break;
                }
                offer(lead, &mut chosen, false);
            }
        }

        if chosen.len() < min {
            // Pool exhausted: repeat the least recently offered.
            let mut fallback: Vec<String> = self
                .context
                .opportunity_log
                .iter()
                .flat_map(|set| set.items.iter().cloned())
                .collect();
            fallback.extend(leads_for_scene(&self.context.scene_id).into_iter().map(String::from));
            for item in &fallback {
                if chosen.len() >= min {
                    break;
                }
                offer(item, &mut chosen, true);
            }
        }

        self.context.investigation_opportunities = chosen.clone();
        self.context.opportunity_log.push(OpportunitySet {
            turn: self.context.turn_number,
            items: chosen.clone(),
        });
        let keep = self.config.repetition_window.max(1);
        if self.context.opportunity_log.len() > keep {
            let excess = self.context.opportunity_log.len() - keep;
            self.context.opportunity_log.drain(..excess);
        }
        chosen
    }

    // ========================================================================
    // Choice history
    // ========================================================================

    /// Log the choices shown for the current turn as a new presentation.
    pub fn record_presented(&mut self, choices: &[Choice]) {
        let turn = self.context.turn_number;
        let presentation = self.next_presentation();
        self.context
            .choice_history
            .extend(choices.iter().map(|choice| ChoiceRecord {
                turn,
                choice_id: choice.id.clone(),
                text: choice.text.clone(),
                selected: false,
                presentation,
            }));
    }

    /// Log that the player picked a choice.
    pub fn record_selection(&mut self, choice_id: &str, text: &str) {
        let presentation = self.latest_presentation().unwrap_or(0);
        self.context.choice_history.push(ChoiceRecord {
            turn: self.context.turn_number,
            choice_id: choice_id.to_string(),
            text: text.to_string(),
            selected: true,
            presentation,
        });
    }

    /// Sequence number the next set shown on this turn will carry.
    pub fn next_presentation(&self) -> u32 {
        self.latest_presentation().map_or(1, |p| p + 1)
    }

    fn latest_presentation(&self) -> Option<u32> {
        let turn = self.context.turn_number;
        self.context
            .choice_history
            .iter()
            .rev()
            .take_while(|r| r.turn == turn)
            .filter(|r| !r.selected)
            .map(|r| r.presentation)
            .max()
    }

    /// The most recently presented set on the current turn, in order.
    pub fn presented_this_turn(&self) -> Vec<&ChoiceRecord> {
        let turn = self.context.turn_number;
        let Some(latest) = self.latest_presentation() else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        self.context
            .choice_history
            .iter()
            .filter(|r| r.turn == turn && !r.selected && r.presentation == latest)
            .filter(|r| seen.insert(r.choice_id.as_str()))
            .collect()
    }

    /// Normalized texts of choices presented within the last `window` turns.
    pub fn recent_choice_texts(&self, window: usize) -> HashSet<String> {
        let current = self.context.turn_number as usize;
        self.context
            .choice_history
            .iter()
            .rev()
            .take_while(|r| r.turn as usize + window > current)
            .map(|r| normalize(&r.text))
            .collect()
    }

    // ========================================================================
    // Turn application
    // ========================================================================

    /// Apply a completed turn.
    ///
    /// Always advances the turn counter by one. Invalid thread changes are
    /// logged and skipped so a bad narrator response cannot stall the story.
    pub fn apply_turn(&mut self, update: TurnUpdate) -> TurnSummary {
        self.context.turn_number += 1;
        let tension_before = self.context.tension_level;
        self.context.tension_level = self.next_tension(&update);

        if let Some(scene) = update.new_scene.as_deref() {
            if !scene.trim().is_empty() {
                self.change_scene(scene.trim());
            }
        }

        let mut threads_introduced = Vec::new();
        let mut threads_advanced = Vec::new();
        for change in &update.threads {
            match self.upsert_thread(&change.name, change.status, &change.detail) {
                Ok(ThreadUpdate::Introduced) => threads_introduced.push(change.name.trim().to_string()),
                Ok(ThreadUpdate::Advanced) => threads_advanced.push(change.name.trim().to_string()),
                Ok(ThreadUpdate::Unchanged) => {}
                Err(e) => tracing::warn!(error = %e, "Skipping invalid thread change"),
            }
        }

        for (name, value) in update.flags {
            if let Err(e) = self.set_flag(&name, value) {
                tracing::warn!(error = %e, "Skipping invalid flag");
            }
        }

        let opportunities = self.refresh_opportunities(&update.opportunity_candidates);

        tracing::debug!(
            turn = self.context.turn_number,
            tension_before = %tension_before,
            tension_after = %self.context.tension_level,
            introduced = threads_introduced.len(),
            "Story state updated"
        );

        TurnSummary {
            turn_number: self.context.turn_number,
            tension_before,
            tension_after: self.context.tension_level,
            threads_introduced,
            threads_advanced,
            opportunities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrative::{ChoiceKind, ChoiceMetadata};

    fn machine(scene: &str) -> StoryStateMachine {
        StoryStateMachine::new(scene, StoryConfig::default())
    }

    #[test]
    fn test_turn_advances_by_one() {
        let mut story = machine("scene_004_study");
        for expected in 1..=4 {
            let summary = story.apply_turn(TurnUpdate::default());
            assert_eq!(summary.turn_number, expected);
        }
    }

    #[test]
    fn test_horror_success_escalates() {
        let mut story = machine("scene_005_basement");
        story.apply_turn(TurnUpdate::new(Some(SkillTier::HardSuccess), true));
        assert_eq!(story.tension(), TensionLevel::Uneasy);
    }

    #[test]
    fn test_calm_success_deescalates_and_clamps() {
        let mut story = machine("scene_004_study");
        story.set_tension(TensionLevel::Uneasy);
        story.apply_turn(TurnUpdate::new(Some(SkillTier::Success), false));
        assert_eq!(story.tension(), TensionLevel::Calm);
        story.apply_turn(TurnUpdate::new(Some(SkillTier::Success), false));
        assert_eq!(story.tension(), TensionLevel::Calm);
    }

    #[test]
    fn test_escalation_clamps_at_cosmic_horror() {
        let mut story = machine("ritual_chamber");
        story.set_tension(TensionLevel::CosmicHorror);
        story.apply_turn(TurnUpdate::new(Some(SkillTier::CriticalSuccess), true));
        assert_eq!(story.tension(), TensionLevel::CosmicHorror);
    }

    #[test]
    fn test_failure_steps_toward_suggestion() {
        let mut story = machine("scene_004_study");
        let mut update = TurnUpdate::new(Some(SkillTier::Failure), false);
        update.suggested_tension = Some(TensionLevel::CosmicHorror);
        story.apply_turn(update);
        assert_eq!(story.tension(), TensionLevel::Uneasy);
    }

    #[test]
    fn test_thread_reintroduction_updates_status() {
        let mut story = machine("scene_004_study");
        assert_eq!(
            story.upsert_thread("missing_uncle", ThreadStatus::Open, "").unwrap(),
            ThreadUpdate::Introduced
        );
        let mut update = TurnUpdate::default();
        update.threads = vec![
            ThreadChange::new("missing_uncle", ThreadStatus::Progressing).with_detail("a letter"),
            ThreadChange::new("   ", ThreadStatus::Open),
        ];
        let summary = story.apply_turn(update);

        assert_eq!(summary.threads_advanced, vec!["missing_uncle"]);
        assert_eq!(story.context().story_threads.len(), 1);
        assert_eq!(
            story.upsert_thread("", ThreadStatus::Open, ""),
            Err(StoryError::EmptyThreadName)
        );
    }

    #[test]
    fn test_resolve_thread() {
        let mut story = machine("scene_004_study");
        assert_eq!(
            story.resolve_thread("nothing"),
            Err(StoryError::UnknownThread("nothing".into()))
        );
        story.upsert_thread("cult", ThreadStatus::Open, "").unwrap();
        story.resolve_thread("cult").unwrap();
        assert_eq!(
            story.context().story_threads.get("cult").unwrap().status,
            ThreadStatus::Resolved
        );
    }

    #[test]
    fn test_flags() {
        let mut story = machine("scene_004_study");
        story.set_flag("found_key", true).unwrap();
        assert!(story.context().flag("found_key"));
        assert!(!story.toggle_flag("found_key"));
        assert!(story.toggle_flag("heard_chant"));
        assert_eq!(story.set_flag(" ", 1i64), Err(StoryError::EmptyFlagName));
    }

    #[test]
    fn test_refresh_suppresses_recent_and_tops_up() {
        let mut story = machine("scene_004_study");
        let first = story.refresh_opportunities(&["Check the desk".into(), "Read the diary".into()]);
        assert!(first.len() >= 3);
        assert_eq!(&first[..2], ["Check the desk", "Read the diary"]);

        let second = story.refresh_opportunities(&["check the desk".into(), "Open the safe".into()]);
        assert!(!second.iter().any(|s| s == "check the desk"));
        assert!(second.contains(&"Open the safe".to_string()));
        assert!(second.len() >= 3);
    }

    #[test]
    fn test_refresh_caps_at_maximum() {
        let mut story = machine("scene_004_study");
        let candidates: Vec<String> = (0..10).map(|i| format!("Lead {i}")).collect();
        assert_eq!(story.refresh_opportunities(&candidates).len(), 5);
    }

    #[test]
    fn test_three_refreshes_do_not_repeat() {
        let mut story = machine("scene_004_study");
        let mut all = Vec::new();
        for _ in 0..3 {
            all.extend(story.refresh_opportunities(&[]));
        }
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }

    #[test]
    fn test_exhausted_pool_repeats_oldest() {
        let config = StoryConfig::default()
            .with_repetition_window(50)
            .with_opportunity_range(5, 5);
        let mut story = StoryStateMachine::new("nowhere", config);
        for _ in 0..10 {
            assert_eq!(story.refresh_opportunities(&[]).len(), 5);
        }
    }

    #[test]
    fn test_choice_history_window() {
        let mut story = machine("scene_004_study");
        let choice = Choice {
            id: "choice_1".into(),
            text: "Search the desk drawers".into(),
            metadata: ChoiceMetadata {
                location: "study".into(),
                kind: ChoiceKind::Investigate,
                fallback: true,
            },
        };
        story.record_presented(std::slice::from_ref(&choice));
        assert_eq!(story.presented_this_turn().len(), 1);
        assert!(story.recent_choice_texts(3).contains("search the desk drawers"));

        for _ in 0..3 {
            story.apply_turn(TurnUpdate::default());
        }
        assert!(story.recent_choice_texts(3).is_empty());
        assert!(story.presented_this_turn().is_empty());
        assert_eq!(story.context().choice_history.len(), 1);
    }

    #[test]
    fn test_latest_presentation_wins() {
        let mut story = machine("scene_004_study");
        let choice = |id: &str, text: &str| Choice {
            id: id.into(),
            text: text.into(),
            metadata: ChoiceMetadata {
                location: "study".into(),
                kind: ChoiceKind::Investigate,
                fallback: true,
            },
        };

        assert_eq!(story.next_presentation(), 1);
        story.record_presented(&[choice("a1", "Search the desk"), choice("a2", "Read the diary")]);
        assert_eq!(story.next_presentation(), 2);
        story.record_presented(&[choice("b1", "Open the window"), choice("b2", "Check the clock")]);

        let texts: Vec<&str> = story.presented_this_turn().iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["Open the window", "Check the clock"]);

        story.record_selection("b2", "Check the clock");
        assert_eq!(story.context().choice_history.last().map(|r| r.presentation), Some(2));

        story.apply_turn(TurnUpdate::default());
        assert_eq!(story.next_presentation(), 1);
    }
}
