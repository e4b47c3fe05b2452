//! Scenario objectives and investigator achievements.
//!
//! An [`ObjectiveTracker`] holds the goals of one bundled [`Scenario`] and
//! a fixed set of sanity-themed achievements. The turn controller feeds it
//! every [`TurnResult`]; it reports what changed as [`ObjectiveProgress`].

use crate::narrative::{NarrativeContext, TensionLevel};
use crate::turn::TurnResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Observed turns needed before sanity can count as kept.
const KEEPER_TURNS: u32 = 10;

/// Sanity the investigator must never drop below for the keeper achievement.
const KEEPER_SANITY: i32 = 70;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectiveError {
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),
}

// ============================================================================
// Objectives
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    Investigation,
    Exploration,
    Social,
    Revelation,
    Confrontation,
    Survival,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    #[default]
    Active,
    Completed,
    Failed,
}

/// What completes an objective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Trigger {
    /// A successful action mentioning any of the keywords.
    Keywords(Vec<String>),
    /// The scene id after the turn contains this fragment.
    Scene(String),
    /// Every listed objective is completed.
    Objectives(Vec<String>),
    Any(Vec<Trigger>),
    All(Vec<Trigger>),
}

impl Trigger {
    pub fn keywords(words: &[&str]) -> Self {
        Trigger::Keywords(words.iter().map(|w| w.to_string()).collect())
    }

    pub fn scene(fragment: &str) -> Self {
        Trigger::Scene(fragment.to_string())
    }

    pub fn objectives(ids: &[&str]) -> Self {
        Trigger::Objectives(ids.iter().map(|id| id.to_string()).collect())
    }

    fn is_met(&self, turn: &Observation<'_>, completed: &[&str]) -> bool {
        match self {
            Trigger::Keywords(words) => turn.succeeded && words.iter().any(|w| turn.action.contains(w.as_str())),
            Trigger::Scene(fragment) => turn.scene.contains(fragment.as_str()),
            Trigger::Objectives(ids) => ids.iter().all(|id| completed.contains(&id.as_str())),
            Trigger::Any(triggers) => triggers.iter().any(|t| t.is_met(turn, completed)),
            Trigger::All(triggers) => triggers.iter().all(|t| t.is_met(turn, completed)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub title: String,
    pub description: String,
    pub kind: ObjectiveKind,
    /// Not needed to complete the scenario.
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub status: ObjectiveStatus,
    pub trigger: Trigger,
    /// Turn on which the status last changed.
    #[serde(default)]
    pub resolved_turn: Option<u32>,
}

impl Objective {
    pub fn new(id: &str, title: &str, description: &str, kind: ObjectiveKind, trigger: Trigger) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            kind,
            optional: false,
            status: ObjectiveStatus::Active,
            trigger,
            resolved_turn: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ObjectiveStatus::Active
    }
}

// ============================================================================
// Achievements
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementKind {
    FirstSanityLoss,
    SteadyNerves,
    KeeperOfReason,
    EmbraceOfMadness,
    FirstCase,
    CaseClosed,
}

impl AchievementKind {
    pub const ALL: [AchievementKind; 6] = [
        AchievementKind::FirstSanityLoss,
        AchievementKind::SteadyNerves,
        AchievementKind::KeeperOfReason,
        AchievementKind::EmbraceOfMadness,
        AchievementKind::FirstCase,
        AchievementKind::CaseClosed,
    ];

    pub fn title(self) -> &'static str {
        match self {
            AchievementKind::FirstSanityLoss => "Cracks in the Glass",
            AchievementKind::SteadyNerves => "The Living",
            AchievementKind::KeeperOfReason => "Keeper of Reason",
            AchievementKind::EmbraceOfMadness => "Embrace of Madness",
            AchievementKind::FirstCase => "First Case",
            AchievementKind::CaseClosed => "Case Closed",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AchievementKind::FirstSanityLoss => "Lose sanity for the first time",
            AchievementKind::SteadyNerves => "Pass a sanity check",
            AchievementKind::KeeperOfReason => "Keep sanity at 70 or above for ten turns",
            AchievementKind::EmbraceOfMadness => "Lose your mind entirely",
            AchievementKind::FirstCase => "Complete an investigation objective",
            AchievementKind::CaseClosed => "Complete every required objective of a scenario",
        }
    }
}

impl fmt::Display for AchievementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub kind: AchievementKind,
    pub unlocked_turn: u32,
}

// ============================================================================
// Scenarios
// ============================================================================

/// Bundled investigations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    #[default]
    OldHouse,
    MiskatonicLibrary,
}

impl Scenario {
    /// Pick the scenario a starting scene belongs to.
    pub fn for_scene(scene_id: &str) -> Self {
        let scene = scene_id.to_lowercase();
        if scene.contains("library") || scene.contains("miskatonic") {
            Scenario::MiskatonicLibrary
        } else {
            Scenario::OldHouse
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Scenario::OldHouse => "old_house",
            Scenario::MiskatonicLibrary => "miskatonic_library",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Scenario::OldHouse => "The House on the Hill",
            Scenario::MiskatonicLibrary => "The Secret of Miskatonic University Library",
        }
    }

    pub fn objectives(self) -> Vec<Objective> {
        use ObjectiveKind::*;

        match self {
            Scenario::OldHouse => vec![
                Objective::new(
                    "search_study",
                    "The owner's papers",
                    "Find out what the previous owner was working on",
                    Investigation,
                    Trigger::keywords(&["desk", "diary", "journal", "letter", "papers"]),
                ),
                Objective::new(
                    "find_the_cellar",
                    "Below the house",
                    "Find the way down into the cellar",
                    Exploration,
                    Trigger::Any(vec![Trigger::scene("basement"), Trigger::scene("cellar")]),
                ),
                Objective::new(
                    "strange_symbols",
                    "Strange symbols",
                    "Make sense of the markings scratched into the walls",
                    Revelation,
                    Trigger::keywords(&["symbol", "marking", "carving", "scratch"]),
                )
                .optional(),
                Objective::new(
                    "keep_your_mind",
                    "Keep your mind",
                    "Leave the house with your sanity intact",
                    Survival,
                    Trigger::objectives(&["search_study", "find_the_cellar"]),
                ),
            ],
            Scenario::MiskatonicLibrary => vec![
                Objective::new(
                    "missing_persons",
                    "The missing",
                    "Learn who has disappeared from the library this month",
                    Investigation,
                    Trigger::keywords(&["poster", "missing", "notice", "board"]),
                ),
                Objective::new(
                    "librarian_testimony",
                    "The night librarian",
                    "Hear what the librarian saw in the restricted section",
                    Social,
                    Trigger::keywords(&["librarian"]),
                ),
                Objective::new(
                    "restricted_section",
                    "Behind the locked door",
                    "Reach the restricted section",
                    Exploration,
                    Trigger::scene("restricted"),
                ),
                Objective::new(
                    "forbidden_tome",
                    "The forbidden tome",
                    "Examine the ancient books in the display case",
                    Revelation,
                    Trigger::keywords(&["tome", "necronomicon", "display case", "parchment"]),
                )
                .optional(),
                Objective::new(
                    "secret_passage",
                    "Beneath the stacks",
                    "Find where the footprints lead",
                    Exploration,
                    Trigger::Any(vec![
                        Trigger::keywords(&["passage", "footprint", "stair"]),
                        Trigger::scene("basement"),
                    ]),
                ),
                Objective::new(
                    "ritual_evidence",
                    "Signs of the rite",
                    "Discover evidence of what is being summoned",
                    Investigation,
                    Trigger::keywords(&["ritual", "circle", "incense", "altar"]),
                ),
                Objective::new(
                    "stop_the_ritual",
                    "Close the way",
                    "Stop the ritual before the portal opens fully",
                    Confrontation,
                    Trigger::All(vec![
                        Trigger::Any(vec![Trigger::scene("ritual"), Trigger::scene("chamber")]),
                        Trigger::keywords(&["stop", "disrupt", "interrupt", "close", "break"]),
                    ]),
                ),
                Objective::new(
                    "keep_your_mind",
                    "Keep your mind",
                    "Walk out of the library sane",
                    Survival,
                    Trigger::objectives(&["stop_the_ritual"]),
                ),
            ],
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Scenario {
    type Err = ObjectiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "old_house" => Ok(Scenario::OldHouse),
            "miskatonic_library" | "miskatonic" => Ok(Scenario::MiskatonicLibrary),
            other => Err(ObjectiveError::UnknownScenario(other.to_string())),
        }
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// The parts of a turn objectives react to.
struct Observation<'a> {
    turn: u32,
    action: String,
    scene: &'a str,
    succeeded: bool,
    sanity: i32,
    sanity_lost: bool,
    sanity_check_passed: bool,
    madness: bool,
}

/// What changed on one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveProgress {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub unlocked: Vec<AchievementKind>,
    /// Set on the turn the last required objective completes.
    pub scenario_completed: bool,
}

impl ObjectiveProgress {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.failed.is_empty() && self.unlocked.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveTracker {
    scenario: Scenario,
    objectives: Vec<Objective>,
    #[serde(default)]
    achievements: Vec<Achievement>,
    #[serde(default)]
    turns_observed: u32,
    #[serde(default)]
    lowest_sanity: Option<i32>,
}

impl Default for ObjectiveTracker {
    fn default() -> Self {
        Self::new(Scenario::default())
    }
}

impl ObjectiveTracker {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            objectives: scenario.objectives(),
            achievements: Vec::new(),
            turns_observed: 0,
            lowest_sanity: None,
        }
    }

    pub fn for_scene(scene_id: &str) -> Self {
        Self::new(Scenario::for_scene(scene_id))
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    pub fn objective(&self, id: &str) -> Option<&Objective> {
        self.objectives.iter().find(|o| o.id == id)
    }

    pub fn active(&self) -> impl Iterator<Item = &Objective> {
        self.objectives.iter().filter(|o| o.is_active())
    }

    pub fn achievements(&self) -> &[Achievement] {
        &self.achievements
    }

    pub fn has_achievement(&self, kind: AchievementKind) -> bool {
        self.achievements.iter().any(|a| a.kind == kind)
    }

    /// Every required objective is completed.
    pub fn is_complete(&self) -> bool {
        self.objectives
            .iter()
            .filter(|o| !o.optional)
            .all(|o| o.status == ObjectiveStatus::Completed)
    }

    /// Update from a finished turn. `context` is the state after the turn.
    pub fn observe(&mut self, result: &TurnResult, context: &NarrativeContext) -> ObjectiveProgress {
        let updates = result.character_updates();
        let turn = Observation {
            turn: result.turn_number(),
            action: result.player_action().to_lowercase(),
            scene: &context.scene_id,
            succeeded: result.skill_check().is_success(),
            sanity: updates.sanity.current,
            sanity_lost: updates.sanity_change < 0,
            sanity_check_passed: updates.sanity_check.as_ref().is_some_and(|c| c.check.is_success()),
            madness: updates.madness,
        };
        let progress = self.apply(&turn, context.tension_level);
        if !progress.is_empty() {
            tracing::info!(
                scenario = %self.scenario,
                completed = ?progress.completed,
                failed = ?progress.failed,
                unlocked = ?progress.unlocked,
                "Objective progress"
            );
        }
        progress
    }

    fn apply(&mut self, turn: &Observation<'_>, tension: TensionLevel) -> ObjectiveProgress {
        let mut progress = ObjectiveProgress::default();
        let was_complete = self.is_complete();
        self.turns_observed += 1;
        self.lowest_sanity = Some(self.lowest_sanity.map_or(turn.sanity, |low| low.min(turn.sanity)));

        if turn.madness {
            for objective in self.objectives.iter_mut() {
                if objective.is_active() && objective.kind == ObjectiveKind::Survival {
                    objective.status = ObjectiveStatus::Failed;
                    objective.resolved_turn = Some(turn.turn);
                    progress.failed.push(objective.id.clone());
                }
            }
        }

        // Completing one objective can satisfy another that depends on it.
        loop {
            let completed: Vec<String> = self
                .objectives
                .iter()
                .filter(|o| o.status == ObjectiveStatus::Completed)
                .map(|o| o.id.clone())
                .collect();
            let completed: Vec<&str> = completed.iter().map(String::as_str).collect();

            let Some(index) = self
                .objectives
                .iter()
                .position(|o| o.is_active() && o.trigger.is_met(turn, &completed))
            else {
                break;
            };
            let objective = &mut self.objectives[index];
            objective.status = ObjectiveStatus::Completed;
            objective.resolved_turn = Some(turn.turn);
            progress.completed.push(objective.id.clone());
        }

        progress.scenario_completed = !was_complete && self.is_complete();
        progress.unlocked = self.unlock_achievements(turn, tension, &progress);
        progress
    }

    fn unlock_achievements(
        &mut self,
        turn: &Observation<'_>,
        tension: TensionLevel,
        progress: &ObjectiveProgress,
    ) -> Vec<AchievementKind> {
        let first_case = progress.completed.iter().any(|id| {
            self.objective(id)
                .is_some_and(|o| o.kind == ObjectiveKind::Investigation)
        });
        let kept_reason = self.turns_observed >= KEEPER_TURNS
            && self.lowest_sanity.is_some_and(|low| low >= KEEPER_SANITY);

        let mut unlocked = Vec::new();
        for kind in AchievementKind::ALL {
            if self.has_achievement(kind) {
                continue;
            }
            let earned = match kind {
                AchievementKind::FirstSanityLoss => turn.sanity_lost,
                AchievementKind::SteadyNerves => turn.sanity_check_passed,
                AchievementKind::KeeperOfReason => kept_reason,
                AchievementKind::EmbraceOfMadness => turn.madness,
                AchievementKind::FirstCase => first_case,
                AchievementKind::CaseClosed => progress.scenario_completed,
            };
            if earned {
                tracing::debug!(achievement = %kind, ?tension, "Achievement unlocked");
                self.achievements.push(Achievement {
                    kind,
                    unlocked_turn: turn.turn,
                });
                unlocked.push(kind);
            }
        }
        unlocked
    }
}
