//! Testing utilities for the turn engine.
//!
//! - [`ScriptedGenerator`] replays canned model output without network calls
//! - [`OfflineGenerator`] behaves like an unreachable backend
//! - [`TestHarness`] drives whole turns with scripted dice
//! - assertion helpers for common checks

use crate::agents::{
    AgentConfig, AgentManager, EnvironmentAgent, MemoryAgent, MemoryConfig, NpcAgent, StoryAgent,
};
use crate::character::CharacterSnapshot;
use crate::dice::DiceEngine;
use crate::narrative::{Choice, ContentSource};
use crate::story::{StoryConfig, StoryStateMachine};
use crate::turn::{TurnConfig, TurnController, TurnResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use textgen::{Error, GenerateRequest, Generation, TextGenerator, Usage};

/// A generator that returns scripted replies in order.
///
/// Once the script runs out every call fails with [`Error::EmptyContent`].
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, Error>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply.
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.push(Ok(reply.into()));
        self
    }

    /// Queue a failure.
    pub fn with_error(self, error: Error) -> Self {
        self.push(Err(error));
        self
    }

    /// Sleep before every reply. Pair with a paused tokio clock.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(&self, item: Result<String, Error>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Generation, Error> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(Err(Error::EmptyContent));
        next.map(|content| Generation {
            content,
            model: request.options.model.unwrap_or_else(|| "scripted".to_string()),
            usage: Usage::default(),
        })
    }
}

/// A backend that is never reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineGenerator;

#[async_trait]
impl TextGenerator for OfflineGenerator {
    fn name(&self) -> &str {
        "offline"
    }

    async fn connect(&self) -> Result<(), Error> {
        Err(Error::Network("connection refused".to_string()))
    }

    async fn health_check(&self) -> bool {
        false
    }

    async fn generate(&self, _request: GenerateRequest) -> Result<Generation, Error> {
        Err(Error::Network("connection refused".to_string()))
    }
}

/// Drives turns against a controller with scripted dice.
///
/// The harness keeps its own copy of the investigator and applies each
/// turn's updates to it, the way a session does.
pub struct TestHarness {
    pub controller: TurnController,
    pub character: CharacterSnapshot,
}

impl TestHarness {
    /// Story, NPC, environment and memory agents over one shared generator.
    pub async fn new(
        scene: &str,
        generator: Arc<dyn textgen::TextGenerator>,
        rolls: impl Into<Vec<u32>>,
    ) -> Self {
        let config = AgentConfig::default().with_max_retries(1);
        let mut agents = AgentManager::new();
        agents.register_agent(Arc::new(StoryAgent::new(generator.clone(), config.clone())));
        agents.register_agent(Arc::new(NpcAgent::new(generator.clone(), config.clone())));
        agents.register_agent(Arc::new(EnvironmentAgent::new(generator, config)));
        agents.register_agent(Arc::new(MemoryAgent::new(MemoryConfig::default())));
        Self::with_agents(scene, agents, rolls).await
    }

    /// No model at all; every turn is narrated from templates.
    pub async fn offline(scene: &str, rolls: impl Into<Vec<u32>>) -> Self {
        let mut agents = AgentManager::new();
        agents.register_agent(Arc::new(MemoryAgent::new(MemoryConfig::default())));
        Self::with_agents(scene, agents, rolls).await
    }

    pub async fn with_agents(scene: &str, agents: AgentManager, rolls: impl Into<Vec<u32>>) -> Self {
        agents.initialize_all_agents().await;
        let story = StoryStateMachine::new(scene, StoryConfig::default());
        let controller = match TurnController::new(story, Arc::new(agents), TurnConfig::default()) {
            Ok(controller) => controller.with_dice(DiceEngine::scripted(rolls)),
            Err(e) => panic!("default turn config is valid: {e}"),
        };
        Self {
            controller,
            character: CharacterSnapshot::new("Test Investigator")
                .with_occupation("Antiquarian")
                .with_sanity(65, 99)
                .with_hit_points(12, 12)
                .with_skill("spot_hidden", 50),
        }
    }

    pub fn with_character(mut self, character: CharacterSnapshot) -> Self {
        self.character = character;
        self
    }

    /// Run one turn and apply its updates.
    pub async fn act(&mut self, action: &str) -> TurnResult {
        let result = self.controller.process_player_action(action, &self.character).await;
        self.character.sanity = result.character_updates().sanity;
        self.character.hit_points = result.character_updates().hit_points;
        result
    }

    pub async fn choices(&mut self) -> Vec<Choice> {
        self.controller.get_current_choices(&self.character).await
    }

    pub fn turn(&self) -> u32 {
        self.controller.story().turn_number()
    }
}

// ============================================================================
// Assertion helpers
// ============================================================================

#[track_caller]
pub fn assert_source(result: &TurnResult, expected: ContentSource) {
    let actual = result.story_content().source();
    assert_eq!(
        actual, expected,
        "Expected {expected:?} narration, got {actual:?}: {}",
        result.story_content().text()
    );
}

#[track_caller]
pub fn assert_turn(harness: &TestHarness, expected: u32) {
    assert_eq!(harness.turn(), expected, "Expected turn {expected}, got {}", harness.turn());
}

#[track_caller]
pub fn assert_sanity(harness: &TestHarness, current: i32) {
    let actual = harness.character.sanity.current;
    assert_eq!(actual, current, "Expected sanity {current}, got {actual}");
}

/// No two choices share text, ignoring case.
#[track_caller]
pub fn assert_distinct_choices(choices: &[Choice]) {
    let mut seen = std::collections::HashSet::new();
    for choice in choices {
        assert!(
            seen.insert(choice.text.trim().to_lowercase()),
            "Duplicate choice '{}'",
            choice.text
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_generator_replays_in_order() {
        let generator = ScriptedGenerator::new()
            .with_reply("first")
            .with_error(Error::Network("down".into()))
            .with_reply("second");

        let first = generator.generate(GenerateRequest::new("a")).await.unwrap();
        assert_eq!(first.text(), "first");
        assert!(generator.generate(GenerateRequest::new("b")).await.is_err());
        assert_eq!(generator.generate(GenerateRequest::new("c")).await.unwrap().text(), "second");
        assert!(matches!(
            generator.generate(GenerateRequest::new("d")).await,
            Err(Error::EmptyContent)
        ));
        assert_eq!(generator.calls(), 4);
        assert_eq!(generator.prompts(), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_offline_generator_refuses_connection() {
        assert!(OfflineGenerator.connect().await.is_err());
        assert!(!OfflineGenerator.health_check().await);
    }

    #[tokio::test]
    async fn test_harness_applies_updates() {
        // Skill check 40, sanity check 95 fails, loss roll 6.
        let mut harness = TestHarness::offline("basement", vec![40, 95, 6]).await;
        let result = harness.act("Look at the altar").await;

        assert_source(&result, ContentSource::Fallback);
        assert_turn(&harness, 1);
        assert_sanity(&harness, 59);
    }
}
