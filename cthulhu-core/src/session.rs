//! GameSession: the high-level entry point for one investigation.
//!
//! Wires a text-generation backend, the five agents, the story state and
//! the turn controller together, and applies each turn's character updates
//! to the session's copy of the investigator.

use crate::agents::{
    AgentConfig, AgentManager, EnvironmentAgent, MemoryAgent, MemoryConfig, NpcAgent,
    RegistryHealth, RuleAgent, ShutdownReport, StoryAgent,
};
use crate::character::CharacterSnapshot;
use crate::choices::ChoiceConfig;
use crate::dice::DiceEngine;
use crate::narrative::{Choice, StoryContent};
use crate::persist::{PersistError, SavedNarrative};
use crate::story::{StoryConfig, StoryStateMachine};
use crate::turn::{TurnConfig, TurnController, TurnError, TurnResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use textgen::{Claude, Ollama, TextGenerator};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Backend error: {0}")]
    Backend(#[from] textgen::Error),

    #[error("Turn setup error: {0}")]
    Turn(#[from] TurnError),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Which text generator narrates the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Claude,
    Ollama,
    /// No model at all; every turn uses deterministic narration.
    Offline,
}

impl FromStr for Backend {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Backend::Claude),
            "ollama" => Ok(Backend::Ollama),
            "offline" | "none" => Ok(Backend::Offline),
            other => Err(SessionError::Config(format!("unknown backend '{other}'"))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Claude => "claude",
            Backend::Ollama => "ollama",
            Backend::Offline => "offline",
        })
    }
}

/// Configuration for a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub scene_id: String,
    pub backend: Backend,
    pub model: Option<String>,
    pub ollama_url: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Seed for reproducible dice.
    pub seed: Option<u64>,
    pub agents: AgentConfig,
    pub story: StoryConfig,
    pub choices: ChoiceConfig,
    pub turn: TurnConfig,
    pub memory: MemoryConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scene_id: "entrance".to_string(),
            backend: Backend::default(),
            model: None,
            ollama_url: None,
            api_key: None,
            seed: None,
            agents: AgentConfig::default(),
            story: StoryConfig::default(),
            choices: ChoiceConfig::default(),
            turn: TurnConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(scene_id: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            ..Self::default()
        }
    }

    /// Read overrides from the environment.
    ///
    /// `CTHULHU_BACKEND`, `CTHULHU_MODEL`, `OLLAMA_URL`, `ANTHROPIC_API_KEY`
    /// and `CTHULHU_TURN_TIMEOUT_SECS` are consulted. Unset variables keep
    /// their defaults.
    pub fn from_env() -> Result<Self, SessionError> {
        let mut config = Self::default();
        if let Ok(backend) = std::env::var("CTHULHU_BACKEND") {
            config.backend = backend.parse()?;
        }
        config.model = std::env::var("CTHULHU_MODEL").ok().filter(|m| !m.is_empty());
        config.ollama_url = std::env::var("OLLAMA_URL").ok().filter(|u| !u.is_empty());
        config.api_key = std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty());
        if let Ok(secs) = std::env::var("CTHULHU_TURN_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| SessionError::Config(format!("invalid CTHULHU_TURN_TIMEOUT_SECS '{secs}'")))?;
            config.turn.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_scene(mut self, scene_id: impl Into<String>) -> Self {
        self.scene_id = scene_id.into();
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn.timeout = timeout;
        self
    }

    pub fn with_agent_config(mut self, agents: AgentConfig) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_turn_config(mut self, turn: TurnConfig) -> Self {
        self.turn = turn;
        self
    }

    /// The configured text generator, or `None` when offline.
    pub fn build_generator(&self) -> Result<Option<Arc<dyn TextGenerator>>, SessionError> {
        let generator: Arc<dyn TextGenerator> = match self.backend {
            Backend::Offline => return Ok(None),
            Backend::Claude => {
                let client = match &self.api_key {
                    Some(key) => Claude::new(key.clone())?,
                    None => Claude::from_env()?,
                };
                match &self.model {
                    Some(model) => Arc::new(client.with_model(model.clone())),
                    None => Arc::new(client),
                }
            }
            Backend::Ollama => {
                let client = match &self.ollama_url {
                    Some(url) => Ollama::with_base_url(url.clone())?,
                    None => Ollama::new()?,
                };
                match &self.model {
                    Some(model) => Arc::new(client.with_model(model.clone())),
                    None => Arc::new(client),
                }
            }
        };
        Ok(Some(generator))
    }
}

/// Register the five agents. Without a generator only the journal is
/// available and narration falls back to templates.
pub fn build_agents(
    generator: Option<Arc<dyn TextGenerator>>,
    agent_config: &AgentConfig,
    memory_config: &MemoryConfig,
) -> AgentManager {
    let mut manager = AgentManager::new();
    match generator {
        Some(generator) => {
            manager.register_agent(Arc::new(StoryAgent::new(generator.clone(), agent_config.clone())));
            manager.register_agent(Arc::new(NpcAgent::new(generator.clone(), agent_config.clone())));
            manager.register_agent(Arc::new(EnvironmentAgent::new(generator.clone(), agent_config.clone())));
            manager.register_agent(Arc::new(RuleAgent::new(generator.clone(), agent_config.clone())));
            manager.register_agent(Arc::new(
                MemoryAgent::new(memory_config.clone()).with_summaries(generator, agent_config.clone()),
            ));
        }
        None => {
            manager.register_agent(Arc::new(MemoryAgent::new(memory_config.clone())));
        }
    }
    manager
}

/// One investigator's session.
pub struct GameSession {
    controller: TurnController,
    character: CharacterSnapshot,
    config: SessionConfig,
}

impl GameSession {
    /// Create a session using the configured backend.
    pub async fn new(config: SessionConfig, character: CharacterSnapshot) -> Result<Self, SessionError> {
        let generator = config.build_generator()?;
        Self::with_generator(config, character, generator).await
    }

    /// Create a session around an existing generator.
    pub async fn with_generator(
        config: SessionConfig,
        character: CharacterSnapshot,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Result<Self, SessionError> {
        let story = StoryStateMachine::new(config.scene_id.clone(), config.story.clone());
        Self::assemble(config, character, generator, story).await
    }

    /// Resume from a save file.
    pub async fn load(
        path: impl AsRef<Path>,
        config: SessionConfig,
        character: CharacterSnapshot,
    ) -> Result<Self, SessionError> {
        let saved = SavedNarrative::load_json(path).await?;
        let generator = config.build_generator()?;
        let story = StoryStateMachine::from_context(saved.context, config.story.clone());
        let mut session = Self::assemble(config, character, generator, story).await?;
        if let Some(objectives) = saved.objectives {
            session.controller = session.controller.with_objectives(objectives);
        }
        Ok(session)
    }

    async fn assemble(
        config: SessionConfig,
        character: CharacterSnapshot,
        generator: Option<Arc<dyn TextGenerator>>,
        story: StoryStateMachine,
    ) -> Result<Self, SessionError> {
        let agents = build_agents(generator, &config.agents, &config.memory);
        let report = agents.initialize_all_agents().await;
        for (name, error) in &report.failed {
            tracing::warn!(agent = %name, %error, "Agent unavailable for this session");
        }

        let dice = match config.seed {
            Some(seed) => DiceEngine::seeded(seed),
            None => DiceEngine::new(),
        };
        let controller = TurnController::new(story, Arc::new(agents), config.turn.clone())?
            .with_dice(dice)
            .with_choice_config(config.choices.clone());

        tracing::info!(
            scene = %config.scene_id,
            backend = %config.backend,
            ready = report.ready.len(),
            "Session started"
        );
        Ok(Self {
            controller,
            character,
            config,
        })
    }

    /// Process an action and apply its character updates.
    pub async fn player_action(&mut self, action: &str) -> TurnResult {
        let result = self.controller.process_player_action(action, &self.character).await;
        let updates = result.character_updates();
        self.character.sanity = updates.sanity;
        self.character.hit_points = updates.hit_points;
        result
    }

    pub async fn choices(&mut self) -> Vec<Choice> {
        self.controller.get_current_choices(&self.character).await
    }

    pub fn current_story_content(&self) -> StoryContent {
        self.controller.current_story_content()
    }

    pub fn character(&self) -> &CharacterSnapshot {
        &self.character
    }

    /// Replace the investigator, e.g. after the character sheet changes.
    pub fn set_character(&mut self, character: CharacterSnapshot) {
        self.character = character;
    }

    pub fn controller(&self) -> &TurnController {
        &self.controller
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn health(&self) -> RegistryHealth {
        self.controller.agents().health()
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        SavedNarrative::new(self.controller.story().context().clone())
            .with_objectives(self.controller.objectives().clone())
            .save_json(path)
            .await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> ShutdownReport {
        self.controller.agents().shutdown().await
    }
}
