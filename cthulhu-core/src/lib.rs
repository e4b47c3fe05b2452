//! Turn engine for AI-narrated solo Call of Cthulhu investigations.
//!
//! This crate provides:
//! - Percentile dice, skill checks and sanity rolls
//! - Five narrative agents (story, NPC, environment, rule, memory)
//! - A story state machine tracking tension, threads and opportunities
//! - Choice generation that avoids repeating recent options
//! - A turn controller that always produces narration, with or without a model
//! - Scenario objectives and sanity-themed achievements
//!
//! # Quick Start
//!
//! ```ignore
//! use cthulhu_core::{Backend, CharacterSnapshot, GameSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new("old_house_entrance").with_backend(Backend::Ollama);
//!     let investigator = CharacterSnapshot::new("Harvey Walters").with_occupation("Professor");
//!
//!     let mut session = GameSession::new(config, investigator).await?;
//!     let result = session.player_action("Examine the front door").await;
//!     println!("{}", result.story_content().text());
//!
//!     session.save("harvey.json").await?;
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod agents;
pub mod character;
pub mod choices;
pub mod dice;
pub mod location;
pub mod narrative;
pub mod objectives;
pub mod persist;
pub mod session;
pub mod story;
pub mod testing;
pub mod turn;

// Primary public API
pub use action::{classify_action, ActionAnalysis, ActionType};
pub use agents::{AgentConfig, AgentKind, AgentManager, NarrativeAgent};
pub use character::{CharacterSnapshot, Pool};
pub use choices::{ChoiceConfig, ChoiceGenerator};
pub use dice::{DiceEngine, SkillCheck, SkillTier};
pub use narrative::{Choice, ContentSource, NarrativeContext, StoryContent, TensionLevel};
pub use objectives::{ObjectiveTracker, Scenario};
pub use persist::SavedNarrative;
pub use session::{Backend, GameSession, SessionConfig, SessionError};
pub use story::{StoryConfig, StoryStateMachine};
pub use testing::{ScriptedGenerator, TestHarness};
pub use turn::{TurnConfig, TurnController, TurnResult};
