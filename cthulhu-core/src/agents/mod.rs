//! Narrative agents.
//!
//! Five roles share one contract ([`NarrativeAgent`]): story, NPC,
//! environment, rule and memory. The first four are [`LlmAgent`]s that
//! differ only in their [`AgentBehavior`]; the memory agent keeps a local
//! journal and uses the model only for optional summaries.

pub mod environment;
pub mod manager;
pub mod memory;
pub mod npc;
pub mod rule;
pub mod runtime;
pub mod story;

pub use environment::EnvironmentAgent;
pub use manager::{AgentManager, InitReport, RegistryHealth, ShutdownReport};
pub use memory::{MemoryAgent, MemoryConfig, MemoryStore};
pub use npc::NpcAgent;
pub use rule::RuleAgent;
pub use runtime::{
    AgentBehavior, AgentConfig, AgentError, AgentInput, AgentKind, AgentOutput, AgentResponse,
    AgentStats, ChoiceRequest, ContextDigest, CharacterDigest, EnvironmentRequest, LlmAgent,
    MemoryRecall, MemoryRequest, NarrativeAgent, NpcReply, NpcRequest, ResponseSource, RuleRequest,
    RuleRuling, SceneDescription, StoryDraft, StoryRequest, ThreadNote,
};
pub use story::StoryAgent;
