//! Registry of narrative agents.
//!
//! Agents initialize and shut down concurrently and independently. One
//! agent failing to start never blocks the others; the outcome is reported
//! as partial readiness instead of an error.

use super::runtime::{AgentKind, AgentStats, NarrativeAgent};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of [`AgentManager::initialize_all_agents`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    pub ready: Vec<String>,
    /// Agent name and error message.
    pub failed: Vec<(String, String)>,
}

impl InitReport {
    pub fn all_ready(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of [`AgentManager::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub stopped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub name: String,
    pub kind: AgentKind,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryHealth {
    pub registered: usize,
    pub ready: usize,
    pub agents: Vec<AgentHealth>,
}

/// Name to agent registry.
#[derive(Default)]
pub struct AgentManager {
    agents: BTreeMap<String, Arc<dyn NarrativeAgent>>,
}

impl AgentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its own name, returning any agent it replaced.
    pub fn register_agent(&mut self, agent: Arc<dyn NarrativeAgent>) -> Option<Arc<dyn NarrativeAgent>> {
        let name = agent.name().to_string();
        tracing::debug!(agent = %name, "Registering agent");
        let previous = self.agents.insert(name.clone(), agent);
        if previous.is_some() {
            tracing::warn!(agent = %name, "Replaced previously registered agent");
        }
        previous
    }

    /// The registered instance for `name`.
    pub fn get_agent(&self, name: &str) -> Option<Arc<dyn NarrativeAgent>> {
        self.agents.get(name).cloned()
    }

    pub fn agent_for(&self, kind: AgentKind) -> Option<Arc<dyn NarrativeAgent>> {
        self.get_agent(kind.name())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Initialize every agent concurrently.
    pub async fn initialize_all_agents(&self) -> InitReport {
        let results = join_all(self.agents.iter().map(|(name, agent)| async move {
            (name.clone(), agent.initialize().await)
        }))
        .await;

        let mut report = InitReport::default();
        for (name, result) in results {
            match result {
                Ok(()) => report.ready.push(name),
                Err(e) => report.failed.push((name, e.to_string())),
            }
        }

        if report.failed.is_empty() {
            tracing::info!(ready = report.ready.len(), "All agents initialized");
        } else {
            tracing::warn!(
                ready = report.ready.len(),
                failed = report.failed.len(),
                "Some agents failed to initialize; their requests will use fallbacks"
            );
        }
        report
    }

    /// Shut every agent down. Failures are logged and reported, never raised.
    pub async fn shutdown(&self) -> ShutdownReport {
        let results = join_all(self.agents.iter().map(|(name, agent)| async move {
            (name.clone(), agent.shutdown().await)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (name, result) in results {
            match result {
                Ok(()) => report.stopped.push(name),
                Err(e) => {
                    tracing::error!(agent = %name, error = %e, "Agent shutdown failed");
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        tracing::info!(stopped = report.stopped.len(), failed = report.failed.len(), "Agents shut down");
        report
    }

    pub fn health(&self) -> RegistryHealth {
        let agents: Vec<AgentHealth> = self
            .agents
            .values()
            .map(|agent| AgentHealth {
                name: agent.name().to_string(),
                kind: agent.kind(),
                ready: agent.is_ready(),
            })
            .collect();
        RegistryHealth {
            registered: agents.len(),
            ready: agents.iter().filter(|a| a.ready).count(),
            agents,
        }
    }

    pub fn any_ready(&self) -> bool {
        self.agents.values().any(|a| a.is_ready())
    }

    pub fn performance_stats(&self) -> Vec<AgentStats> {
        self.agents.values().map(|a| a.stats()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::runtime::{AgentConfig, AgentError, AgentInput, AgentResponse};
    use crate::agents::StoryAgent;
    use crate::testing::ScriptedGenerator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct BrokenAgent {
        ready: AtomicBool,
    }

    #[async_trait]
    impl NarrativeAgent for BrokenAgent {
        fn name(&self) -> &str {
            "npc_agent"
        }

        fn kind(&self) -> AgentKind {
            AgentKind::Npc
        }

        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::Acquire)
        }

        async fn initialize(&self) -> Result<(), AgentError> {
            Err(AgentError::NotReady("npc_agent".to_string()))
        }

        async fn shutdown(&self) -> Result<(), AgentError> {
            Err(AgentError::NotReady("npc_agent".to_string()))
        }

        async fn process_input(&self, input: &AgentInput) -> AgentResponse {
            AgentResponse::fallback(
                self.name(),
                crate::agents::runtime::generic_fallback(input),
                "broken",
                0,
                std::time::Duration::ZERO,
            )
        }

        fn stats(&self) -> AgentStats {
            AgentStats::default()
        }
    }

    fn manager() -> (AgentManager, Arc<dyn NarrativeAgent>) {
        let story: Arc<dyn NarrativeAgent> = Arc::new(StoryAgent::new(
            Arc::new(ScriptedGenerator::new()),
            AgentConfig::default(),
        ));
        let mut manager = AgentManager::new();
        manager.register_agent(story.clone());
        manager.register_agent(Arc::new(BrokenAgent {
            ready: AtomicBool::new(false),
        }));
        (manager, story)
    }

    #[tokio::test]
    async fn test_get_agent_returns_registered_instance() {
        let (manager, story) = manager();
        manager.initialize_all_agents().await;
        let found = manager.get_agent("story_agent").unwrap();
        assert!(Arc::ptr_eq(&found, &story));
        assert!(manager.get_agent("missing_agent").is_none());
    }

    #[tokio::test]
    async fn test_partial_readiness_is_reported() {
        let (manager, _) = manager();
        let report = manager.initialize_all_agents().await;
        assert_eq!(report.ready, vec!["story_agent"]);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.all_ready());

        let health = manager.health();
        assert_eq!(health.registered, 2);
        assert_eq!(health.ready, 1);
        assert!(manager.any_ready());
    }

    #[tokio::test]
    async fn test_shutdown_never_raises() {
        let (manager, story) = manager();
        manager.initialize_all_agents().await;
        let report = manager.shutdown().await;
        assert_eq!(report.stopped, vec!["story_agent"]);
        assert_eq!(report.failed.len(), 1);
        assert!(!story.is_ready());
    }

    #[test]
    fn test_register_replaces_same_name() {
        let (mut manager, _) = manager();
        let replaced = manager.register_agent(Arc::new(BrokenAgent {
            ready: AtomicBool::new(false),
        }));
        assert!(replaced.is_some());
        assert_eq!(manager.len(), 2);
    }
}
