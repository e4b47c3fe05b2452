//! Memory agent: a keyword-indexed journal of what the investigator has seen.
//!
//! Recording and recall are local. When a text generator is attached, recall
//! also asks it for a short summary of the matched entries; if that fails the
//! entries are still returned.

use super::runtime::{
    generate_with_retry, generic_fallback, AgentConfig, AgentError, AgentInput, AgentKind,
    AgentOutput, AgentResponse, AgentStats, MemoryRecall, MemoryRequest, NarrativeAgent,
    ResponseSource, StatsRecorder,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use textgen::{GenerateRequest, TextGenerator};
use tokio::sync::Mutex;

const MEMORY_PROMPT: &str = include_str!("prompts/memory.txt");

const STOP_WORDS: &[&str] = &[
    "the", "and", "that", "this", "with", "from", "into", "your", "you", "have", "there", "their",
    "then", "them", "they", "were", "what", "when", "where", "which", "while", "will", "would",
    "about", "been", "some", "something", "more", "than", "only", "very", "just",
];

/// Default importance for new entries, on a 1 to 10 scale.
pub const DEFAULT_IMPORTANCE: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Entries kept before cleanup runs.
    pub capacity: usize,
    /// Fraction of capacity kept after cleanup.
    pub keep_ratio: f64,
    /// Turns after which an entry's weight starts to fade.
    pub decay_turns: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            keep_ratio: 0.7,
            decay_turns: 20,
        }
    }
}

impl MemoryConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub turn: u32,
    pub scene_id: String,
    pub text: String,
    pub importance: u8,
    pub keywords: BTreeSet<String>,
}

/// Significant lowercase words of a text.
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Entries plus a keyword index over them.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    config: MemoryConfig,
    entries: Vec<MemoryEntry>,
    index: HashMap<String, Vec<usize>>,
    latest_turn: u32,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn record(&mut self, turn: u32, scene_id: &str, text: &str, importance: u8) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let mut words = keywords(text);
        words.extend(keywords(scene_id));
        let position = self.entries.len();
        for word in &words {
            self.index.entry(word.clone()).or_default().push(position);
        }
        self.entries.push(MemoryEntry {
            turn,
            scene_id: scene_id.to_string(),
            text: text.to_string(),
            importance: importance.clamp(1, 10),
            keywords: words,
        });
        self.latest_turn = self.latest_turn.max(turn);

        if self.entries.len() > self.config.capacity {
            self.cleanup();
        }
    }

    fn age_factor(&self, entry: &MemoryEntry) -> f64 {
        let age = self.latest_turn.saturating_sub(entry.turn) as f64;
        (age / self.config.decay_turns.max(1) as f64).min(2.0)
    }

    /// Entries most relevant to `query` in `scene_id`, best first.
    pub fn recall(&self, query: &str, scene_id: &str, limit: usize) -> Vec<&MemoryEntry> {
        let wanted = keywords(query);
        let mut overlap: HashMap<usize, usize> = HashMap::new();
        for word in &wanted {
            for &position in self.index.get(word).into_iter().flatten() {
                *overlap.entry(position).or_default() += 1;
            }
        }
        // Entries from the current scene are candidates even without overlap.
        for (position, entry) in self.entries.iter().enumerate() {
            if entry.scene_id == scene_id {
                overlap.entry(position).or_default();
            }
        }

        let mut scored: Vec<(f64, usize)> = overlap
            .into_iter()
            .map(|(position, hits)| {
                let entry = &self.entries[position];
                let mut score = hits as f64 * 2.0 + entry.importance as f64 / 10.0;
                if entry.scene_id == scene_id {
                    score += 1.5;
                }
                score -= self.age_factor(entry) * 0.5;
                (score, position)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
        });
        scored
            .into_iter()
            .take(limit)
            .map(|(_, position)| &self.entries[position])
            .collect()
    }

    /// Drop the least valuable entries down to `keep_ratio` of capacity.
    fn cleanup(&mut self) {
        let target = ((self.config.capacity as f64) * self.config.keep_ratio) as usize;
        let before = self.entries.len();
        if before <= target {
            return;
        }

        let mut ranked: Vec<(f64, usize)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.importance as f64 * (1.0 - self.age_factor(e) * 0.5), i))
            .collect();
        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
        });
        let mut keep: Vec<usize> = ranked.into_iter().take(target).map(|(_, i)| i).collect();
        keep.sort_unstable();

        let old = std::mem::take(&mut self.entries);
        self.entries = old
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.binary_search(i).is_ok())
            .map(|(_, e)| e)
            .collect();
        self.rebuild_index();
        tracing::info!(removed = before - self.entries.len(), kept = self.entries.len(), "Memory cleaned up");
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (position, entry) in self.entries.iter().enumerate() {
            for word in &entry.keywords {
                self.index.entry(word.clone()).or_default().push(position);
            }
        }
    }
}

/// Journal agent backed by [`MemoryStore`].
pub struct MemoryAgent {
    store: Mutex<MemoryStore>,
    generator: Option<Arc<dyn TextGenerator>>,
    config: AgentConfig,
    ready: AtomicBool,
    stats: StatsRecorder,
}

impl MemoryAgent {
    /// Local-only journal.
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            store: Mutex::new(MemoryStore::new(config)),
            generator: None,
            config: AgentConfig::default(),
            ready: AtomicBool::new(false),
            stats: StatsRecorder::default(),
        }
    }

    /// Summarize recalled entries with `generator`.
    pub fn with_summaries(mut self, generator: Arc<dyn TextGenerator>, config: AgentConfig) -> Self {
        self.generator = Some(generator);
        self.config = config;
        self
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    async fn summarize(&self, generator: &dyn TextGenerator, query: &str, entries: &[String]) -> (Result<String, AgentError>, u32) {
        let mut prompt = format!("Question: {query}\n\nJournal entries:\n");
        for entry in entries {
            prompt.push_str(&format!("- {entry}\n"));
        }
        let mut options = self.config.generation.clone();
        options.max_tokens = 250;
        let request = GenerateRequest::new(prompt)
            .with_system(MEMORY_PROMPT)
            .with_options(options);
        generate_with_retry(generator, request, &self.config, self.name(), |raw| {
            let text = raw.trim();
            if text.is_empty() {
                Err(AgentError::InvalidResponse("empty summary".to_string()))
            } else {
                Ok(text.to_string())
            }
        })
        .await
    }
}

#[async_trait]
impl NarrativeAgent for MemoryAgent {
    fn name(&self) -> &str {
        AgentKind::Memory.name()
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Memory
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        // The journal works without a backend, so a failed connection only
        // disables summaries.
        if let Some(generator) = &self.generator {
            if let Err(e) = generator.connect().await {
                tracing::warn!(agent = self.name(), error = %e, "Summaries unavailable");
            }
        }
        self.ready.store(true, Ordering::Release);
        tracing::info!(agent = self.name(), "Agent initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), AgentError> {
        self.ready.store(false, Ordering::Release);
        tracing::info!(agent = self.name(), "Agent shut down");
        Ok(())
    }

    async fn process_input(&self, input: &AgentInput) -> AgentResponse {
        let start = Instant::now();
        let AgentInput::Memory(request) = input else {
            let reason = AgentError::Unsupported {
                agent: self.name().to_string(),
                input: input.label(),
            };
            let response = AgentResponse::fallback(self.name(), generic_fallback(input), reason.to_string(), 0, start.elapsed());
            self.stats.record(&response, 0);
            return response;
        };

        let response = match request {
            MemoryRequest::Record { turn, scene_id, text, importance } => {
                self.store.lock().await.record(*turn, scene_id, text, *importance);
                AgentResponse::local(
                    self.name(),
                    AgentOutput::Memory(MemoryRecall {
                        entries: vec![text.clone()],
                        summary: None,
                    }),
                    start.elapsed(),
                )
            }
            MemoryRequest::Recall { query, scene_id, limit } => {
                let entries: Vec<String> = self
                    .store
                    .lock()
                    .await
                    .recall(query, scene_id, *limit)
                    .into_iter()
                    .map(|e| e.text.clone())
                    .collect();

                match &self.generator {
                    Some(generator) if self.is_ready() && !entries.is_empty() => {
                        let (result, attempts) = self.summarize(generator.as_ref(), query, &entries).await;
                        match result {
                            Ok(summary) => AgentResponse::ai(
                                self.name(),
                                AgentOutput::Memory(MemoryRecall { entries, summary: Some(summary) }),
                                attempts,
                                start.elapsed(),
                            ),
                            Err(e) => AgentResponse::fallback(
                                self.name(),
                                AgentOutput::Memory(MemoryRecall { entries, summary: None }),
                                e.to_string(),
                                attempts,
                                start.elapsed(),
                            ),
                        }
                    }
                    _ => AgentResponse::local(
                        self.name(),
                        AgentOutput::Memory(MemoryRecall { entries, summary: None }),
                        start.elapsed(),
                    ),
                }
            }
        };

        let failed = match response.source() {
            ResponseSource::Ai => response.metadata().attempts.saturating_sub(1),
            _ => response.metadata().attempts,
        };
        self.stats.record(&response, failed);
        response
    }

    fn stats(&self) -> AgentStats {
        self.stats.snapshot(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_skip_short_and_stop_words() {
        let words = keywords("You find the Professor's journal in the desk");
        assert!(words.contains("professor"));
        assert!(words.contains("journal"));
        assert!(!words.contains("the"));
        assert!(!words.contains("in"));
    }

    #[test]
    fn test_recall_prefers_overlap_then_scene() {
        let mut store = MemoryStore::new(MemoryConfig::default());
        store.record(1, "study", "A torn letter mentions the Esoteric Order", 5);
        store.record(2, "library", "The librarian fears the Esoteric Order", 7);
        store.record(3, "study", "The clock stopped at midnight", 3);

        let hits = store.recall("esoteric order", "library", 5);
        assert_eq!(hits[0].turn, 2);
        assert_eq!(hits.len(), 2);

        let hits = store.recall("nothing relevant", "study", 5);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|e| e.scene_id == "study"));
    }

    #[test]
    fn test_cleanup_keeps_important_entries() {
        let mut store = MemoryStore::new(MemoryConfig::default().with_capacity(10));
        for turn in 0..10 {
            store.record(turn, "street", &format!("ordinary detail {turn}"), 1);
        }
        store.record(10, "street", "the sigil burned into the door", 10);
        assert_eq!(store.len(), 7);
        assert!(store.entries().iter().any(|e| e.importance == 10));

        let hits = store.recall("sigil", "forest", 1);
        assert_eq!(hits[0].text, "the sigil burned into the door");
    }

    #[test]
    fn test_empty_text_is_ignored() {
        let mut store = MemoryStore::new(MemoryConfig::default());
        store.record(1, "study", "   ", 5);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_agent_record_and_recall_locally() {
        let agent = MemoryAgent::new(MemoryConfig::default());
        agent.initialize().await.unwrap();

        let record = AgentInput::Memory(MemoryRequest::Record {
            turn: 1,
            scene_id: "basement".into(),
            text: "Chalk circles cover the basement floor".into(),
            importance: 8,
        });
        let response = agent.process_input(&record).await;
        assert_eq!(response.source(), ResponseSource::Local);
        assert_eq!(agent.len().await, 1);

        let recall = AgentInput::Memory(MemoryRequest::Recall {
            query: "chalk circles".into(),
            scene_id: "study".into(),
            limit: 3,
        });
        let response = agent.process_input(&recall).await;
        assert!(response.is_valid());
        assert!(response.content().contains("Chalk circles"));
        assert_eq!(agent.stats().local_responses, 2);
    }
}
