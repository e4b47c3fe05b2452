//! The agent contract and the retrying LLM-backed agent.
//!
//! Every narrative agent implements [`NarrativeAgent`]. Inputs and outputs
//! are explicit tagged enums with one variant per agent concern, so an
//! agent never has to guess at the shape of its context.
//!
//! [`LlmAgent`] does the shared work: it builds a bounded prompt, calls the
//! text generator with a per-attempt timeout, retries with exponential
//! backoff, and when everything fails returns the behavior's deterministic
//! fallback. `process_input` never fails; callers only ever see a
//! structurally valid [`AgentResponse`] whose `source` says how it was made.

use crate::action::ActionType;
use crate::character::{CharacterSnapshot, Pool};
use crate::dice::SkillCheck;
use crate::location::{Location, GENERAL_CHOICES};
use crate::narrative::{NarrativeContext, TensionLevel, ThreadStatus};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use textgen::{GenerateOptions, GenerateRequest, TextGenerator};
use thiserror::Error;
use tokio::sync::Mutex;

/// Confidence reported for deterministic fallback output.
pub const FALLBACK_CONFIDENCE: f32 = 0.3;

/// Confidence reported for parsed model output.
pub const AI_CONFIDENCE: f32 = 0.8;

/// Errors inside the agent layer. These never escape `process_input`.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent {0} is not ready")]
    NotReady(String),

    #[error("Backend error: {0}")]
    Backend(#[from] textgen::Error),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{agent} does not handle {input} input")]
    Unsupported { agent: String, input: &'static str },
}

impl AgentError {
    fn is_retryable(&self) -> bool {
        match self {
            AgentError::Backend(e) => e.is_retryable(),
            AgentError::Timeout(_) | AgentError::InvalidResponse(_) => true,
            AgentError::NotReady(_) | AgentError::Unsupported { .. } => false,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// The five agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Story,
    Npc,
    Environment,
    Rule,
    Memory,
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Story,
        AgentKind::Npc,
        AgentKind::Environment,
        AgentKind::Rule,
        AgentKind::Memory,
    ];

    /// Registry name.
    pub fn name(self) -> &'static str {
        match self {
            AgentKind::Story => "story_agent",
            AgentKind::Npc => "npc_agent",
            AgentKind::Environment => "environment_agent",
            AgentKind::Rule => "rule_agent",
            AgentKind::Memory => "memory_agent",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Retry, timeout and prompt-size settings shared by all agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Attempts per request, including the first.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Timeout for a single generation attempt.
    pub request_timeout: Duration,
    /// Maximum prompt context, in characters.
    pub context_window: usize,
    /// Turns of recent history included in prompts.
    pub history_turns: usize,
    pub generation: GenerateOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(4),
            request_timeout: Duration::from_secs(30),
            context_window: 4000,
            history_turns: 5,
            generation: GenerateOptions {
                model: None,
                max_tokens: 800,
                temperature: Some(0.8),
            },
        }
    }
}

impl AgentConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap.max(base);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_context_window(mut self, chars: usize) -> Self {
        self.context_window = chars;
        self
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.generation.model = Some(model.into());
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_cap)
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// A thread as agents see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadNote {
    pub name: String,
    pub status: ThreadStatus,
    #[serde(default)]
    pub detail: String,
}

/// Bounded view of the narrative context for prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDigest {
    pub scene_id: String,
    pub turn_number: u32,
    pub tension: TensionLevel,
    pub active_threads: Vec<ThreadNote>,
    pub opportunities: Vec<String>,
    /// Choices the player picked recently, oldest first.
    pub recent_choices: Vec<String>,
    pub flags: Vec<String>,
}

impl ContextDigest {
    pub fn from_context(context: &NarrativeContext, history_turns: usize) -> Self {
        let current = context.turn_number as usize;
        let mut recent_choices: Vec<String> = context
            .choice_history
            .iter()
            .rev()
            .take_while(|r| r.turn as usize + history_turns > current)
            .filter(|r| r.selected)
            .map(|r| r.text.clone())
            .collect();
        recent_choices.reverse();

        Self {
            scene_id: context.scene_id.clone(),
            turn_number: context.turn_number,
            tension: context.tension_level,
            active_threads: context
                .story_threads
                .active()
                .map(|(name, state)| ThreadNote {
                    name: name.to_string(),
                    status: state.status,
                    detail: state.detail.clone(),
                })
                .collect(),
            opportunities: context.investigation_opportunities.clone(),
            recent_choices,
            flags: context
                .narrative_flags
                .iter()
                .filter(|(_, v)| v.is_truthy())
                .map(|(k, _)| k.clone())
                .collect(),
        }
    }

    pub fn location(&self) -> Location {
        Location::from_scene(&self.scene_id)
    }

    /// Prompt section describing the current state.
    pub fn render(&self) -> String {
        let mut out = format!(
            "## Scene\n{} (turn {}, tension: {})\n",
            self.scene_id, self.turn_number, self.tension
        );
        if !self.active_threads.is_empty() {
            out.push_str("\n## Open story threads\n");
            for thread in &self.active_threads {
                if thread.detail.is_empty() {
                    out.push_str(&format!("- {}\n", thread.name));
                } else {
                    out.push_str(&format!("- {}: {}\n", thread.name, thread.detail));
                }
            }
        }
        if !self.opportunities.is_empty() {
            out.push_str("\n## Current leads\n");
            for lead in &self.opportunities {
                out.push_str(&format!("- {lead}\n"));
            }
        }
        if !self.recent_choices.is_empty() {
            out.push_str("\n## Recent player choices\n");
            for choice in &self.recent_choices {
                out.push_str(&format!("- {choice}\n"));
            }
        }
        if !self.flags.is_empty() {
            out.push_str(&format!("\n## Established facts\n{}\n", self.flags.join(", ")));
        }
        out
    }
}

/// Investigator summary for prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterDigest {
    pub name: String,
    pub occupation: String,
    pub sanity: Pool,
    pub hit_points: Pool,
}

impl From<&CharacterSnapshot> for CharacterDigest {
    fn from(character: &CharacterSnapshot) -> Self {
        Self {
            name: character.name.clone(),
            occupation: character.occupation.clone(),
            sanity: character.sanity,
            hit_points: character.hit_points,
        }
    }
}

impl CharacterDigest {
    pub fn render(&self) -> String {
        let who = if self.occupation.is_empty() {
            self.name.clone()
        } else {
            format!("{}, {}", self.name, self.occupation)
        };
        format!(
            "## Investigator\n{who} (sanity {}/{}, hit points {}/{})\n",
            self.sanity.current, self.sanity.maximum, self.hit_points.current, self.hit_points.maximum
        )
    }
}

/// Narrate the outcome of a player action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryRequest {
    pub digest: ContextDigest,
    pub character: Option<CharacterDigest>,
    pub action: String,
    pub action_type: ActionType,
    pub skill: Option<String>,
    pub check: Option<SkillCheck>,
    /// Flavor gathered from other agents this turn.
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Propose the next set of player choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRequest {
    pub digest: ContextDigest,
    pub character: Option<CharacterDigest>,
    pub count: usize,
    /// Texts offered recently that should not be repeated.
    #[serde(default)]
    pub avoid: Vec<String>,
}

/// Voice a non-player character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcRequest {
    pub digest: ContextDigest,
    pub npc: Option<String>,
    pub player_line: String,
}

/// Describe the surroundings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRequest {
    pub digest: ContextDigest,
    pub focus: Option<String>,
}

/// Pick a skill for an action the fixed tables did not cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRequest {
    pub digest: ContextDigest,
    pub action: String,
    pub action_type: ActionType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryRequest {
    Record {
        turn: u32,
        scene_id: String,
        text: String,
        importance: u8,
    },
    Recall {
        query: String,
        scene_id: String,
        limit: usize,
    },
}

/// Input to any agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "request", rename_all = "snake_case")]
pub enum AgentInput {
    Story(StoryRequest),
    Choices(ChoiceRequest),
    Npc(NpcRequest),
    Environment(EnvironmentRequest),
    Rule(RuleRequest),
    Memory(MemoryRequest),
}

impl AgentInput {
    pub fn label(&self) -> &'static str {
        match self {
            AgentInput::Story(_) => "story",
            AgentInput::Choices(_) => "choices",
            AgentInput::Npc(_) => "npc",
            AgentInput::Environment(_) => "environment",
            AgentInput::Rule(_) => "rule",
            AgentInput::Memory(_) => "memory",
        }
    }

    pub fn digest(&self) -> Option<&ContextDigest> {
        match self {
            AgentInput::Story(r) => Some(&r.digest),
            AgentInput::Choices(r) => Some(&r.digest),
            AgentInput::Npc(r) => Some(&r.digest),
            AgentInput::Environment(r) => Some(&r.digest),
            AgentInput::Rule(r) => Some(&r.digest),
            AgentInput::Memory(_) => None,
        }
    }
}

// ============================================================================
// Outputs
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryDraft {
    pub text: String,
    #[serde(default)]
    pub opportunities: Vec<String>,
    #[serde(default)]
    pub tension: Option<TensionLevel>,
    #[serde(default)]
    pub threads: Vec<ThreadNote>,
    #[serde(default)]
    pub new_scene: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcReply {
    pub speaker: String,
    pub dialogue: String,
    #[serde(default)]
    pub attitude: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    pub description: String,
    #[serde(default)]
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRuling {
    pub skill: Option<String>,
    #[serde(default)]
    pub modifier: i32,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecall {
    pub entries: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Output of any agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "output", rename_all = "snake_case")]
pub enum AgentOutput {
    Story(StoryDraft),
    Choices(Vec<String>),
    Npc(NpcReply),
    Environment(SceneDescription),
    Rule(RuleRuling),
    Memory(MemoryRecall),
}

impl AgentOutput {
    /// Human-readable content.
    pub fn text(&self) -> String {
        match self {
            AgentOutput::Story(draft) => draft.text.clone(),
            AgentOutput::Choices(choices) => choices.join("\n"),
            AgentOutput::Npc(reply) => format!("{}: {}", reply.speaker, reply.dialogue),
            AgentOutput::Environment(scene) => scene.description.clone(),
            AgentOutput::Rule(ruling) => match &ruling.skill {
                Some(skill) => format!("{skill} ({:+}): {}", ruling.modifier, ruling.rationale),
                None => ruling.rationale.clone(),
            },
            AgentOutput::Memory(recall) => recall
                .summary
                .clone()
                .unwrap_or_else(|| recall.entries.join("\n")),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AgentOutput::Story(draft) => draft.text.trim().is_empty(),
            AgentOutput::Choices(choices) => choices.is_empty(),
            AgentOutput::Npc(reply) => reply.dialogue.trim().is_empty(),
            AgentOutput::Environment(scene) => scene.description.trim().is_empty(),
            AgentOutput::Rule(ruling) => ruling.skill.is_none(),
            AgentOutput::Memory(recall) => recall.entries.is_empty() && recall.summary.is_none(),
        }
    }
}

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Parsed from model output.
    Ai,
    /// Computed locally without a model call.
    Local,
    /// Deterministic fallback after the model path failed.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub agent: String,
    /// Generation attempts made.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// What an agent returns for one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    output: AgentOutput,
    source: ResponseSource,
    confidence: f32,
    processing_time: Duration,
    metadata: ResponseMetadata,
}

impl AgentResponse {
    pub fn ai(agent: &str, output: AgentOutput, attempts: u32, elapsed: Duration) -> Self {
        Self {
            output,
            source: ResponseSource::Ai,
            confidence: AI_CONFIDENCE,
            processing_time: elapsed,
            metadata: ResponseMetadata {
                agent: agent.to_string(),
                attempts,
                reason: None,
            },
        }
    }

    pub fn local(agent: &str, output: AgentOutput, elapsed: Duration) -> Self {
        Self {
            output,
            source: ResponseSource::Local,
            confidence: 1.0,
            processing_time: elapsed,
            metadata: ResponseMetadata {
                agent: agent.to_string(),
                attempts: 0,
                reason: None,
            },
        }
    }

    pub fn fallback(
        agent: &str,
        output: AgentOutput,
        reason: impl Into<String>,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            output,
            source: ResponseSource::Fallback,
            confidence: FALLBACK_CONFIDENCE,
            processing_time: elapsed,
            metadata: ResponseMetadata {
                agent: agent.to_string(),
                attempts,
                reason: Some(reason.into()),
            },
        }
    }

    pub fn output(&self) -> &AgentOutput {
        &self.output
    }

    pub fn into_output(self) -> AgentOutput {
        self.output
    }

    pub fn content(&self) -> String {
        self.output.text()
    }

    pub fn source(&self) -> ResponseSource {
        self.source
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ResponseSource::Fallback
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn processing_time(&self) -> Duration {
        self.processing_time
    }

    pub fn metadata(&self) -> &ResponseMetadata {
        &self.metadata
    }

    /// Fallback responses are always valid. Others need non-empty output.
    pub fn is_valid(&self) -> bool {
        match self.source {
            ResponseSource::Fallback => true,
            ResponseSource::Ai | ResponseSource::Local => {
                !self.output.is_empty() && self.confidence > 0.0
            }
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-agent counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent: String,
    pub requests: u64,
    pub ai_successes: u64,
    pub local_responses: u64,
    pub fallbacks: u64,
    pub failed_attempts: u64,
    pub average_processing_time: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    requests: AtomicU64,
    ai_successes: AtomicU64,
    local_responses: AtomicU64,
    fallbacks: AtomicU64,
    failed_attempts: AtomicU64,
    total_micros: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record(&self, response: &AgentResponse, failed_attempts: u32) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match response.source() {
            ResponseSource::Ai => &self.ai_successes,
            ResponseSource::Local => &self.local_responses,
            ResponseSource::Fallback => &self.fallbacks,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.failed_attempts
            .fetch_add(failed_attempts as u64, Ordering::Relaxed);
        self.total_micros.fetch_add(
            response.processing_time().as_micros() as u64,
            Ordering::Relaxed,
        );
    }

    pub(crate) fn snapshot(&self, agent: &str) -> AgentStats {
        let requests = self.requests.load(Ordering::Relaxed);
        let total = self.total_micros.load(Ordering::Relaxed);
        AgentStats {
            agent: agent.to_string(),
            requests,
            ai_successes: self.ai_successes.load(Ordering::Relaxed),
            local_responses: self.local_responses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            average_processing_time: Duration::from_micros(total / requests.max(1)),
        }
    }
}

// ============================================================================
// Agent contract
// ============================================================================

/// Uniform contract for narrative agents.
#[async_trait]
pub trait NarrativeAgent: Send + Sync {
    /// Registry name, e.g. `story_agent`.
    fn name(&self) -> &str;

    fn kind(&self) -> AgentKind;

    fn is_ready(&self) -> bool;

    /// Prepare the agent. A failure leaves the agent not ready.
    async fn initialize(&self) -> Result<(), AgentError>;

    async fn shutdown(&self) -> Result<(), AgentError>;

    /// Handle one input. Never fails: on any problem the agent returns its
    /// deterministic fallback tagged with [`ResponseSource::Fallback`].
    async fn process_input(&self, input: &AgentInput) -> AgentResponse;

    fn stats(&self) -> AgentStats;
}

/// Prompt construction, parsing and fallback for one agent role.
pub trait AgentBehavior: Send + Sync + 'static {
    fn kind(&self) -> AgentKind;

    fn system_prompt(&self) -> &str;

    /// Build the user prompt, or `None` if this role does not handle the input.
    fn build_prompt(&self, input: &AgentInput, history: &str, config: &AgentConfig) -> Option<String>;

    /// Parse model text into typed output.
    fn parse(&self, input: &AgentInput, raw: &str, config: &AgentConfig) -> Result<AgentOutput, AgentError>;

    /// Deterministic output used when generation fails.
    fn fallback(&self, input: &AgentInput) -> AgentOutput;

    fn max_tokens(&self, _input: &AgentInput) -> usize {
        600
    }

    /// Exchange to remember for later prompts, as (player, narrator).
    fn exchange(&self, _input: &AgentInput, _output: &AgentOutput) -> Option<(String, String)> {
        None
    }
}

/// Output for inputs a role does not handle.
pub fn generic_fallback(input: &AgentInput) -> AgentOutput {
    match input {
        AgentInput::Story(request) => AgentOutput::Story(StoryDraft {
            text: request.digest.location().opening_text().to_string(),
            ..StoryDraft::default()
        }),
        AgentInput::Choices(_) => AgentOutput::Choices(
            GENERAL_CHOICES.iter().map(|c| c.text.to_string()).collect(),
        ),
        AgentInput::Npc(request) => AgentOutput::Npc(NpcReply {
            speaker: request.npc.clone().unwrap_or_else(|| "The stranger".to_string()),
            dialogue: "They regard you in silence for a long moment.".to_string(),
            attitude: None,
        }),
        AgentInput::Environment(request) => AgentOutput::Environment(SceneDescription {
            description: request.digest.location().opening_text().to_string(),
            details: Vec::new(),
        }),
        AgentInput::Rule(_) => AgentOutput::Rule(RuleRuling {
            skill: None,
            modifier: 0,
            rationale: "No ruling available".to_string(),
        }),
        AgentInput::Memory(_) => AgentOutput::Memory(MemoryRecall::default()),
    }
}

// ============================================================================
// Conversation window
// ============================================================================

#[derive(Debug, Clone)]
struct Exchange {
    player: String,
    narrator: String,
}

/// Sliding window of recent exchanges.
#[derive(Debug, Clone)]
pub(crate) struct ConversationWindow {
    exchanges: VecDeque<Exchange>,
    capacity: usize,
}

impl ConversationWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            exchanges: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, player: String, narrator: String) {
        self.exchanges.push_back(Exchange { player, narrator });
        while self.exchanges.len() > self.capacity {
            self.exchanges.pop_front();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub(crate) fn clear(&mut self) {
        self.exchanges.clear();
    }

    /// Most recent exchanges that fit in `max_chars`, oldest first.
    pub(crate) fn render(&self, max_chars: usize) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut used = 0;
        for exchange in self.exchanges.iter().rev() {
            let part = format!(
                "Player: {}\nNarrator: {}\n",
                exchange.player, exchange.narrator
            );
            let len = part.chars().count();
            if used + len > max_chars {
                break;
            }
            used += len;
            parts.push(part);
        }
        parts.reverse();
        parts.concat()
    }
}

// ============================================================================
// Text helpers
// ============================================================================

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Locate the JSON payload in model output, tolerating code fences and
/// surrounding prose.
pub fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find(['{', '['])?;
    let open = raw[start..].chars().next()?;
    let close = if open == '{' { '}' } else { ']' };
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse a JSON payload out of model output.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, AgentError> {
    let payload = extract_json(raw)
        .ok_or_else(|| AgentError::InvalidResponse("no JSON payload found".to_string()))?;
    serde_json::from_str(payload).map_err(|e| AgentError::InvalidResponse(e.to_string()))
}

/// Coerce arbitrary JSON values into distinct, non-empty strings.
///
/// Strings are trimmed, numbers and booleans stringified, arrays joined,
/// objects read from their `text` field. Nulls and empty results are
/// dropped, each item is capped at `max_chars`, and duplicates removed.
pub fn sanitize_text_items(values: &[Value], max_chars: usize) -> Vec<String> {
    fn flatten(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s.trim().to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().filter_map(flatten).filter(|s| !s.is_empty()).collect();
                Some(parts.join(", "))
            }
            Value::Object(map) => match map.get("text") {
                Some(text) => flatten(text),
                None => Some(Value::Object(map.clone()).to_string()),
            },
        }
    }

    let mut seen = HashSet::new();
    values
        .iter()
        .filter_map(flatten)
        .filter(|s| !s.is_empty())
        .map(|s| truncate_chars(&s, max_chars))
        .filter(|s| seen.insert(s.to_lowercase()))
        .collect()
}

// ============================================================================
// Generation with retry
// ============================================================================

/// Call the generator until `parse` accepts a reply or attempts run out.
///
/// Returns the parse result and the number of attempts made. Non-retryable
/// errors stop immediately.
pub(crate) async fn generate_with_retry<T, F>(
    generator: &dyn TextGenerator,
    request: GenerateRequest,
    config: &AgentConfig,
    agent: &str,
    mut parse: F,
) -> (Result<T, AgentError>, u32)
where
    F: FnMut(&str) -> Result<T, AgentError>,
{
    let max_attempts = config.max_retries.max(1);
    let mut last_error = AgentError::InvalidResponse("no attempts made".to_string());

    for attempt in 1..=max_attempts {
        let result = match tokio::time::timeout(config.request_timeout, generator.generate(request.clone())).await {
            Err(_) => Err(AgentError::Timeout(config.request_timeout)),
            Ok(Err(e)) => Err(AgentError::Backend(e)),
            Ok(Ok(generation)) => parse(generation.text()),
        };

        match result {
            Ok(value) => return (Ok(value), attempt),
            Err(e) => {
                tracing::debug!(agent, attempt, error = %e, "Generation attempt failed");
                let retryable = e.is_retryable();
                last_error = e;
                if !retryable {
                    return (Err(last_error), attempt);
                }
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(config.backoff_delay(attempt)).await;
        }
    }

    (Err(last_error), max_attempts)
}

// ============================================================================
// LLM-backed agent
// ============================================================================

/// An agent that wraps a shared text generator with one role's behavior.
pub struct LlmAgent<B: AgentBehavior> {
    behavior: B,
    generator: Arc<dyn TextGenerator>,
    config: AgentConfig,
    ready: AtomicBool,
    window: Mutex<ConversationWindow>,
    stats: StatsRecorder,
}

impl<B: AgentBehavior> LlmAgent<B> {
    pub fn with_behavior(behavior: B, generator: Arc<dyn TextGenerator>, config: AgentConfig) -> Self {
        let capacity = config.history_turns;
        Self {
            behavior,
            generator,
            config,
            ready: AtomicBool::new(false),
            window: Mutex::new(ConversationWindow::new(capacity)),
            stats: StatsRecorder::default(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    /// Exchanges currently remembered for prompts.
    pub async fn remembered_exchanges(&self) -> usize {
        self.window.lock().await.len()
    }

    fn respond_with_fallback(
        &self,
        input: &AgentInput,
        reason: String,
        attempts: u32,
        start: Instant,
    ) -> AgentResponse {
        tracing::warn!(agent = self.name(), input = input.label(), %reason, "Using fallback response");
        let response = AgentResponse::fallback(
            self.name(),
            self.behavior.fallback(input),
            reason,
            attempts,
            start.elapsed(),
        );
        self.stats.record(&response, attempts);
        response
    }
}

#[async_trait]
impl<B: AgentBehavior> NarrativeAgent for LlmAgent<B> {
    fn name(&self) -> &str {
        self.behavior.kind().name()
    }

    fn kind(&self) -> AgentKind {
        self.behavior.kind()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        match self.generator.connect().await {
            Ok(()) => {
                self.ready.store(true, Ordering::Release);
                tracing::info!(agent = self.name(), backend = self.generator.name(), "Agent initialized");
                Ok(())
            }
            Err(e) => {
                self.ready.store(false, Ordering::Release);
                tracing::warn!(agent = self.name(), error = %e, "Agent failed to initialize");
                Err(AgentError::Backend(e))
            }
        }
    }

    async fn shutdown(&self) -> Result<(), AgentError> {
        self.ready.store(false, Ordering::Release);
        self.window.lock().await.clear();
        tracing::info!(agent = self.name(), "Agent shut down");
        Ok(())
    }

    #[tracing::instrument(skip(self, input), fields(agent = %self.behavior.kind(), input = input.label()))]
    async fn process_input(&self, input: &AgentInput) -> AgentResponse {
        let start = Instant::now();

        if !self.is_ready() {
            let reason = AgentError::NotReady(self.name().to_string()).to_string();
            return self.respond_with_fallback(input, reason, 0, start);
        }

        let history_budget = self.config.context_window / 4;
        let history = self.window.lock().await.render(history_budget);
        let Some(prompt) = self.behavior.build_prompt(input, &history, &self.config) else {
            let reason = AgentError::Unsupported {
                agent: self.name().to_string(),
                input: input.label(),
            }
            .to_string();
            return self.respond_with_fallback(input, reason, 0, start);
        };

        let mut options = self.config.generation.clone();
        options.max_tokens = self.behavior.max_tokens(input);
        let request = GenerateRequest::new(prompt)
            .with_system(self.behavior.system_prompt())
            .with_options(options);

        let (result, attempts) = generate_with_retry(
            self.generator.as_ref(),
            request,
            &self.config,
            self.name(),
            |raw| self.behavior.parse(input, raw, &self.config),
        )
        .await;

        match result {
            Ok(output) => {
                if let Some((player, narrator)) = self.behavior.exchange(input, &output) {
                    self.window.lock().await.push(player, narrator);
                }
                let response = AgentResponse::ai(self.name(), output, attempts, start.elapsed());
                self.stats.record(&response, attempts.saturating_sub(1));
                tracing::debug!(attempts, elapsed = ?response.processing_time(), "Agent response generated");
                response
            }
            Err(e) => self.respond_with_fallback(input, e.to_string(), attempts, start),
        }
    }

    fn stats(&self) -> AgentStats {
        self.stats.snapshot(self.name())
    }
}
