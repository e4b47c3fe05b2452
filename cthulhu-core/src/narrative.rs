//! Narrative state shared by the story machine, agents and turn loop.
//!
//! [`NarrativeContext`] is the per-session record of where the story is.
//! [`StoryContent`] and [`Choice`] are what each turn hands to the
//! presentation layer.

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Tension
// ============================================================================

/// Narrative intensity, ordered from calm to cosmic horror.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TensionLevel {
    #[default]
    Calm,
    Uneasy,
    Tense,
    Terrifying,
    CosmicHorror,
}

impl TensionLevel {
    pub const ALL: [TensionLevel; 5] = [
        TensionLevel::Calm,
        TensionLevel::Uneasy,
        TensionLevel::Tense,
        TensionLevel::Terrifying,
        TensionLevel::CosmicHorror,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// One step up, saturating at cosmic horror.
    pub fn escalate(self) -> Self {
        Self::ALL[(self.index() + 1).min(Self::ALL.len() - 1)]
    }

    /// One step down, saturating at calm.
    pub fn deescalate(self) -> Self {
        Self::ALL[self.index().saturating_sub(1)]
    }

    /// One step toward `target`, or unchanged if already there.
    pub fn step_toward(self, target: TensionLevel) -> Self {
        match self.cmp(&target) {
            std::cmp::Ordering::Less => self.escalate(),
            std::cmp::Ordering::Greater => self.deescalate(),
            std::cmp::Ordering::Equal => self,
        }
    }

    /// Terrifying or worse.
    pub fn is_high(self) -> bool {
        self >= TensionLevel::Terrifying
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TensionLevel::Calm => "calm",
            TensionLevel::Uneasy => "uneasy",
            TensionLevel::Tense => "tense",
            TensionLevel::Terrifying => "terrifying",
            TensionLevel::CosmicHorror => "cosmic_horror",
        }
    }
}

impl fmt::Display for TensionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognized tension names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown tension level: {0}")]
pub struct UnknownTension(pub String);

impl FromStr for TensionLevel {
    type Err = UnknownTension;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match key.as_str() {
            "calm" => Ok(TensionLevel::Calm),
            "uneasy" => Ok(TensionLevel::Uneasy),
            "tense" => Ok(TensionLevel::Tense),
            "terrifying" => Ok(TensionLevel::Terrifying),
            "cosmic_horror" | "cosmichorror" => Ok(TensionLevel::CosmicHorror),
            _ => Err(UnknownTension(s.to_string())),
        }
    }
}

// ============================================================================
// Story threads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    #[default]
    Open,
    Progressing,
    Resolved,
}

impl ThreadStatus {
    /// Interpret a free-form status word.
    pub fn from_word(word: &str) -> Self {
        match word.trim().to_lowercase().as_str() {
            "open" | "active" | "new" | "introduced" | "" => ThreadStatus::Open,
            "resolved" | "closed" | "complete" | "completed" | "solved" | "done" => {
                ThreadStatus::Resolved
            }
            _ => ThreadStatus::Progressing,
        }
    }
}

/// Status of one plot line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThreadState {
    pub status: ThreadStatus,
    /// Free-form progress note.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(default)]
    pub updated_turn: u32,
}

/// What an upsert did to the thread map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadUpdate {
    Introduced,
    Advanced,
    Unchanged,
}

/// Plot lines keyed by name, in introduction order.
///
/// Serializes as a JSON object. Deserialization also accepts the legacy
/// list-of-names form, treating every entry as open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoryThreads {
    entries: Vec<(String, ThreadState)>,
}

impl StoryThreads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ThreadState> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ThreadState)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Open or progressing threads.
    pub fn active(&self) -> impl Iterator<Item = (&str, &ThreadState)> {
        self.iter().filter(|(_, s)| s.status != ThreadStatus::Resolved)
    }

    /// Introduce a thread or update the status of an existing one.
    ///
    /// Keys are never duplicated and never removed. A resolved thread
    /// stays resolved.
    pub fn upsert(&mut self, name: &str, status: ThreadStatus, detail: &str, turn: u32) -> ThreadUpdate {
        if let Some((_, state)) = self.entries.iter_mut().find(|(n, _)| n == name) {
            let status = if state.status == ThreadStatus::Resolved {
                ThreadStatus::Resolved
            } else {
                status
            };
            if state.status == status && (detail.is_empty() || state.detail == detail) {
                return ThreadUpdate::Unchanged;
            }
            state.status = status;
            if !detail.is_empty() {
                state.detail = detail.to_string();
            }
            state.updated_turn = turn;
            return ThreadUpdate::Advanced;
        }

        self.entries.push((
            name.to_string(),
            ThreadState {
                status,
                detail: detail.to_string(),
                updated_turn: turn,
            },
        ));
        ThreadUpdate::Introduced
    }
}

impl Serialize for StoryThreads {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, state) in &self.entries {
            map.serialize_entry(name, state)?;
        }
        map.end()
    }
}

/// A thread value as found in saved data: full state or a bare status word.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawThreadState {
    Full(ThreadState),
    Word(String),
}

impl From<RawThreadState> for ThreadState {
    fn from(raw: RawThreadState) -> Self {
        match raw {
            RawThreadState::Full(state) => state,
            RawThreadState::Word(word) => ThreadState {
                status: ThreadStatus::from_word(&word),
                detail: word,
                updated_turn: 0,
            },
        }
    }
}

struct ThreadsVisitor;

impl<'de> Visitor<'de> for ThreadsVisitor {
    type Value = StoryThreads;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of thread names to states, or a list of thread names")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut threads = StoryThreads::new();
        while let Some((name, raw)) = access.next_entry::<String, RawThreadState>()? {
            if threads.contains(&name) {
                return Err(de::Error::custom(format!("duplicate story thread: {name}")));
            }
            threads.entries.push((name, raw.into()));
        }
        Ok(threads)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        tracing::warn!("story_threads in legacy list form, converting to map");
        let mut threads = StoryThreads::new();
        while let Some(name) = access.next_element::<String>()? {
            if !threads.contains(&name) {
                threads.entries.push((name, ThreadState::default()));
            }
        }
        Ok(threads)
    }
}

impl<'de> Deserialize<'de> for StoryThreads {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ThreadsVisitor)
    }
}

// ============================================================================
// Flags and history
// ============================================================================

/// Value of a narrative flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FlagValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            FlagValue::Bool(b) => *b,
            FlagValue::Int(n) => *n != 0,
            FlagValue::Text(s) => !s.is_empty(),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Int(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::Text(value.to_string())
    }
}

/// One presented (or selected) choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceRecord {
    pub turn: u32,
    pub choice_id: String,
    pub text: String,
    #[serde(default)]
    pub selected: bool,
    /// Which set shown on this turn the record belongs to, counting from 1.
    #[serde(default)]
    pub presentation: u32,
}

/// Investigation opportunities offered on one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunitySet {
    pub turn: u32,
    pub items: Vec<String>,
}

/// Per-session narrative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeContext {
    pub scene_id: String,
    pub turn_number: u32,
    #[serde(default)]
    pub tension_level: TensionLevel,
    #[serde(default)]
    pub story_threads: StoryThreads,
    #[serde(default)]
    pub narrative_flags: BTreeMap<String, FlagValue>,
    #[serde(default)]
    pub investigation_opportunities: Vec<String>,
    #[serde(default)]
    pub choice_history: Vec<ChoiceRecord>,
    /// Opportunity sets from earlier turns, for anti-repetition.
    #[serde(default)]
    pub opportunity_log: Vec<OpportunitySet>,
}

impl NarrativeContext {
    pub fn new(scene_id: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            turn_number: 0,
            tension_level: TensionLevel::Calm,
            story_threads: StoryThreads::new(),
            narrative_flags: BTreeMap::new(),
            investigation_opportunities: Vec::new(),
            choice_history: Vec::new(),
            opportunity_log: Vec::new(),
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        self.narrative_flags.get(name).is_some_and(FlagValue::is_truthy)
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Deserialize from a JSON value.
    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

// ============================================================================
// Story content
// ============================================================================

/// Where a piece of narrative came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    Ai,
    Fallback,
    ErrorFallback,
}

impl ContentSource {
    pub fn is_fallback(self) -> bool {
        self != ContentSource::Ai
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentSource::Ai => "ai",
            ContentSource::Fallback => "fallback",
            ContentSource::ErrorFallback => "error_fallback",
        }
    }
}

impl fmt::Display for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub source: ContentSource,
    pub agent: String,
    /// Why fallback content was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ContentMetadata {
    pub fn new(source: ContentSource, agent: impl Into<String>) -> Self {
        Self {
            source,
            agent: agent.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// One turn's narrative, fixed once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryContent {
    text: String,
    content_id: String,
    scene_id: String,
    tension_level: TensionLevel,
    investigation_opportunities: Vec<String>,
    story_threads: StoryThreads,
    metadata: ContentMetadata,
}

impl StoryContent {
    pub fn new(
        text: impl Into<String>,
        context: &NarrativeContext,
        metadata: ContentMetadata,
    ) -> Self {
        let prefix = match metadata.source {
            ContentSource::Ai => "story",
            ContentSource::Fallback => "fallback",
            ContentSource::ErrorFallback => "error",
        };
        Self {
            text: text.into(),
            content_id: format!("{prefix}_{}", Uuid::new_v4().simple()),
            scene_id: context.scene_id.clone(),
            tension_level: context.tension_level,
            investigation_opportunities: context.investigation_opportunities.clone(),
            story_threads: context.story_threads.clone(),
            metadata,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }

    pub fn tension_level(&self) -> TensionLevel {
        self.tension_level
    }

    pub fn investigation_opportunities(&self) -> &[String] {
        &self.investigation_opportunities
    }

    pub fn story_threads(&self) -> &StoryThreads {
        &self.story_threads
    }

    pub fn metadata(&self) -> &ContentMetadata {
        &self.metadata
    }

    pub fn source(&self) -> ContentSource {
        self.metadata.source
    }
}

// ============================================================================
// Choices
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceKind {
    Investigate,
    Movement,
    Dialogue,
    Recovery,
    Escape,
    General,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceMetadata {
    pub location: String,
    #[serde(rename = "type")]
    pub kind: ChoiceKind,
    pub fallback: bool,
}

/// A player-facing option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
    pub metadata: ChoiceMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tension_bounds() {
        assert_eq!(TensionLevel::CosmicHorror.escalate(), TensionLevel::CosmicHorror);
        assert_eq!(TensionLevel::Calm.deescalate(), TensionLevel::Calm);
        assert_eq!(TensionLevel::Tense.escalate(), TensionLevel::Terrifying);
        assert_eq!(TensionLevel::Tense.deescalate(), TensionLevel::Uneasy);
        assert_eq!(
            TensionLevel::Calm.step_toward(TensionLevel::CosmicHorror),
            TensionLevel::Uneasy
        );
    }

    #[test]
    fn test_tension_parse() {
        assert_eq!("Cosmic Horror".parse::<TensionLevel>(), Ok(TensionLevel::CosmicHorror));
        assert_eq!("TERRIFYING".parse::<TensionLevel>(), Ok(TensionLevel::Terrifying));
        assert!("spooky".parse::<TensionLevel>().is_err());
        assert_eq!(
            serde_json::to_value(TensionLevel::CosmicHorror).unwrap(),
            json!("cosmic_horror")
        );
    }

    #[test]
    fn test_thread_upsert_keeps_keys_unique() {
        let mut threads = StoryThreads::new();
        assert_eq!(
            threads.upsert("missing_professor", ThreadStatus::Open, "", 1),
            ThreadUpdate::Introduced
        );
        assert_eq!(
            threads.upsert("missing_professor", ThreadStatus::Progressing, "found diary", 2),
            ThreadUpdate::Advanced
        );
        assert_eq!(
            threads.upsert("missing_professor", ThreadStatus::Progressing, "found diary", 3),
            ThreadUpdate::Unchanged
        );
        assert_eq!(threads.len(), 1);
        assert_eq!(threads.get("missing_professor").unwrap().detail, "found diary");
    }

    #[test]
    fn test_resolved_thread_stays_resolved() {
        let mut threads = StoryThreads::new();
        threads.upsert("cult", ThreadStatus::Resolved, "", 1);
        threads.upsert("cult", ThreadStatus::Open, "", 2);
        assert_eq!(threads.get("cult").unwrap().status, ThreadStatus::Resolved);
    }

    #[test]
    fn test_threads_serialize_as_ordered_map() {
        let mut threads = StoryThreads::new();
        threads.upsert("zeta", ThreadStatus::Open, "", 1);
        threads.upsert("alpha", ThreadStatus::Progressing, "", 1);

        let text = serde_json::to_string(&threads).unwrap();
        assert!(text.starts_with("{\"zeta\""));

        let back: StoryThreads = serde_json::from_str(&text).unwrap();
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_threads_accept_legacy_list() {
        let threads: StoryThreads =
            serde_json::from_value(json!(["strange_noises", "old_letter", "strange_noises"])).unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads.get("old_letter").unwrap().status, ThreadStatus::Open);
    }

    #[test]
    fn test_threads_accept_status_words() {
        let threads: StoryThreads =
            serde_json::from_value(json!({"ritual": "completed", "library": "searching shelves"}))
                .unwrap();
        assert_eq!(threads.get("ritual").unwrap().status, ThreadStatus::Resolved);
        assert_eq!(threads.get("library").unwrap().status, ThreadStatus::Progressing);
    }

    #[test]
    fn test_context_round_trip_keeps_threads_as_map() {
        let mut context = NarrativeContext::new("old_house_entrance");
        context.story_threads.upsert("disappearance", ThreadStatus::Open, "", 0);
        context.narrative_flags.insert("met_librarian".into(), true.into());

        let value = context.to_value().unwrap();
        assert!(value["story_threads"].is_object());

        let back = NarrativeContext::from_value(value).unwrap();
        assert_eq!(back, context);
        assert!(back.flag("met_librarian"));
    }

    #[test]
    fn test_story_content_snapshot() {
        let mut context = NarrativeContext::new("study");
        context.investigation_opportunities = vec!["Read the letters".into()];
        let content = StoryContent::new(
            "Dust hangs in the lamplight.",
            &context,
            ContentMetadata::new(ContentSource::Fallback, "story_agent"),
        );
        context.investigation_opportunities.clear();

        assert_eq!(content.investigation_opportunities(), ["Read the letters"]);
        assert!(content.content_id().starts_with("fallback_"));
        assert_eq!(
            serde_json::to_value(content.metadata()).unwrap()["source"],
            "fallback"
        );
    }
}
