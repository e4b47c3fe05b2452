//! Narrative context persistence.
//!
//! Saves are versioned JSON. Story threads are always written as a map;
//! older saves that stored them as a list still load.

use crate::narrative::{NarrativeContext, TensionLevel};
use crate::objectives::ObjectiveTracker;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current save file version.
pub const SAVE_VERSION: u32 = 1;

/// Summary readable without loading the whole context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub scene_id: String,
    pub turn_number: u32,
    pub tension_level: TensionLevel,
    pub open_threads: usize,
}

/// A saved narrative context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedNarrative {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// Seconds since the Unix epoch.
    pub saved_at: String,

    pub metadata: SaveMetadata,

    pub context: NarrativeContext,

    /// Scenario progress. Older saves have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<ObjectiveTracker>,
}

impl SavedNarrative {
    pub fn new(context: NarrativeContext) -> Self {
        let metadata = SaveMetadata {
            scene_id: context.scene_id.clone(),
            turn_number: context.turn_number,
            tension_level: context.tension_level,
            open_threads: context.story_threads.active().count(),
        };
        Self {
            version: SAVE_VERSION,
            saved_at: unix_now(),
            metadata,
            context,
            objectives: None,
        }
    }

    pub fn with_objectives(mut self, objectives: ObjectiveTracker) -> Self {
        self.objectives = Some(objectives);
        self
    }

    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        tracing::info!(path = %path.display(), turn = self.metadata.turn_number, "Narrative saved");
        Ok(())
    }

    /// Load a save, rejecting other format versions.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, PersistError> {
        #[derive(Deserialize)]
        struct Version {
            version: u32,
        }

        let Version { version } = serde_json::from_str(content)?;
        if version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: version,
            });
        }
        Ok(serde_json::from_str(content)?)
    }

    /// Read only the metadata of a save.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SaveMetadata,
        }

        let partial: Partial = serde_json::from_str(&content)?;
        if partial.version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: partial.version,
            });
        }
        Ok(partial.metadata)
    }
}

/// Conventional autosave location for a named investigation.
pub fn auto_save_path(save_dir: impl AsRef<Path>, name: &str) -> PathBuf {
    let safe: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    save_dir.as_ref().join(format!("{safe}_autosave.json"))
}

fn unix_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrative::ThreadStatus;
    use crate::objectives::Scenario;
    use serde_json::json;

    fn context() -> NarrativeContext {
        let mut context = NarrativeContext::new("library");
        context.turn_number = 4;
        context.tension_level = TensionLevel::Tense;
        context.story_threads.upsert("Missing professor", ThreadStatus::Progressing, "last seen here", 2);
        context.story_threads.upsert("Strange tome", ThreadStatus::Open, "", 3);
        context
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saves").join("game.json");

        let saved = SavedNarrative::new(context());
        saved.save_json(&path).await.unwrap();

        let loaded = SavedNarrative::load_json(&path).await.unwrap();
        assert_eq!(loaded.context, saved.context);
        let names: Vec<&str> = loaded.context.story_threads.names().collect();
        assert_eq!(names, vec!["Missing professor", "Strange tome"]);

        let metadata = SavedNarrative::peek_metadata(&path).await.unwrap();
        assert_eq!(metadata.turn_number, 4);
        assert_eq!(metadata.open_threads, 2);
    }

    #[tokio::test]
    async fn test_threads_are_written_as_a_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.json");
        SavedNarrative::new(context()).save_json(&path).await.unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).await.unwrap()).unwrap();
        assert!(raw["context"]["story_threads"].is_object());
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut value = serde_json::to_value(SavedNarrative::new(context())).unwrap();
        value["version"] = json!(99);
        let result = SavedNarrative::from_json(&value.to_string());
        assert!(matches!(
            result,
            Err(PersistError::VersionMismatch { expected: 1, found: 99 })
        ));
    }

    #[test]
    fn test_legacy_thread_list_loads() {
        let mut value = serde_json::to_value(SavedNarrative::new(context())).unwrap();
        value["context"]["story_threads"] = json!(["Missing professor", "Strange tome"]);
        let loaded = SavedNarrative::from_json(&value.to_string()).unwrap();
        assert_eq!(loaded.context.story_threads.len(), 2);
        assert_eq!(
            loaded.context.story_threads.get("Strange tome").map(|t| t.status),
            Some(ThreadStatus::Open)
        );
    }

    #[tokio::test]
    async fn test_objectives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.json");
        let tracker = ObjectiveTracker::new(Scenario::MiskatonicLibrary);
        SavedNarrative::new(context())
            .with_objectives(tracker.clone())
            .save_json(&path)
            .await
            .unwrap();

        let loaded = SavedNarrative::load_json(&path).await.unwrap();
        assert_eq!(loaded.objectives, Some(tracker));
    }

    #[test]
    fn test_save_without_objectives_loads() {
        let mut value = serde_json::to_value(SavedNarrative::new(context())).unwrap();
        assert!(value.get("objectives").is_none());
        let loaded = SavedNarrative::from_json(&value.to_string()).unwrap();
        assert_eq!(loaded.objectives, None);
    }

    #[test]
    fn test_auto_save_path() {
        let path = auto_save_path("/saves", "Arkham Case #1");
        assert!(path.to_string_lossy().ends_with("Arkham_Case__1_autosave.json"));
    }
}
