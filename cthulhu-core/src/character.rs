//! Read-only investigator snapshots.
//!
//! The engine never owns the character sheet. Each turn it receives a
//! [`CharacterSnapshot`], reads skills and derived stats from it, and
//! reports any changes back through the turn result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from reading a character snapshot.
#[derive(Debug, Error)]
pub enum CharacterError {
    #[error("Unknown skill: {0}")]
    UnknownSkill(String),

    #[error("Invalid character data: {0}")]
    InvalidData(String),
}

/// The eight characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(rename = "STR")]
    pub strength: i32,
    #[serde(rename = "CON")]
    pub constitution: i32,
    #[serde(rename = "POW")]
    pub power: i32,
    #[serde(rename = "DEX")]
    pub dexterity: i32,
    #[serde(rename = "APP")]
    pub appearance: i32,
    #[serde(rename = "SIZ")]
    pub size: i32,
    #[serde(rename = "INT")]
    pub intelligence: i32,
    #[serde(rename = "EDU")]
    pub education: i32,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            strength: 50,
            constitution: 50,
            power: 50,
            dexterity: 50,
            appearance: 50,
            size: 50,
            intelligence: 50,
            education: 50,
        }
    }
}

/// A bounded resource such as hit points or sanity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub current: i32,
    pub maximum: i32,
}

impl Pool {
    pub fn new(current: i32, maximum: i32) -> Self {
        let maximum = maximum.max(0);
        Self {
            current: current.clamp(0, maximum),
            maximum,
        }
    }

    pub fn full(maximum: i32) -> Self {
        Self::new(maximum, maximum)
    }

    /// Current as a fraction of maximum (0.0 for an empty pool).
    pub fn ratio(&self) -> f64 {
        if self.maximum <= 0 {
            0.0
        } else {
            self.current as f64 / self.maximum as f64
        }
    }

    /// Value after losing `amount`, clamped to `[0, maximum]`.
    pub fn after_loss(&self, amount: i32) -> i32 {
        (self.current - amount).clamp(0, self.maximum)
    }
}

/// Snapshot of an investigator taken at the start of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    pub name: String,
    #[serde(default)]
    pub occupation: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub hit_points: Pool,
    pub sanity: Pool,
    #[serde(default = "default_magic_points")]
    pub magic_points: Pool,
    #[serde(default = "default_luck")]
    pub luck: i32,
    #[serde(default)]
    pub skills: BTreeMap<String, i32>,
}

fn default_magic_points() -> Pool {
    Pool::full(10)
}

fn default_luck() -> i32 {
    50
}

impl CharacterSnapshot {
    /// A fresh investigator with average characteristics.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            occupation: String::new(),
            attributes: Attributes::default(),
            hit_points: Pool::full(10),
            sanity: Pool::new(50, 99),
            magic_points: default_magic_points(),
            luck: default_luck(),
            skills: BTreeMap::new(),
        }
    }

    pub fn with_occupation(mut self, occupation: impl Into<String>) -> Self {
        self.occupation = occupation.into();
        self
    }

    pub fn with_sanity(mut self, current: i32, maximum: i32) -> Self {
        self.sanity = Pool::new(current, maximum);
        self
    }

    pub fn with_hit_points(mut self, current: i32, maximum: i32) -> Self {
        self.hit_points = Pool::new(current, maximum);
        self
    }

    pub fn with_skill(mut self, name: &str, value: i32) -> Self {
        self.skills.insert(normalize_skill(name), value);
        self
    }

    /// Parse a snapshot from JSON.
    ///
    /// Accepts the structured shape this type serializes to, or the flat
    /// shape character sheets use (`sanity_current`, `hit_points_maximum`,
    /// `strength`, skill values as numbers or `{"value": n}` objects).
    pub fn from_value(value: &Value) -> Result<Self, CharacterError> {
        if value.get("sanity").is_some_and(Value::is_object) {
            return serde_json::from_value(value.clone())
                .map_err(|e| CharacterError::InvalidData(e.to_string()));
        }

        let Some(map) = value.as_object() else {
            return Err(CharacterError::InvalidData(
                "expected a JSON object".to_string(),
            ));
        };

        let int = |keys: &[&str]| -> Option<i32> {
            keys.iter()
                .find_map(|k| map.get(*k).and_then(Value::as_i64))
                .map(|v| v as i32)
        };

        let defaults = Attributes::default();
        let attributes = Attributes {
            strength: int(&["STR", "strength"]).unwrap_or(defaults.strength),
            constitution: int(&["CON", "constitution"]).unwrap_or(defaults.constitution),
            power: int(&["POW", "power"]).unwrap_or(defaults.power),
            dexterity: int(&["DEX", "dexterity"]).unwrap_or(defaults.dexterity),
            appearance: int(&["APP", "appearance"]).unwrap_or(defaults.appearance),
            size: int(&["SIZ", "size"]).unwrap_or(defaults.size),
            intelligence: int(&["INT", "intelligence"]).unwrap_or(defaults.intelligence),
            education: int(&["EDU", "education"]).unwrap_or(defaults.education),
        };

        let sanity_current = int(&["sanity_current", "sanity"])
            .ok_or_else(|| CharacterError::InvalidData("missing sanity_current".to_string()))?;
        let sanity_maximum = int(&["sanity_maximum", "sanity_max"]).unwrap_or(99);
        let hp_current = int(&["hit_points_current", "hp"])
            .ok_or_else(|| CharacterError::InvalidData("missing hit_points_current".to_string()))?;
        let hp_maximum = int(&["hit_points_maximum", "hp_max"]).unwrap_or(hp_current);

        let mut skills = BTreeMap::new();
        if let Some(Value::Object(raw)) = map.get("skills") {
            for (name, entry) in raw {
                let value = entry
                    .as_i64()
                    .or_else(|| entry.get("value").and_then(Value::as_i64))
                    .or_else(|| entry.get("current").and_then(Value::as_i64));
                if let Some(value) = value {
                    skills.insert(normalize_skill(name), value as i32);
                }
            }
        }

        Ok(Self {
            name: map
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Investigator")
                .to_string(),
            occupation: map
                .get("occupation")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            attributes,
            hit_points: Pool::new(hp_current, hp_maximum),
            sanity: Pool::new(sanity_current, sanity_maximum),
            magic_points: match (
                int(&["magic_points_current"]),
                int(&["magic_points_maximum"]),
            ) {
                (Some(current), Some(maximum)) => Pool::new(current, maximum),
                (Some(current), None) => Pool::full(current),
                _ => Pool::full(attributes.power / 5),
            },
            luck: int(&["luck"]).unwrap_or_else(default_luck),
            skills,
        })
    }

    /// Current value for a skill, falling back to its base value.
    ///
    /// `sanity`, `luck`, `idea` and `know` resolve to the matching derived
    /// values. Skills with no base value are an error.
    pub fn skill_value(&self, skill: &str) -> Result<i32, CharacterError> {
        let key = normalize_skill(skill);
        if let Some(&value) = self.skills.get(&key) {
            return Ok(value);
        }
        match key.as_str() {
            "sanity" => Ok(self.sanity.current),
            "luck" => Ok(self.luck),
            "idea" => Ok(self.attributes.intelligence),
            "know" => Ok(self.attributes.education),
            "dodge" => Ok(self.attributes.dexterity / 2),
            "language_own" => Ok(self.attributes.education),
            _ => base_skill_value(&key).ok_or_else(|| CharacterError::UnknownSkill(key.clone())),
        }
    }

    pub fn is_low_sanity(&self, threshold: i32) -> bool {
        self.sanity.current < threshold
    }
}

/// Lowercase, underscore-separated skill key.
pub fn normalize_skill(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Base chance for an untrained skill.
pub fn base_skill_value(skill: &str) -> Option<i32> {
    let value = match skill {
        "accounting" => 5,
        "anthropology" => 1,
        "appraise" => 5,
        "archaeology" => 1,
        "art_craft" => 5,
        "charm" => 15,
        "climb" => 20,
        "credit_rating" => 0,
        "cthulhu_mythos" => 0,
        "disguise" => 5,
        "drive_auto" => 20,
        "electrical_repair" => 10,
        "fast_talk" => 5,
        "fighting_brawl" => 25,
        "firearms_handgun" => 20,
        "first_aid" => 30,
        "history" => 5,
        "intimidate" => 15,
        "jump" => 20,
        "law" => 5,
        "library_use" => 20,
        "listen" => 20,
        "locksmith" => 1,
        "mechanical_repair" => 10,
        "medicine" => 1,
        "natural_world" => 10,
        "navigate" => 10,
        "occult" => 5,
        "persuade" => 10,
        "psychology" => 10,
        "sleight_of_hand" => 10,
        "spot_hidden" => 25,
        "stealth" => 20,
        "swim" => 20,
        "throw" => 20,
        "track" => 10,
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pool_clamps() {
        let pool = Pool::new(120, 99);
        assert_eq!(pool.current, 99);
        assert_eq!(pool.after_loss(200), 0);
        assert_eq!(pool.after_loss(-5), 99);
        assert_eq!(Pool::new(-3, 10).current, 0);
    }

    #[test]
    fn test_skill_lookup_with_base_values() {
        let character = CharacterSnapshot::new("Harvey Walters").with_skill("Library Use", 70);

        assert_eq!(character.skill_value("library_use").unwrap(), 70);
        assert_eq!(character.skill_value("Spot Hidden").unwrap(), 25);
        assert_eq!(character.skill_value("dodge").unwrap(), 25);
        assert_eq!(character.skill_value("sanity").unwrap(), 50);
        assert!(matches!(
            character.skill_value("basket_weaving"),
            Err(CharacterError::UnknownSkill(_))
        ));
    }

    #[test]
    fn test_from_flat_value() {
        let value = json!({
            "name": "Test Investigator",
            "sanity_current": 10,
            "sanity_maximum": 60,
            "hit_points_current": 6,
            "hit_points_maximum": 10,
            "strength": 40,
            "skills": {
                "spot_hidden": {"value": 60},
                "Psychology": 45
            }
        });
        let character = CharacterSnapshot::from_value(&value).unwrap();

        assert_eq!(character.name, "Test Investigator");
        assert_eq!(character.sanity, Pool::new(10, 60));
        assert_eq!(character.hit_points, Pool::new(6, 10));
        assert_eq!(character.attributes.strength, 40);
        assert_eq!(character.skill_value("spot_hidden").unwrap(), 60);
        assert_eq!(character.skill_value("psychology").unwrap(), 45);
    }

    #[test]
    fn test_from_structured_value() {
        let original = CharacterSnapshot::new("Ada").with_sanity(45, 70).with_skill("occult", 30);
        let value = serde_json::to_value(&original).unwrap();
        assert_eq!(value["attributes"]["STR"], 50);

        let parsed = CharacterSnapshot::from_value(&value).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_from_value_missing_sanity() {
        let result = CharacterSnapshot::from_value(&json!({"hit_points_current": 5}));
        assert!(matches!(result, Err(CharacterError::InvalidData(_))));
        assert!(CharacterSnapshot::from_value(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_normalize_skill() {
        assert_eq!(normalize_skill("  Spot Hidden "), "spot_hidden");
        assert_eq!(normalize_skill("Sleight-of-Hand"), "sleight_of_hand");
    }
}
