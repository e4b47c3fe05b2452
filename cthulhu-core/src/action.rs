//! Player action classification.
//!
//! Free text is matched word by word against fixed stem tables. The first
//! word that matches any table decides the action type, so "go and look
//! at the desk" is movement while "look, then go" is investigation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Skill rolled when nothing more specific applies.
pub const DEFAULT_SKILL: &str = "luck";

/// Coarse kind of player action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Investigate,
    Dialogue,
    Movement,
    Other,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Investigate => "investigate",
            ActionType::Dialogue => "dialogue",
            ActionType::Movement => "movement",
            ActionType::Other => "other",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const INVESTIGATE_STEMS: &[&str] = &[
    "investigat", "examin", "search", "look", "inspect", "study", "analy", "observ", "check",
    "explor", "read", "peer", "listen", "smell", "feel", "touch", "rummag", "scan",
];

const DIALOGUE_STEMS: &[&str] = &[
    "talk", "speak", "ask", "tell", "say", "question", "convinc", "persuad", "lie", "bluff",
    "shout", "whisper", "greet", "chat", "discuss", "threaten", "charm", "call", "interrogat",
];

const MOVEMENT_STEMS: &[&str] = &[
    "go", "move", "enter", "exit", "leave", "climb", "descend", "ascend", "walk", "run", "flee",
    "sneak", "head", "approach", "follow", "return", "jump", "leap", "hide", "creep", "swim",
    "retreat", "escape",
];

/// Words that are too short to match by prefix.
const EXACT_ONLY: &[&str] = &["go", "ask", "say", "run", "lie", "head", "call"];

fn matches_stem(word: &str, stem: &str) -> bool {
    if EXACT_ONLY.contains(&stem) {
        word.strip_prefix(stem)
            .is_some_and(|rest| ["", "s", "es", "ed", "ing", "ning", "ned"].contains(&rest))
    } else {
        word.starts_with(stem)
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Classification of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionAnalysis {
    pub original: String,
    pub action_type: ActionType,
    /// Words that matched the action tables.
    pub keywords: Vec<String>,
    /// Skill mapped from the action, if any table entry applied.
    pub skill: Option<&'static str>,
}

impl ActionAnalysis {
    /// Skill to roll, falling back to the generic default.
    pub fn skill_or_default(&self) -> &'static str {
        self.skill.unwrap_or(DEFAULT_SKILL)
    }
}

/// Classify an action and map it to a skill.
pub fn classify_action(text: &str) -> ActionAnalysis {
    let words = tokens(text);
    let tables = [
        (ActionType::Investigate, INVESTIGATE_STEMS),
        (ActionType::Dialogue, DIALOGUE_STEMS),
        (ActionType::Movement, MOVEMENT_STEMS),
    ];

    let mut action_type = None;
    let mut keywords = Vec::new();
    for word in &words {
        for (kind, stems) in &tables {
            if stems.iter().any(|stem| matches_stem(word, stem)) {
                action_type.get_or_insert(*kind);
                keywords.push(word.clone());
                break;
            }
        }
    }

    // Quoted speech is dialogue regardless of verbs.
    let action_type = if text.contains('"') {
        ActionType::Dialogue
    } else {
        action_type.unwrap_or(ActionType::Other)
    };

    let skill = map_skill(action_type, &words);
    ActionAnalysis {
        original: text.trim().to_string(),
        action_type,
        keywords,
        skill,
    }
}

fn any_word(words: &[String], stems: &[&str]) -> bool {
    words.iter().any(|w| stems.iter().any(|s| w.starts_with(s)))
}

/// Skill lookup table keyed on action type and matched words.
fn map_skill(action_type: ActionType, words: &[String]) -> Option<&'static str> {
    match action_type {
        ActionType::Investigate => {
            if any_word(words, &["book", "tome", "librar", "archive", "record", "newspaper", "catalog"]) {
                Some("library_use")
            } else if any_word(words, &["listen", "hear"]) {
                Some("listen")
            } else if any_word(words, &["symbol", "sigil", "rune", "occult", "ritual"]) {
                Some("occult")
            } else {
                Some("spot_hidden")
            }
        }
        ActionType::Dialogue => {
            if any_word(words, &["convinc", "persuad"]) {
                Some("persuade")
            } else if any_word(words, &["lie", "lying", "bluff", "trick"]) {
                Some("fast_talk")
            } else if any_word(words, &["threaten", "intimidat"]) {
                Some("intimidate")
            } else if any_word(words, &["charm", "flatter"]) {
                Some("charm")
            } else {
                Some("psychology")
            }
        }
        ActionType::Movement => {
            if any_word(words, &["climb", "ascend", "scale"]) {
                Some("climb")
            } else if any_word(words, &["sneak", "hide", "creep", "quiet", "silent"]) {
                Some("stealth")
            } else if any_word(words, &["jump", "leap"]) {
                Some("jump")
            } else if any_word(words, &["swim"]) {
                Some("swim")
            } else if any_word(words, &["run", "flee", "escape", "dodge"]) {
                Some("dodge")
            } else {
                None
            }
        }
        ActionType::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_investigate() {
        let analysis = classify_action("I examine the strange symbols on the wall");
        assert_eq!(analysis.action_type, ActionType::Investigate);
        assert_eq!(analysis.skill, Some("occult"));

        let analysis = classify_action("Search the desk");
        assert_eq!(analysis.skill, Some("spot_hidden"));

        let analysis = classify_action("Read the old book");
        assert_eq!(analysis.skill, Some("library_use"));
    }

    #[test]
    fn test_classify_dialogue() {
        let analysis = classify_action("Ask the librarian about the missing tome");
        assert_eq!(analysis.action_type, ActionType::Dialogue);
        assert_eq!(analysis.skill, Some("psychology"));

        let analysis = classify_action("Try to convince the guard to let me in");
        assert_eq!(analysis.skill, Some("persuade"));

        let analysis = classify_action("\"Who are you?\"");
        assert_eq!(analysis.action_type, ActionType::Dialogue);
    }

    #[test]
    fn test_classify_movement() {
        let analysis = classify_action("Climb the drainpipe");
        assert_eq!(analysis.action_type, ActionType::Movement);
        assert_eq!(analysis.skill, Some("climb"));

        let analysis = classify_action("Sneak past the door");
        assert_eq!(analysis.skill, Some("stealth"));

        let analysis = classify_action("Go upstairs");
        assert_eq!(analysis.action_type, ActionType::Movement);
        assert_eq!(analysis.skill_or_default(), DEFAULT_SKILL);
    }

    #[test]
    fn test_first_matching_word_wins() {
        assert_eq!(classify_action("go and look at the desk").action_type, ActionType::Movement);
        assert_eq!(classify_action("look, then go").action_type, ActionType::Investigate);
    }

    #[test]
    fn test_short_stems_do_not_overmatch() {
        // "good" and "headache" must not count as movement.
        assert_eq!(classify_action("good headache").action_type, ActionType::Other);
        assert_eq!(classify_action("goes").action_type, ActionType::Movement);
    }

    #[test]
    fn test_unmatched_is_other() {
        let analysis = classify_action("pray");
        assert_eq!(analysis.action_type, ActionType::Other);
        assert_eq!(analysis.skill, None);
        assert!(analysis.keywords.is_empty());
    }
}
