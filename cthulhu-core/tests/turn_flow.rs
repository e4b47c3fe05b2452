//! Multi-turn flows through the controller with scripted narration.

use cthulhu_core::character::CharacterSnapshot;
use cthulhu_core::narrative::{ContentSource, TensionLevel};
use cthulhu_core::objectives::{AchievementKind, ObjectiveStatus, Scenario};
use cthulhu_core::persist::SavedNarrative;
use cthulhu_core::story::{StoryConfig, StoryStateMachine};
use cthulhu_core::testing::{
    assert_distinct_choices, assert_sanity, assert_source, assert_turn, ScriptedGenerator, TestHarness,
};
use std::collections::HashMap;
use std::sync::Arc;

fn narration(text: &str, leads: &[&str], tension: &str, threads: &[&str]) -> String {
    let mut out = format!("STORY_TEXT: {text}\nINVESTIGATION_OPPORTUNITIES:\n");
    for lead in leads {
        out.push_str(&format!("- {lead}\n"));
    }
    out.push_str(&format!("TENSION_CHANGE: {tension}\nSTORY_THREADS:\n"));
    for thread in threads {
        out.push_str(&format!("- {thread}\n"));
    }
    out
}

#[tokio::test]
async fn test_narrated_investigation_builds_threads() {
    let generator = ScriptedGenerator::new()
        .with_reply(narration(
            "Dust lies thick on the desk, except for one clean rectangle.",
            &["The clean rectangle", "A smear of ink", "The window latch"],
            "uneasy",
            &["The missing book: new"],
        ))
        .with_reply(narration(
            "Beneath the blotter, a pressed page bears a drawing of a tower.",
            &["The tower drawing", "The blotter stains", "The torn edge"],
            "tense",
            &["The missing book: progressing"],
        ));
    // Failed checks let the narrator's suggested tension through.
    let mut harness = TestHarness::new("study", Arc::new(generator), vec![90]).await;

    let first = harness.act("Search the desk").await;
    assert_source(&first, ContentSource::Ai);
    assert_eq!(first.story_content().investigation_opportunities().len(), 3);

    let second = harness.act("Look under the blotter").await;
    assert_source(&second, ContentSource::Ai);
    assert_turn(&harness, 2);

    let story = harness.controller.story();
    assert_eq!(story.tension(), TensionLevel::Tense);
    let threads = &story.context().story_threads;
    assert_eq!(threads.len(), 1);
    assert!(threads.contains("The missing book"));
    assert_eq!(harness.controller.stats().ai_turns, 2);
}

#[tokio::test]
async fn test_repeated_candidates_are_replaced() {
    let same = narration(
        "The room is as you left it.",
        &["The desk drawer", "The bookshelf", "The fireplace"],
        "calm",
        &[],
    );
    let generator = ScriptedGenerator::new()
        .with_reply(same.clone())
        .with_reply(same.clone())
        .with_reply(same);
    let mut harness = TestHarness::new("study", Arc::new(generator), vec![20]).await;

    let mut sets = Vec::new();
    for action in ["Examine the desk", "Inspect the shelves", "Search the fireplace"] {
        let result = harness.act(action).await;
        sets.push(result.story_content().investigation_opportunities().to_vec());
    }

    assert_eq!(sets[0], vec!["The desk drawer", "The bookshelf", "The fireplace"]);
    for set in &sets[1..] {
        assert!(set.len() >= 3);
        assert!(!set.iter().any(|item| sets[0].contains(item)), "repeated lead in {set:?}");
    }
}

#[tokio::test]
async fn test_three_investigations_rarely_repeat() {
    let mut harness = TestHarness::offline("study", vec![30]).await;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for action in ["Examine the bookshelf", "Search the desk", "Inspect the window"] {
        let result = harness.act(action).await;
        assert_source(&result, ContentSource::Fallback);
        for item in result.story_content().investigation_opportunities() {
            *counts.entry(item.to_lowercase()).or_default() += 1;
        }
    }

    let repeated = counts.values().filter(|&&n| n > 1).count();
    assert!(repeated <= 1, "too many repeated leads: {counts:?}");
    assert_turn(&harness, 3);
}

#[tokio::test]
async fn test_choices_avoid_recent_options() {
    let mut harness = TestHarness::offline("library", vec![30]).await;

    let first = harness.choices().await;
    assert!((3..=5).contains(&first.len()));
    assert_distinct_choices(&first);

    harness.act("1").await;
    let second = harness.choices().await;
    assert_distinct_choices(&second);
    let overlap = second.iter().filter(|c| first.iter().any(|f| f.text == c.text)).count();
    assert_eq!(overlap, 0, "first: {first:?}\nsecond: {second:?}");
}

#[tokio::test]
async fn test_numbered_selection_uses_choice_text() {
    let mut harness = TestHarness::offline("kitchen", vec![30]).await;
    let choices = harness.choices().await;

    let result = harness.act("2").await;
    assert_eq!(result.player_action(), choices[1].text);

    let history = &harness.controller.story().context().choice_history;
    assert!(history.iter().any(|r| r.selected && r.choice_id == choices[1].id));
}

#[tokio::test]
async fn test_numbered_selection_follows_latest_choices() {
    let mut harness = TestHarness::offline("kitchen", vec![30]).await;
    let first = harness.choices().await;
    let second = harness.choices().await;
    assert!(second.len() >= 2);
    assert!(first.iter().all(|a| second.iter().all(|b| a.id != b.id)));

    let result = harness.act("2").await;
    assert_eq!(result.player_action(), second[1].text);

    let history = &harness.controller.story().context().choice_history;
    assert!(history.iter().any(|r| r.selected && r.choice_id == second[1].id));
}

#[tokio::test]
async fn test_terrifying_sanity_loss_stays_in_bounds() {
    let mut context = cthulhu_core::narrative::NarrativeContext::new("old_house_study");
    context.tension_level = TensionLevel::Terrifying;
    let story = StoryStateMachine::from_context(context, StoryConfig::default());

    let mut agents = cthulhu_core::agents::AgentManager::new();
    agents.register_agent(Arc::new(cthulhu_core::agents::MemoryAgent::new(Default::default())));
    let controller = cthulhu_core::turn::TurnController::new(story, Arc::new(agents), Default::default())
        .unwrap()
        .with_dice(cthulhu_core::dice::DiceEngine::seeded(99));
    let mut harness = TestHarness {
        controller,
        character: CharacterSnapshot::new("Agnes Baker").with_sanity(10, 99),
    };

    let result = harness.act("Read the letter").await;
    let sanity = result.character_updates().sanity.current;
    assert!((2..=10).contains(&sanity), "sanity {sanity}");
    assert!(result.character_updates().sanity_check.is_some());
}

#[tokio::test]
async fn test_madness_at_zero_sanity() {
    // Skill check 40, sanity check 99 fails, loss roll 8.
    let mut harness = TestHarness::offline("crypt", vec![40, 99, 8])
        .await
        .with_character(CharacterSnapshot::new("Silas Marsh").with_sanity(5, 99));

    let result = harness.act("Touch the sarcophagus").await;
    assert_sanity(&harness, 0);
    assert!(result.character_updates().madness);
    assert!(harness.controller.story().context().flag("madness"));
    assert_eq!(result.objectives().failed, vec!["keep_your_mind"]);
    assert!(result.objectives().unlocked.contains(&AchievementKind::EmbraceOfMadness));
}

#[tokio::test]
async fn test_library_objectives_follow_turns() {
    let mut harness = TestHarness::offline("miskatonic_library_restricted_section", vec![1]).await;
    assert_eq!(harness.controller.objectives().scenario(), Scenario::MiskatonicLibrary);

    let result = harness.act("Ask the night librarian what she heard").await;
    let completed = &result.objectives().completed;
    assert!(completed.contains(&"librarian_testimony".to_string()), "{completed:?}");
    assert!(completed.contains(&"restricted_section".to_string()), "{completed:?}");
    assert!(!result.objectives().scenario_completed);

    let tracker = harness.controller.objectives();
    assert_eq!(
        tracker.objective("librarian_testimony").map(|o| o.status),
        Some(ObjectiveStatus::Completed)
    );
    assert_eq!(tracker.objective("stop_the_ritual").map(|o| o.status), Some(ObjectiveStatus::Active));

    // Nothing new to complete on a quiet turn.
    let result = harness.act("Wait and listen").await;
    assert!(result.objectives().completed.is_empty());
}

#[tokio::test]
async fn test_saved_progress_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("case.json");

    let mut harness = TestHarness::offline("library", vec![30]).await;
    harness.act("Search the stacks").await;
    harness.act("Read the card catalogue").await;
    SavedNarrative::new(harness.controller.story().context().clone())
        .save_json(&path)
        .await
        .unwrap();

    let loaded = SavedNarrative::load_json(&path).await.unwrap();
    assert_eq!(loaded.metadata.turn_number, 2);
    assert_eq!(&loaded.context, harness.controller.story().context());
}
