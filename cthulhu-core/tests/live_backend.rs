//! Integration tests against a real text-generation backend.
//!
//! These need ANTHROPIC_API_KEY (via .env file or environment), or
//! CTHULHU_BACKEND=ollama with a local Ollama server.
//! Run with: `cargo test -p cthulhu-core --test live_backend -- --ignored`

use cthulhu_core::agents::AgentKind;
use cthulhu_core::character::CharacterSnapshot;
use cthulhu_core::narrative::ContentSource;
use cthulhu_core::session::{Backend, GameSession, SessionConfig};

/// Load environment variables from .env file
fn setup() -> Option<SessionConfig> {
    let _ = dotenvy::dotenv();
    let config = SessionConfig::from_env().ok()?;
    let usable = match config.backend {
        Backend::Claude => config.api_key.is_some(),
        Backend::Ollama => true,
        Backend::Offline => false,
    };
    usable.then(|| config.with_scene("old_house_entrance"))
}

fn investigator() -> CharacterSnapshot {
    CharacterSnapshot::new("Harvey Walters")
        .with_occupation("Professor")
        .with_sanity(70, 99)
        .with_skill("spot_hidden", 55)
        .with_skill("library_use", 70)
}

#[tokio::test]
#[ignore]
async fn test_live_turn_is_narrated() {
    let Some(config) = setup() else {
        eprintln!("Skipping test: no live backend configured");
        return;
    };

    let mut session = GameSession::new(config, investigator()).await.expect("Failed to start session");
    let health = session.health();
    assert!(
        health.agents.iter().any(|a| a.name == AgentKind::Story.name() && a.ready),
        "story agent should connect: {health:?}"
    );

    let result = session.player_action("Examine the front door").await;
    println!("Narration: {}", result.story_content().text());
    println!("Opportunities: {:?}", result.story_content().investigation_opportunities());

    assert!(result.success());
    assert_eq!(result.turn_number(), 1);
    // A slow model can still time out; either way there is text.
    assert!(!result.story_content().text().is_empty());
    if result.story_content().source() == ContentSource::Ai {
        assert!(result.story_content().investigation_opportunities().len() >= 3);
    }

    let choices = session.choices().await;
    println!("Choices: {:?}", choices.iter().map(|c| &c.text).collect::<Vec<_>>());
    assert!((3..=5).contains(&choices.len()));

    session.shutdown().await;
}
