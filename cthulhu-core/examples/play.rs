//! Play an investigation in the terminal.
//!
//! Backend selection comes from the environment (see `SessionConfig::from_env`);
//! set `CTHULHU_BACKEND=offline` to play without a model.
//! Run with: `cargo run -p cthulhu-core --example play`

use cthulhu_core::character::CharacterSnapshot;
use cthulhu_core::persist::auto_save_path;
use cthulhu_core::session::{GameSession, SessionConfig};
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    if dotenvy::from_path("../.env").is_err() {
        let _ = dotenvy::dotenv();
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_target(false)
        .init();

    let config = SessionConfig::from_env()?;
    let investigator = CharacterSnapshot::new("Harvey Walters")
        .with_occupation("Professor")
        .with_sanity(65, 99)
        .with_hit_points(10, 10)
        .with_skill("spot_hidden", 55)
        .with_skill("library_use", 70)
        .with_skill("psychology", 40);
    let save_path = auto_save_path("saves", &investigator.name);

    let mut session = GameSession::new(config, investigator).await?;
    println!("{}\n", session.current_story_content().text());

    let stdin = io::stdin();
    loop {
        let choices = session.choices().await;
        for (i, choice) in choices.iter().enumerate() {
            println!("  {}. {}", i + 1, choice.text);
        }
        print!("\n> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "save" => {
                session.save(&save_path).await?;
                println!("Saved to {}\n", save_path.display());
                continue;
            }
            action => {
                let result = session.player_action(action).await;
                let check = result.skill_check();
                println!(
                    "\n[{} {}: rolled {} vs {}]",
                    result.skill(),
                    check.tier,
                    check.roll,
                    check.target
                );
                println!("{}\n", result.story_content().text());

                let updates = result.character_updates();
                if updates.sanity_change != 0 || updates.hit_point_change != 0 {
                    println!(
                        "Sanity {}/{}  HP {}/{}\n",
                        updates.sanity.current,
                        updates.sanity.maximum,
                        updates.hit_points.current,
                        updates.hit_points.maximum
                    );
                }
                let progress = result.objectives();
                for id in &progress.completed {
                    if let Some(objective) = session.controller().objectives().objective(id) {
                        println!("Objective complete: {}", objective.title);
                    }
                }
                for achievement in &progress.unlocked {
                    println!("Achievement unlocked: {achievement}");
                }
                if updates.madness {
                    println!("Your mind gives way. The investigation is over.");
                    break;
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
