use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use sleeptrack::{
    ConfigStore, Database, FormatOptions, SessionTrackerController, TrackerSnapshot,
};

fn render(snapshot: &TrackerSnapshot) {
    println!();
    println!("{}", snapshot.formatted_sessions);

    let mut available = Vec::new();
    if snapshot.start_button_visible {
        available.push("start");
    }
    if snapshot.stop_button_visible {
        available.push("stop");
    }
    if snapshot.clear_button_visible {
        available.push("clear");
    }
    println!("Available: {} (plus list, quality <id> <0-5>, quit)", available.join(", "));
}

/// Drains the one-shot signals the way a UI layer would: observe once,
/// then acknowledge so a re-render cannot re-trigger them.
async fn consume_events(controller: &SessionTrackerController) {
    let snapshot = controller.snapshot();

    if snapshot.pending_snackbar {
        println!("All your sleep data has been cleared.");
        controller.done_showing_snackbar().await;
    }

    if let Some(session) = snapshot.pending_rating {
        println!(
            "Session {} finished. Rate it with: quality {} <0-5>",
            session.id, session.id
        );
        controller.done_navigating().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config_path = std::env::var_os("SLEEPTRACK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sleeptrack.json"));
    let store = ConfigStore::new(config_path)?;
    let config = store.config();

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("sleeptrack.sqlite3"));
    let database = Database::new(db_path)?;

    let options = FormatOptions {
        use_24_hour_clock: config.use_24_hour_clock,
    };
    let controller = SessionTrackerController::new(database.clone(), options).await?;

    log::info!("sleeptrack starting up (database at {})", database.path().display());
    render(&controller.snapshot());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let mut parts = line.split_whitespace();
        let command = match parts.next() {
            Some(word) => word,
            None => continue,
        };

        let outcome = match command {
            "start" => controller.start_tracking().await.map(|_| ()),
            "stop" => controller.stop_tracking().await.map(|_| ()),
            "clear" => controller.clear().await,
            "list" => {
                render(&controller.snapshot());
                Ok(())
            }
            "quality" => {
                let parsed = parts
                    .next()
                    .zip(parts.next())
                    .and_then(|(id, quality)| Some((id.parse().ok()?, quality.parse().ok()?)));
                match parsed {
                    Some((id, quality)) => database.set_quality(id, quality).await,
                    None => {
                        println!("usage: quality <id> <0-5>");
                        Ok(())
                    }
                }
            }
            "quit" | "exit" => break,
            other => {
                println!("unknown command '{other}'");
                Ok(())
            }
        };

        if let Err(err) = outcome {
            println!("error: {err:#}");
        }

        consume_events(&controller).await;
        render(&controller.snapshot());
    }

    controller.shutdown().await?;
    Ok(())
}
