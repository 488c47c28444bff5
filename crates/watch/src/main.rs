//! `insyd-watch` -- follow one user's notifications from a terminal.
//!
//! Opens a live feed against the notification backend and logs every
//! notification as it arrives, reconnecting with backoff when the push
//! channel drops.
//!
//! # Commands
//!
//! | Command    | Effect                                               |
//! |------------|------------------------------------------------------|
//! | `watch`    | Stream the feed until Ctrl-C (default)               |
//! | `demo`     | Submit the demo events for the user, then stream     |
//! | `read-all` | Mark every notification read and exit                |
//! | `prefs`    | Print the stored delivery preferences and exit       |
//!
//! # Environment variables
//!
//! See [`insyd_client::ClientConfig::from_env`]. `INSYD_USER_ID` is
//! required; everything else has a default. `RUST_LOG` overrides the log
//! filter.

use anyhow::Context;
use clap::Parser;
use insyd_client::{ClientConfig, DirectoryClient, NotificationFeed};
use insyd_watch::cli::{Args, Command};
use insyd_watch::render;
use insyd_watch::watch::{self, WatchOutcome};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = Args::parse().selected();
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "insyd_watch=info,insyd_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env().context("Invalid configuration")?;

    tracing::info!(
        user_id = %config.user_id,
        api_url = %config.api_url,
        ?command,
        "Starting insyd-watch",
    );

    if !command.streams() {
        return run_once(command, &config).await;
    }

    let feed = NotificationFeed::start(&config)
        .await
        .context("Failed to open notification feed")?;

    if command == Command::Demo {
        for event in insyd_core::demo_events(&config.user_id) {
            match feed.directory().submit_event(&event).await {
                Ok(created) => {
                    tracing::info!(
                        verb = %event.verb,
                        id = %created.id,
                        "Demo event sent",
                    );
                }
                Err(e) => {
                    tracing::warn!(verb = %event.verb, error = %e, "Demo event rejected");
                }
            }
        }
    }

    let outcome = watch::run(&feed, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;
    feed.close().await;

    match outcome {
        WatchOutcome::Shutdown => {
            tracing::info!("Shutting down");
            Ok(())
        }
        WatchOutcome::Unavailable { failures } => {
            anyhow::bail!("Push channel unavailable after {failures} failed attempts")
        }
    }
}

/// Commands that make one directory call and exit.
async fn run_once(command: Command, config: &ClientConfig) -> anyhow::Result<()> {
    let directory = DirectoryClient::new(config)?;
    match command {
        Command::ReadAll => {
            directory.mark_all_read().await?;
            tracing::info!("All notifications marked read");
        }
        Command::Preferences => {
            let preferences = directory.get_preferences().await?;
            for line in render::preferences_lines(&preferences) {
                tracing::info!("{line}");
            }
        }
        Command::Watch | Command::Demo => {}
    }
    Ok(())
}
