//! Command-line arguments.

use clap::{Parser, Subcommand};

/// insyd-watch - follow one user's notifications from a terminal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Args {
    /// The requested command, `watch` when none was given.
    pub fn selected(&self) -> Command {
        self.command.unwrap_or(Command::Watch)
    }
}

/// What the binary was asked to do.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stream the feed until interrupted (default)
    Watch,
    /// Submit the demo events, then stream the feed
    Demo,
    /// Mark every notification read and exit
    ReadAll,
    /// Print the stored delivery preferences and exit
    #[command(name = "prefs", alias = "preferences")]
    Preferences,
}

impl Command {
    /// Whether the command streams the feed after its one-shot work.
    pub fn streams(self) -> bool {
        matches!(self, Command::Watch | Command::Demo)
    }
}
