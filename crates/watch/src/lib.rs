//! Terminal watcher for one user's notification feed.
//!
//! The binary loads [`insyd_client::ClientConfig`] from the environment,
//! opens a [`insyd_client::NotificationFeed`] and logs every notification as
//! it arrives. See `main.rs` for the supported commands.

pub mod cli;
pub mod render;
pub mod watch;
