//! One-line text rendering of notifications and preferences.

use insyd_core::{Notification, Preferences};

/// `* [social] Project liked: Alice liked your project` for unread,
/// a leading space for read.
pub fn notification_line(n: &Notification) -> String {
    let marker = if n.is_read { ' ' } else { '*' };
    if n.body.is_empty() {
        format!("{marker} [{}] {}", n.kind, n.title)
    } else {
        format!("{marker} [{}] {}: {}", n.kind, n.title, n.body)
    }
}

pub fn preferences_lines(p: &Preferences) -> Vec<String> {
    let on_off = |enabled: bool| if enabled { "on" } else { "off" };
    let mut lines = Vec::new();
    for (channel, enabled) in &p.channels {
        lines.push(format!("channel {channel}: {}", on_off(*enabled)));
    }
    for (kind, enabled) in &p.types {
        lines.push(format!("type {kind}: {}", on_off(*enabled)));
    }
    lines.push(format!("digest: {:?}", p.digest_cadence).to_lowercase());
    lines
}
