//! Per-user delivery preferences.
//!
//! The backend stores exactly one [`Preferences`] per user with
//! last-write-wins semantics. The client only ever reads or replaces the
//! whole object.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::channels::KNOWN_CHANNELS;
use crate::notification::NotificationType;

/// How often summarized notification emails are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestCadence {
    None,
    #[default]
    Daily,
    Weekly,
}

/// Delivery preferences for one user.
///
/// Both maps are open-ended: a channel or type missing from the map is
/// treated as enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Channel name (`in_app`, `email`, ...) -> enabled.
    #[serde(default)]
    pub channels: BTreeMap<String, bool>,
    /// Notification type (`social`, `collaboration`, ...) -> enabled.
    #[serde(default)]
    pub types: BTreeMap<String, bool>,
    #[serde(default)]
    pub digest_cadence: DigestCadence,
}

impl Default for Preferences {
    /// All known channels and types enabled, daily digest.
    ///
    /// This is what the client assumes when the backend has no stored
    /// preferences for the user.
    fn default() -> Self {
        let channels = KNOWN_CHANNELS
            .iter()
            .map(|c| (c.to_string(), true))
            .collect();
        let types = NotificationType::known()
            .iter()
            .map(|t| (t.as_str().to_string(), true))
            .collect();
        Self {
            channels,
            types,
            digest_cadence: DigestCadence::Daily,
        }
    }
}

impl Preferences {
    pub fn is_channel_enabled(&self, channel: &str) -> bool {
        self.channels.get(channel).copied().unwrap_or(true)
    }

    pub fn is_type_enabled(&self, kind: &NotificationType) -> bool {
        self.types.get(kind.as_str()).copied().unwrap_or(true)
    }

    pub fn set_channel(&mut self, channel: impl Into<String>, enabled: bool) {
        self.channels.insert(channel.into(), enabled);
    }

    pub fn set_type(&mut self, kind: &NotificationType, enabled: bool) {
        self.types.insert(kind.as_str().to_string(), enabled);
    }
}
