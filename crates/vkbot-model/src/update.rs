//! Group long-poll events and settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};

/// Group events this client knows how to route.
///
/// Also the set of events switched on when long-poll is repaired remotely.
pub const IMPLEMENTED_EVENTS: &[&str] = &[
    "message_new",
    "message_reply",
    "message_allow",
    "message_deny",
    "message_edit",
    "message_typing_state",
    "photo_new",
    "audio_new",
    "video_new",
    "wall_reply_new",
    "wall_reply_edit",
    "wall_reply_delete",
    "wall_reply_restore",
    "wall_post_new",
    "wall_repost",
    "board_post_new",
    "board_post_edit",
    "board_post_restore",
    "board_post_delete",
    "photo_comment_new",
    "photo_comment_edit",
    "photo_comment_delete",
    "photo_comment_restore",
    "video_comment_new",
    "video_comment_edit",
    "video_comment_delete",
    "video_comment_restore",
    "market_comment_new",
    "market_comment_edit",
    "market_comment_delete",
    "market_comment_restore",
    "poll_vote_new",
    "group_join",
    "group_leave",
    "group_change_settings",
    "group_change_photo",
    "group_officers_edit",
    "user_block",
    "user_unblock",
];

/// Returns `true` if `event` is one of [`IMPLEMENTED_EVENTS`].
pub fn is_implemented(event: &str) -> bool {
    IMPLEMENTED_EVENTS.contains(&event)
}

/// A group event delivered without further decoding.
///
/// Used for comments, posts, media and the other events whose object is
/// handed to the application as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupUpdate {
    /// Event type, e.g. `wall_reply_new`.
    pub event_type: String,
    /// The event object.
    pub object: Value,
}

impl GroupUpdate {
    /// Creates an update.
    pub fn new(event_type: impl Into<String>, object: Value) -> Self {
        Self {
            event_type: event_type.into(),
            object,
        }
    }

    /// Reads an integer field of the object.
    pub fn i64_field(&self, name: &str) -> Option<i64> {
        self.object.get(name).and_then(Value::as_i64)
    }
}

// ============================================================================
// Long-poll settings
// ============================================================================

/// Long-poll API version below which a warning is emitted.
pub const RECOMMENDED_API_MINOR: u32 = 103;

/// Response of `groups.getLongPollSettings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongPollSettings {
    /// Whether long-poll is enabled.
    #[serde(default)]
    pub is_enabled: bool,
    /// Long-poll API version, e.g. `5.103`.
    #[serde(default)]
    pub api_version: String,
    /// Event name → 0/1.
    #[serde(default)]
    pub events: BTreeMap<String, i64>,
}

/// A problem with the community's long-poll settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsWarning {
    /// No event is enabled; nothing will ever be delivered.
    AllEventsDisabled,
    /// `message_new` is disabled.
    MessageNewDisabled,
    /// The long-poll API version is older than recommended.
    OutdatedApiVersion(String),
}

impl std::fmt::Display for SettingsWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllEventsDisabled => write!(
                f,
                "All longpoll events are disabled. Bot will not function until events are enabled"
            ),
            Self::MessageNewDisabled => write!(
                f,
                "message_new event is disabled. Commands will not function until message_new is enabled"
            ),
            Self::OutdatedApiVersion(version) => write!(
                f,
                "You are using old LongPoll API version ({version}), consider upgrading to newer one"
            ),
        }
    }
}

impl LongPollSettings {
    /// Decodes the method response.
    pub fn from_value(value: &Value) -> ModelResult<Self> {
        Self::deserialize(value).map_err(|e| ModelError::decode("long-poll settings", e))
    }

    /// Minor component of the API version (`103` for `5.103`).
    pub fn api_minor(&self) -> Option<u32> {
        self.api_version.split('.').nth(1)?.parse().ok()
    }

    /// Lists what is wrong with these settings.
    pub fn warnings(&self) -> Vec<SettingsWarning> {
        let mut warnings = Vec::new();
        if self.events.values().all(|enabled| *enabled == 0) {
            warnings.push(SettingsWarning::AllEventsDisabled);
        } else if self.events.get("message_new").copied().unwrap_or(0) == 0 {
            warnings.push(SettingsWarning::MessageNewDisabled);
        }
        if self.api_minor().is_some_and(|minor| minor < RECOMMENDED_API_MINOR) {
            warnings.push(SettingsWarning::OutdatedApiVersion(self.api_version.clone()));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_implemented_events() {
        assert!(is_implemented("message_new"));
        assert!(is_implemented("group_officers_edit"));
        assert!(!is_implemented("donut_subscription_create"));
    }

    #[test]
    fn test_settings_warnings() {
        let disabled = LongPollSettings::from_value(&json!({
            "is_enabled": true,
            "api_version": "5.103",
            "events": {"message_new": 0, "group_join": 0}
        }))
        .unwrap();
        assert_eq!(disabled.warnings(), vec![SettingsWarning::AllEventsDisabled]);

        let no_messages = LongPollSettings::from_value(&json!({
            "is_enabled": true,
            "api_version": "5.95",
            "events": {"message_new": 0, "group_join": 1}
        }))
        .unwrap();
        assert_eq!(
            no_messages.warnings(),
            vec![
                SettingsWarning::MessageNewDisabled,
                SettingsWarning::OutdatedApiVersion("5.95".into())
            ]
        );

        let healthy = LongPollSettings::from_value(&json!({
            "is_enabled": true,
            "api_version": "5.131",
            "events": {"message_new": 1}
        }))
        .unwrap();
        assert!(healthy.warnings().is_empty());
    }
}
