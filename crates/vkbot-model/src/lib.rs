//! # vkbot Model
//!
//! Typed VK objects built from long-poll payloads.
//!
//! | Type | Source |
//! |------|--------|
//! | [`Message`] | group `message_new` / `message_reply` / `message_edit` |
//! | [`UserMessage`] | user long-poll code `4` |
//! | [`Page`] | `users.get` / `groups.getById` |
//! | [`PageEvent`] | `group_join`, `message_allow`, `user_block`, ... |
//! | [`TypingState`] | `message_typing_state` |
//! | [`GroupUpdate`] | every other group event |
//!
//! Decoding never recurses without bound: nested forwarded messages are cut
//! at a configurable depth (see [`Message::from_value`]).

pub mod error;
pub mod message;
pub mod page;
pub mod update;
pub mod user;

pub use error::{ModelError, ModelResult};
pub use message::{Attachment, DEFAULT_MAX_NESTING_DEPTH, Message, MessageAction, START_PAYLOAD};
pub use page::{Group, Page, PageEvent, TypingState, User};
pub use update::{
    GroupUpdate, IMPLEMENTED_EVENTS, LongPollSettings, SettingsWarning, is_implemented,
};
pub use user::{NEW_MESSAGE_CODE, UserMessage, UserMessageFlags};
