//! # vkbot
//!
//! A long-poll bot client for VK communities and user accounts.
//!
//! ## Overview
//!
//! vkbot keeps one long-poll cursor alive, turns every update into a typed
//! event and hands it to whoever is interested: one-shot waits registered
//! with `wait_for`, then the handler bound to the event name. Handlers run
//! as isolated tasks; a failing handler is logged and the bot carries on.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────┐     ┌────────────┐────▶ wait_for("message_new")
//! │ Long-poll   │────▶│ Hydrator │────▶│ Dispatcher │
//! │ (transport) │     │ (model)  │     │            │────▶ on("message_new") (own task)
//! └─────────────┘     └──────────┘     └────────────┘
//!        ▲ renegotiate on failure
//! ┌─────────────┐
//! │ Session     │
//! └─────────────┘
//! ```
//!
//! - **Transport**: `a_check` polls and session negotiation over HTTPS
//! - **Model**: `Message`, `UserMessage`, `Page`, `PageEvent` and friends
//! - **Core**: dispatcher, waits, task supervision
//! - **Runtime**: configuration, logging, the ingestion loop and `VkClient`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use vkbot::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = VkClient::builder().build()?;
//!
//!     client.on("message_new", |args: EventArgs| async move {
//!         if let Some(message) = args.first::<Message>() {
//!             info!(peer_id = message.peer_id, text = %message.text, "New message");
//!         }
//!         anyhow::Ok(())
//!     });
//!
//!     client.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: read `vkbot.toml` (default)
//! - `yaml-config`: read `vkbot.yaml`
//! - `json-log`: JSON log output

pub use vkbot_core as core;
pub use vkbot_model as model;
pub use vkbot_runtime as runtime;
pub use vkbot_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use vkbot::prelude::*;
/// ```
pub mod prelude {
    // Client - main entry point
    pub use vkbot_runtime::{ClientVariant, VkClient, VkbotConfig};

    // Event routing
    pub use vkbot_core::{
        Dispatcher, ErrorHook, EventArgs, HandlerResult, READY_EVENT, Resolved, WaitError,
        args,
    };

    // Typed events
    pub use vkbot_model::{
        Attachment, GroupUpdate, Message, Page, PageEvent, TypingState, UserMessage,
        UserMessageFlags,
    };
    pub use vkbot_runtime::UNKNOWN_EVENT;

    // Calling methods from handlers
    pub use vkbot_transport::ApiCaller;

    // Logging macros
    pub use vkbot_runtime::prelude::*;
}
