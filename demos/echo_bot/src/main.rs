//! Echo Bot Demo
//!
//! A small community bot showing the two ways of consuming events:
//!
//! - `client.on(...)` binds a persistent handler; each invocation runs in
//!   its own task.
//! - `wait_for(...)` waits once for the next matching event, here used to
//!   ask a follow-up question inside a handler.
//!
//! # Commands
//!
//! ```text
//! /echo <text>  - repeat the text
//! /ping         - Pong!
//! /ask          - ask for a name, wait up to 30s for the answer
//! ```
//!
//! # Usage
//!
//! ```bash
//! VKBOT_CLIENT__TOKEN=vk1.a.... cargo run --package echo-bot
//! cargo run --package echo-bot -- --config vkbot.toml --profile production
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};
use vkbot::prelude::*;

const ASK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(version, about = "Echo bot for a VK community or user account")]
struct Args {
    /// Configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (development, production, ...).
    #[arg(short, long)]
    profile: Option<String>,

    /// Access token; overrides the configuration.
    #[arg(long, env = "VK_TOKEN")]
    token: Option<String>,

    /// Run on a user account instead of a community.
    #[arg(long)]
    user: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn send(api: &dyn ApiCaller, peer_id: i64, text: &str) -> Result<()> {
    api.call(
        "messages.send",
        json!({ "peer_id": peer_id, "message": text, "random_id": 0 }),
    )
    .await?;
    Ok(())
}

/// Answers the commands of one community message.
async fn on_group_message(
    api: Arc<dyn ApiCaller>,
    dispatcher: Dispatcher,
    args: EventArgs,
) -> Result<()> {
    let Some(message) = args.first::<Message>() else {
        return Ok(());
    };
    info!(peer_id = message.peer_id, from_id = message.from_id, text = %message.text, "Message");

    let text = message.text.trim();
    if let Some(content) = text.strip_prefix("/echo ") {
        send(api.as_ref(), message.peer_id, content).await?;
    } else if text == "/ping" {
        send(api.as_ref(), message.peer_id, "Pong!").await?;
    } else if text == "/ask" {
        let peer_id = message.peer_id;
        let from_id = message.from_id;

        // Registered before replying so a fast answer is not missed.
        let answer = dispatcher
            .wait_for("message_new")
            .matching(move |m: &Message| m.peer_id == peer_id && m.from_id == from_id)
            .timeout(ASK_TIMEOUT)
            .register();
        send(api.as_ref(), peer_id, "What is your name?").await?;

        match answer.await {
            Ok(resolved) => {
                let name = resolved
                    .downcast_ref::<Message>()
                    .map(|m| m.text.clone())
                    .unwrap_or_default();
                send(api.as_ref(), peer_id, &format!("Nice to meet you, {name}!")).await?;
            }
            Err(WaitError::Timeout(_)) => {
                send(api.as_ref(), peer_id, "Too slow, maybe next time.").await?;
            }
            Err(e) => warn!(error = %e, "Wait for answer failed"),
        }
    }
    Ok(())
}

/// Echoes direct messages on a user account.
async fn on_user_message(api: Arc<dyn ApiCaller>, args: EventArgs) -> Result<()> {
    let Some(message) = args.first::<UserMessage>() else {
        return Ok(());
    };
    if message.is_outgoing() {
        return Ok(());
    }
    info!(
        peer_id = message.peer_id,
        attachments = message.resolved_attachments.len(),
        text = %message.text,
        "Message"
    );
    if let Some(content) = message.text.trim().strip_prefix("/echo ") {
        send(api.as_ref(), message.peer_id, content).await?;
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = VkClient::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = args.profile {
        builder = builder.profile(profile);
    }
    if let Some(token) = args.token {
        builder = builder.token(token);
    }
    if args.user {
        builder = builder.variant(ClientVariant::User);
    }
    let client = builder.build()?;

    let api = client.api();
    let dispatcher = client.dispatcher().clone();
    match client.config().client.variant {
        ClientVariant::Group => {
            client.on("message_new", move |args: EventArgs| {
                on_group_message(api.clone(), dispatcher.clone(), args)
            });
            client.on("conversation_start", |args: EventArgs| async move {
                if let Some(message) = args.first::<Message>() {
                    info!(peer_id = message.peer_id, "Conversation started");
                }
                anyhow::Ok(())
            });
            client.on("group_join", |args: EventArgs| async move {
                if let Some(event) = args.first::<PageEvent>() {
                    info!(page = ?event.page, "New member");
                }
                anyhow::Ok(())
            });
        }
        ClientVariant::User => {
            client.on("message_new", move |args: EventArgs| on_user_message(api.clone(), args));
        }
    }

    client.on(READY_EVENT, |_args: EventArgs| async move {
        info!("Echo bot is ready. Press Ctrl+C to stop.");
        anyhow::Ok(())
    });

    if let Err(e) = client.run().await {
        error!(error = %e, "Echo bot stopped");
        return Err(e.into());
    }
    Ok(())
}
