//! # vkbot Core
//!
//! The core engine of the vkbot long-poll client.
//!
//! This crate knows nothing about HTTP or VK's JSON shapes. It provides the
//! event routing machinery every client variant shares: the cursor, the
//! dispatcher with its one-shot waiters and persistent handlers, and the
//! supervisor that isolates handler failures.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! Core abstractions and type system:
//! - **Cursor**: Long-poll position plus session ([`Cursor`], [`Position`])
//! - **Event Arguments**: Type-erased, downcastable ([`EventArgs`], [`Resolved`])
//! - **Errors**: The shared taxonomy ([`TransportError`], [`PollError`], [`SessionError`], [`WaitError`])
//!
//! ### Framework Layer
//!
//! Event routing and execution:
//! - **Dispatcher**: Waiters first, then the bound handler ([`Dispatcher`])
//! - **Waiters**: One-shot `wait_for` with predicate and timeout ([`WaitFor`], [`Wait`])
//! - **Supervisor**: Isolated handler tasks and the failure hook ([`TaskSupervisor`], [`ErrorHook`])
//!
//! ### Integration Layer
//!
//! Seams towards the network:
//! - **Transport**: [`PollTransport`] and [`SessionNegotiator`]
//! - **Hydration**: [`Hydrator`] turning [`RawUpdate`]s into events
//!
//! ## Event Flow
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌────────────┐   ┌──────────────┐
//! │ PollTransport│──▶│ Hydrator │──▶│ Dispatcher │──▶│ Wait futures │
//! └──────────────┘   └──────────┘   └────────────┘   └──────────────┘
//!                                          │          ┌──────────────┐
//!                                          └─────────▶│ Supervisor   │──▶ Handler
//!                                                     └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tokio::runtime::Handle;
//! use vkbot_core::{Dispatcher, EventArgs, TaskSupervisor, args};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dispatcher = Dispatcher::new(TaskSupervisor::new(Handle::current()));
//!
//!     dispatcher.on("greeting", |args: EventArgs| async move {
//!         println!("handler saw {:?}", args.first::<String>());
//!         anyhow::Ok(())
//!     });
//!
//!     let next = dispatcher
//!         .wait_for("greeting")
//!         .timeout(Duration::from_secs(1))
//!         .register();
//!
//!     dispatcher.dispatch("greeting", args![String::from("hello")]);
//!     let greeting = next.await?;
//!     println!("waiter saw {:?}", greeting.downcast_ref::<String>());
//!     Ok(())
//! }
//! ```

// Architectural layers
pub mod foundation;
pub mod framework;
pub mod integration;

// Re-export foundation types
pub use foundation::{
    ApiError, ApiResult, Arg, Cursor, Emission, EventArgs, PollError, Position, READY_EVENT,
    Resolved, SessionError, SessionResult, TransportError, TransportResult, WaitError,
    WaitResult, normalize_event_name,
};

// Re-export framework types
pub use framework::{
    BoxFuture, BoxedHandler, DispatchTask, Dispatcher, ErrorHook, Handler, HandlerResult,
    LogErrorHook, TaskSupervisor, Wait, WaitFor, into_handler, panic_message,
};

// Re-export integration types
pub use integration::{
    Hydrated, HydrationFuture, Hydrator, PollBatch, PollTransport, RawUpdate, SessionNegotiator,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::args;
    pub use super::foundation::*;
    pub use super::framework::{
        DispatchTask, Dispatcher, ErrorHook, Handler, HandlerResult, TaskSupervisor, WaitFor,
    };
    pub use super::integration::{Hydrated, Hydrator, RawUpdate};
}
