//! Framework layer - Event routing and execution.
//!
//! This module contains the event processing pipeline:
//! - Handler trait and the failure hook
//! - One-shot waiters (`wait_for`)
//! - Central dispatcher for event routing
//! - Task supervisor isolating handler invocations

pub mod dispatcher;
pub mod handler;
pub mod supervisor;
pub mod waiter;

pub use dispatcher::Dispatcher;
pub use handler::{
    BoxFuture, BoxedHandler, ErrorHook, Handler, HandlerResult, LogErrorHook, into_handler,
};
pub use supervisor::{DispatchTask, TaskSupervisor, panic_message};
pub use waiter::{Wait, WaitFor};
