//! Foundation layer - Core abstractions and type system.
//!
//! This module contains the fundamental building blocks of the client:
//! - Error taxonomy shared by every layer
//! - Type-erased event arguments
//! - The long-poll cursor

pub mod cursor;
pub mod error;
pub mod event;

pub use cursor::{Cursor, Position};
pub use error::{
    ApiError, ApiResult, PollError, SessionError, SessionResult, TransportError,
    TransportResult, WaitError, WaitResult,
};
pub use event::{Arg, Emission, EventArgs, READY_EVENT, Resolved, normalize_event_name};
