//! Integration layer - External system interfaces.
//!
//! This module contains interfaces for integrating with the network side:
//! - Long-poll transport and session negotiation traits
//! - Hydration of raw updates into events

pub mod hydrate;
pub mod transport;

pub use hydrate::{Hydrated, HydrationFuture, Hydrator};
pub use transport::{PollBatch, PollTransport, RawUpdate, SessionNegotiator};
