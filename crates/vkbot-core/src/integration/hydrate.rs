//! Turning raw updates into dispatchable events.
//!
//! A [`Hydrator`] decodes one [`RawUpdate`] into a [`Hydrated`] value that
//! tells the ingestion loop how to proceed:
//!
//! | Variant | Loop behavior |
//! |---------|---------------|
//! | `Ready` | dispatch now |
//! | `Ordered` | await inline, then dispatch, before the next update |
//! | `Detached` | run as a background task, dispatch when it completes |
//! | `Ignored` | nothing |
//!
//! `Ordered` is reserved for hydration whose result must keep batch order
//! (incoming messages). Anything else that needs extra network round-trips
//! should be `Detached`.

use std::fmt;
use std::future::Future;

use super::transport::RawUpdate;
use crate::foundation::event::{Emission, EventArgs};
use crate::framework::dispatcher::Dispatcher;
use crate::framework::handler::BoxFuture;

/// Future producing an event once hydration completes.
pub type HydrationFuture = BoxFuture<'static, anyhow::Result<Emission>>;

/// What to do with one raw update.
pub enum Hydrated {
    /// Dispatch immediately.
    Ready(Emission),
    /// Await before handling the next update of the batch.
    Ordered(HydrationFuture),
    /// Run independently of the batch.
    Detached(HydrationFuture),
    /// Nobody consumes this update.
    Ignored,
}

impl Hydrated {
    /// Shorthand for [`Hydrated::Ready`].
    pub fn ready(event: impl Into<String>, args: EventArgs) -> Self {
        Self::Ready(Emission::new(event, args))
    }

    /// Shorthand for [`Hydrated::Ordered`].
    pub fn ordered<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<Emission>> + Send + 'static,
    {
        Self::Ordered(Box::pin(future))
    }

    /// Shorthand for [`Hydrated::Detached`].
    pub fn detached<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<Emission>> + Send + 'static,
    {
        Self::Detached(Box::pin(future))
    }
}

impl fmt::Debug for Hydrated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(emission) => f.debug_tuple("Ready").field(emission).finish(),
            Self::Ordered(_) => f.write_str("Ordered(..)"),
            Self::Detached(_) => f.write_str("Detached(..)"),
            Self::Ignored => f.write_str("Ignored"),
        }
    }
}

/// Decodes raw updates for one client variant.
///
/// `dispatcher` is provided so hydration can be skipped for events nobody
/// observes (see [`Dispatcher::is_observed`]).
pub trait Hydrator: Send + Sync {
    /// Decodes one update. An `Err` is logged and the update skipped.
    fn hydrate(&self, update: RawUpdate, dispatcher: &Dispatcher) -> anyhow::Result<Hydrated>;
}
