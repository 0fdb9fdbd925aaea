//! Event arguments for the vkbot dispatcher.
//!
//! Events carry an ordered list of type-erased arguments. A `message_new`
//! event carries one `Message`; the synthetic `ready` event carries none.
//! Consumers downcast the arguments they expect:
//!
//! ```rust,ignore
//! use vkbot_core::{EventArgs, args};
//!
//! let args = args![Message { text: "hi".into(), ..Default::default() }];
//! let msg = args.first::<Message>().unwrap();
//! ```

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Name of the synthetic event emitted once the client is ready to poll.
pub const READY_EVENT: &str = "ready";

/// Normalizes an event name for registry lookups.
///
/// Event names are case-insensitive; the canonical form is lowercase.
pub fn normalize_event_name(name: &str) -> Cow<'_, str> {
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(name.to_ascii_lowercase())
    } else {
        Cow::Borrowed(name)
    }
}

// ============================================================================
// Arg
// ============================================================================

/// A single type-erased event argument.
#[derive(Clone)]
pub struct Arg {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Arg {
    /// Wraps a value as an event argument.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Returns `true` if the argument holds a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Borrows the argument as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Returns a shared handle to the argument as a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Returns the Rust type name of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arg<{}>", self.type_name)
    }
}

// ============================================================================
// EventArgs
// ============================================================================

/// The ordered argument list of one dispatched event.
///
/// Cloning is cheap; waiters and handlers of the same dispatch share one list.
#[derive(Clone, Default)]
pub struct EventArgs(Arc<[Arg]>);

impl EventArgs {
    /// An empty argument list.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single-argument list.
    pub fn one<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::from(vec![Arg::new(value)]))
    }

    /// Builds a list from already wrapped arguments.
    pub fn from_args(args: Vec<Arg>) -> Self {
        Self(Arc::from(args))
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the argument at `index`.
    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.0.get(index)
    }

    /// Borrows the argument at `index` as a `T`.
    pub fn get_as<T: Any>(&self, index: usize) -> Option<&T> {
        self.get(index).and_then(Arg::downcast_ref::<T>)
    }

    /// Borrows the first argument as a `T`.
    pub fn first<T: Any>(&self) -> Option<&T> {
        self.get_as::<T>(0)
    }

    /// Iterates over the arguments.
    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.0.iter()
    }

    /// Collapses the list into what a waiter receives.
    pub fn resolve(&self) -> Resolved {
        match self.len() {
            0 => Resolved::Nothing,
            1 => Resolved::One(self.0[0].clone()),
            _ => Resolved::Many(self.clone()),
        }
    }
}

impl fmt::Debug for EventArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl From<Vec<Arg>> for EventArgs {
    fn from(args: Vec<Arg>) -> Self {
        Self::from_args(args)
    }
}

/// Builds an [`EventArgs`] from a list of values.
///
/// ```rust,ignore
/// let args = args![page, reason];
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::EventArgs::empty()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::EventArgs::from_args(vec![$($crate::Arg::new($value)),+])
    };
}

// ============================================================================
// Resolved
// ============================================================================

/// The value a satisfied `wait_for` yields.
///
/// Mirrors the argument count of the event: nothing, the sole argument, or
/// the whole ordered list.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// The event had no arguments.
    Nothing,
    /// The event had exactly one argument.
    One(Arg),
    /// The event had several arguments.
    Many(EventArgs),
}

impl Resolved {
    /// Borrows the single argument as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::One(arg) => arg.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Returns a shared handle to the single argument as a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Self::One(arg) => arg.downcast::<T>(),
            _ => None,
        }
    }

    /// Expands back into an argument list.
    pub fn into_args(self) -> EventArgs {
        match self {
            Self::Nothing => EventArgs::empty(),
            Self::One(arg) => EventArgs::from_args(vec![arg]),
            Self::Many(args) => args,
        }
    }
}

// ============================================================================
// Emission
// ============================================================================

/// An event ready to be dispatched: a name plus its arguments.
#[derive(Debug, Clone)]
pub struct Emission {
    /// Event name (e.g. `"message_new"`).
    pub event: String,
    /// Event arguments.
    pub args: EventArgs,
}

impl Emission {
    /// Creates a new emission.
    pub fn new(event: impl Into<String>, args: EventArgs) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_event_name() {
        assert_eq!(normalize_event_name("Message_New"), "message_new");
        assert!(matches!(
            normalize_event_name("message_new"),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn test_resolve_by_arity() {
        assert!(matches!(args![].resolve(), Resolved::Nothing));

        let one = args![42_i64].resolve();
        assert_eq!(one.downcast_ref::<i64>(), Some(&42));

        let many = args![1_i64, "two"].resolve();
        let Resolved::Many(list) = many else {
            panic!("expected a tuple of arguments");
        };
        assert_eq!(list.len(), 2);
        assert_eq!(list.get_as::<&str>(1), Some(&"two"));
    }

    #[test]
    fn test_downcast_wrong_type() {
        let args = args![String::from("hi")];
        assert!(args.first::<i32>().is_none());
        assert_eq!(args.first::<String>().map(String::as_str), Some("hi"));
        assert!(args.get(0).unwrap().type_name().contains("String"));
    }
}
