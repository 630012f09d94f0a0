use core::{any::Any, fmt};
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;

type Values = HashMap<&'static str, Arc<dyn Any + Send + Sync>>;

/// Per-request context carried alongside a work item.
///
/// A context holds a [`CancellationToken`] and a set of named values. Both are
/// visible to the work item. The pool itself watches the token only while the
/// caller is *waiting*: cancelling it makes the pending submission return
/// [`Error::Cancelled`](crate::Error::Cancelled), but a work item that is
/// already running is never interrupted. Work items that can stop early should
/// check [`Context::is_cancelled`] themselves.
///
/// Cloning is cheap; clones share the token and the values.
#[derive(Clone, Default)]
pub struct Context {
    token: CancellationToken,
    values: Arc<Values>,
}

impl Context {
    /// An empty context that is never cancelled unless [`Context::cancel`] is
    /// called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context driven by an existing cancellation token.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            values: Arc::default(),
        }
    }

    /// Returns a copy of this context with `key` bound to `value`, replacing
    /// any earlier binding of the same key.
    #[must_use]
    pub fn with_value<V>(mut self, key: &'static str, value: V) -> Self
    where
        V: Any + Send + Sync,
    {
        Arc::make_mut(&mut self.values).insert(key, Arc::new(value));
        self
    }

    /// Looks up the value bound to `key`, if it exists and has type `V`.
    pub fn value<V: Any>(&self, key: &str) -> Option<&V> {
        self.values.get(key)?.downcast_ref::<V>()
    }

    /// A context with the same values and a child token: cancelling the parent
    /// cancels the child, but not the other way around.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            values: Arc::clone(&self.values),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.token
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("keys", &keys)
            .finish()
    }
}
