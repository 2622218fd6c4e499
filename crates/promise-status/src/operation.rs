//! Tracked operation handles
//!
//! A `TrackedOperation` is an identity token bound to one asynchronous
//! operation. The tracker compares operations by identity only: clones share
//! an id, separately constructed operations never compare equal.

use futures::future::{self, BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use uuid::Uuid;

/// Bounds required of fulfilled values and rejection reasons.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<P> Payload for P where P: Clone + Send + Sync + 'static {}

/// Identity of a tracked operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) type Settlement<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Handle to an asynchronous operation whose settlement can be awaited any
/// number of times.
pub struct TrackedOperation<T, E> {
    id: OperationId,
    settlement: Settlement<T, E>,
}

impl<T: Payload, E: Payload> TrackedOperation<T, E> {
    /// Wrap a future. The future is driven by whoever awaits it first; the
    /// tracker never resolves or cancels it on its own.
    pub fn new<F>(operation: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            id: OperationId::new(),
            settlement: operation.boxed().shared(),
        }
    }

    /// An operation that is already fulfilled with `value`.
    pub fn fulfilled(value: T) -> Self {
        Self::new(future::ready(Ok(value)))
    }

    /// An operation that is already rejected with `reason`.
    pub fn rejected(reason: E) -> Self {
        Self::new(future::ready(Err(reason)))
    }

    /// Settled outcome, if the operation has already been driven to completion.
    pub fn peek(&self) -> Option<&Result<T, E>> {
        self.settlement.peek()
    }
}

impl<T, E> TrackedOperation<T, E> {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub(crate) fn settlement(&self) -> Settlement<T, E> {
        self.settlement.clone()
    }
}

impl<T, E> Clone for TrackedOperation<T, E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            settlement: self.settlement.clone(),
        }
    }
}

impl<T, E> PartialEq for TrackedOperation<T, E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T, E> Eq for TrackedOperation<T, E> {}

impl<T, E> fmt::Debug for TrackedOperation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedOperation").field("id", &self.id).finish()
    }
}
