//! Host future implementation.
//!
//! A future is the bridge between the synchronous dispatch loop and the
//! host's asynchronous world: `await` on a pending future suspends the loop,
//! and resolving the future lets the interpreter resume it. Futures are also
//! first-class script values (`Future` in the preincluded bindings).

use core_types::{HtError, Value};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// The state of a future.
///
/// Once settled (resolved or rejected), a future cannot change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    /// Neither resolved nor rejected yet
    Pending,
    /// Settled with a value
    Resolved,
    /// Settled with an error
    Rejected,
}

/// A host future.
///
/// # Examples
///
/// ```
/// use async_runtime::{FutureState, HtFuture};
/// use core_types::Value;
///
/// let mut future = HtFuture::new();
/// assert_eq!(future.state, FutureState::Pending);
///
/// future.resolve(Value::Integer(42));
/// assert_eq!(future.state, FutureState::Resolved);
/// assert_eq!(future.result, Some(Value::Integer(42)));
/// ```
#[derive(Debug, Default)]
pub struct HtFuture {
    /// Current state
    pub state: FutureState,
    /// The value, once resolved
    pub result: Option<Value>,
    /// The error, once rejected
    pub error: Option<HtError>,
    /// Callbacks registered via `then`, fired by the interpreter on settle
    pub reactions: Vec<Value>,
}

impl Default for FutureState {
    fn default() -> Self {
        FutureState::Pending
    }
}

impl HtFuture {
    /// Create a pending future.
    pub fn new() -> Self {
        Self {
            state: FutureState::Pending,
            result: None,
            error: None,
            reactions: Vec::new(),
        }
    }

    /// Resolve with a value. A no-op when already settled.
    pub fn resolve(&mut self, value: Value) {
        if self.state == FutureState::Pending {
            self.state = FutureState::Resolved;
            self.result = Some(value);
        }
    }

    /// Reject with an error. A no-op when already settled.
    pub fn reject(&mut self, error: HtError) {
        if self.state == FutureState::Pending {
            self.state = FutureState::Rejected;
            self.error = Some(error);
        }
    }

    /// Whether the future has been resolved or rejected.
    pub fn is_settled(&self) -> bool {
        self.state != FutureState::Pending
    }

    /// Register a callback value to be invoked with the result on settle.
    pub fn then(&mut self, callback: Value) {
        self.reactions.push(callback);
    }

    /// Drain the registered callbacks for firing.
    pub fn take_reactions(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.reactions)
    }
}

/// A shared future cell, as held by the host.
pub type SharedFuture = Rc<RefCell<HtFuture>>;

/// Put a future into a shared cell.
pub fn share(future: HtFuture) -> SharedFuture {
    Rc::new(RefCell::new(future))
}

/// Encapsulate a shared future as a script value.
pub fn to_value(future: &SharedFuture) -> Value {
    Value::ExternObject(future.clone() as Rc<RefCell<dyn Any>>)
}

/// The external object cell of `value`, when it wraps a future.
pub fn future_cell(value: &Value) -> Option<Rc<RefCell<dyn Any>>> {
    match value {
        Value::ExternObject(cell) => {
            if cell.borrow().is::<HtFuture>() {
                Some(cell.clone())
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Run `f` against the future inside an external object cell.
pub fn with_future<R>(
    cell: &Rc<RefCell<dyn Any>>,
    f: impl FnOnce(&mut HtFuture) -> R,
) -> Option<R> {
    let mut borrowed = cell.borrow_mut();
    borrowed.downcast_mut::<HtFuture>().map(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_future_resolve_once() {
        let mut future = HtFuture::new();
        future.resolve(Value::Integer(1));
        future.resolve(Value::Integer(2));
        assert_eq!(future.result, Some(Value::Integer(1)));
    }

    #[test]
    fn test_future_reject_after_resolve_is_noop() {
        let mut future = HtFuture::new();
        future.resolve(Value::Integer(1));
        future.reject(HtError::extern_error("late"));
        assert_eq!(future.state, FutureState::Resolved);
        assert!(future.error.is_none());
    }

    #[test]
    fn test_value_roundtrip() {
        let shared = share(HtFuture::new());
        let value = to_value(&shared);
        let cell = future_cell(&value).expect("value should wrap a future");
        shared.borrow_mut().resolve(Value::Integer(21));
        let settled = with_future(&cell, |f| f.is_settled()).unwrap();
        assert!(settled);
    }

    #[test]
    fn test_non_future_value() {
        assert!(future_cell(&Value::Integer(1)).is_none());
    }

    #[test]
    fn test_reactions_drain() {
        let mut future = HtFuture::new();
        future.then(Value::Null);
        future.then(Value::Null);
        assert_eq!(future.take_reactions().len(), 2);
        assert!(future.take_reactions().is_empty());
    }
}
