//! Asynchronous primitives for the script runtime.
//!
//! The dispatch loop is purely synchronous; the only suspension point is the
//! `await` opcode. This crate provides the [`HtFuture`] cell that `await`
//! observes, plus the helpers that move futures in and out of script values.
//! The interpreter keeps the suspension records and drives resumption.
//!
//! # Examples
//!
//! ```
//! use async_runtime::{share, to_value, HtFuture};
//! use core_types::Value;
//!
//! let shared = share(HtFuture::new());
//! let as_value = to_value(&shared);
//! shared.borrow_mut().resolve(Value::Integer(21));
//! assert!(async_runtime::future_cell(&as_value).is_some());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod future;

pub use future::{
    future_cell, share, to_value, with_future, FutureState, HtFuture, SharedFuture,
};
