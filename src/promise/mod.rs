//! Deferred execution primitives.
//!
//! ## Contents
//! - [`DelayedPromise`] pending result slot settled from the outside
//! - [`WaitingPromise`] deferred executor, run once by [`WaitingPromise::execute`]
//!
//! Everything else in the crate is built on these: bridge requests hand out a
//! `DelayedPromise`, model elements keep one as their current value, and
//! schedulers accept `WaitingPromise`s.

mod delayed;
mod waiting;

pub use delayed::DelayedPromise;
pub use waiting::WaitingPromise;
