//! An in-memory task queue which runs tasks one at a time, no faster than a given rate.
//!
//! Useful for throttling calls to a rate-limited resource, e.g. an API with a quota.

#![deny(missing_docs)]

#[cfg(doctest)]
use doc_comment::doctest;
#[cfg(doctest)]
doctest!("../README.md");

mod error;
pub mod queue;
pub mod task;

pub use error::ConfigError;
pub use queue::{Options, QueueState, RateLimitedQueue};
pub use task::{Callbacks, Task};
