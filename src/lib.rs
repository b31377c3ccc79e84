//! Promissory: single-threaded promises driven by an explicit task queue
//!
//! A promise represents a value that may not be known yet. Producers settle
//! it through a [`Deferred`]; consumers chain handlers with
//! [`then`](Promise::then), [`otherwise`](Promise::otherwise) and
//! [`always`](Promise::always), or end a chain with [`done`](Promise::done).
//! Handlers never run synchronously: every delivery is a task on the
//! [`Scheduler`] the promise was created with, usually an [`EventLoop`].
//!
//! # Quick Start
//!
//! ```
//! use promissory::{Error, EventLoop};
//!
//! let el = EventLoop::new();
//! let deferred = el.deferred::<u32, Error>();
//!
//! let doubled = deferred.promise().then(|n| Ok(n * 2));
//! deferred.resolve(21);
//! el.run_to_completion();
//!
//! assert_eq!(doubled.settlement().and_then(|s| s.into_result().ok()), Some(42));
//! ```
//!
//! # Module Overview
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`event_loop`] | [`Scheduler`] seam and the FIFO [`EventLoop`] |
//! | [`promise`] | [`Promise`], [`Deferred`], combinators and cancellation |
//! | [`unhandled`] | Reporting of rejections nobody observed |
//! | [`error`](Error) | Engine-level rejection reasons |
//!
//! Promises are `!Send`: each one belongs to the thread whose loop drives it.
// Reactions and cancellers are boxed closures over generic settlements.
#![allow(clippy::type_complexity)]

pub mod event_loop;
pub mod promise;
pub mod unhandled;

mod error;

pub use error::{Error, Result};
pub use event_loop::{EventLoop, EventLoopConfig, EventLoopStats, RunResult, Scheduler, Task};
pub use promise::{
    reject, resolve, Deferred, IntoResolution, Promise, Reason, Resolution, Resolver, Settlement,
    Value, WeakPromise,
};
pub use unhandled::{
    set_unhandled_rejection_hook, take_unhandled_rejection_hook, RejectionOrigin,
    UnhandledRejection,
};

/// Promissory version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
