//! Deferred: a promise paired with the controller its producer settles it with

use super::pending::{Canceller, Core};
use super::settlement::{IntoResolution, Reason, Resolution, Value};
use super::Promise;
use crate::error::Error;
use crate::event_loop::{shared, Scheduler};
use std::fmt;
use std::rc::Rc;

/// Producer-side controller for a pending promise.
///
/// The first call to `resolve`, `resolve_promise`, `reject` or `settle` wins;
/// later calls are silently ignored.
pub struct Resolver<T, E = Error> {
    core: Rc<Core<T, E>>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl<T: Value, E: Reason> Resolver<T, E> {
    pub(crate) fn from_core(core: Rc<Core<T, E>>) -> Self {
        Self { core }
    }

    /// Fulfill with a plain value
    pub fn resolve(&self, value: T) {
        self.core.resolve(Resolution::Value(value));
    }

    /// Adopt the eventual settlement of another promise
    pub fn resolve_promise(&self, promise: Promise<T, E>) {
        self.core.resolve(Resolution::Promise(promise));
    }

    /// Reject with a reason
    pub fn reject(&self, reason: E) {
        self.core.reject(reason);
    }

    /// Settle from anything a handler could return: `Ok` fulfills, `Err`
    /// rejects, a promise is adopted
    pub fn settle<R: IntoResolution<T, E>>(&self, resolution: R) {
        match resolution.into_resolution() {
            Ok(resolution) => self.core.resolve(resolution),
            Err(reason) => self.core.reject(reason),
        }
    }

    /// Whether a resolve or reject call would still take effect
    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    /// The promise this resolver settles
    pub fn promise(&self) -> Promise<T, E> {
        Promise::from_core(self.core.clone())
    }
}

/// A pending promise together with its resolver
pub struct Deferred<T, E = Error> {
    promise: Promise<T, E>,
    resolver: Resolver<T, E>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

impl<T: Value, E: Reason> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("promise", &self.promise)
            .finish_non_exhaustive()
    }
}

impl<T: Value, E: Reason> Deferred<T, E> {
    /// Create a deferred whose promise cannot be cancelled
    pub fn new<S: Scheduler + Clone + 'static>(scheduler: &S) -> Self {
        Self::from_parts(shared(scheduler), None)
    }

    /// Create a deferred with a canceller.
    ///
    /// The canceller runs at most once, when the promise is cancelled
    /// directly or when every promise derived from it has been cancelled. It
    /// receives the promise's own resolver and may settle it, or leave it
    /// pending. Returning `Err` (or panicking) rejects the promise.
    pub fn with_canceller<S, C>(scheduler: &S, canceller: C) -> Self
    where
        S: Scheduler + Clone + 'static,
        C: FnOnce(Resolver<T, E>) -> Result<(), E> + 'static,
    {
        Self::from_parts(shared(scheduler), Some(Box::new(canceller)))
    }

    fn from_parts(scheduler: Rc<dyn Scheduler>, canceller: Option<Canceller<T, E>>) -> Self {
        let core = Core::new(scheduler, canceller, None);
        Self {
            promise: Promise::from_core(core.clone()),
            resolver: Resolver::from_core(core),
        }
    }

    /// The consumer-facing promise
    pub fn promise(&self) -> Promise<T, E> {
        self.promise.clone()
    }

    /// The producer-facing controller
    pub fn resolver(&self) -> Resolver<T, E> {
        self.resolver.clone()
    }

    /// Split into the consumer and producer halves
    pub fn split(self) -> (Promise<T, E>, Resolver<T, E>) {
        (self.promise, self.resolver)
    }

    pub fn resolve(&self, value: T) {
        self.resolver.resolve(value);
    }

    pub fn resolve_promise(&self, promise: Promise<T, E>) {
        self.resolver.resolve_promise(promise);
    }

    pub fn reject(&self, reason: E) {
        self.resolver.reject(reason);
    }

    pub fn settle<R: IntoResolution<T, E>>(&self, resolution: R) {
        self.resolver.settle(resolution);
    }
}
