//! Promise Implementation
//!
//! A [`Promise`] is one of three variants:
//!
//! - *fulfilled* and *rejected* immediates, created already settled, with no
//!   handler registry and no cancellation behaviour;
//! - *pending*, backed by a shared state machine that a [`Deferred`] settles.
//!
//! Handlers never run from inside the call that produced their input: every
//! delivery goes through the [`Scheduler`] captured when the promise was
//! created. Once a pending promise settles it behaves exactly like an
//! immediate one, apart from timing.
//!
//! Handlers return anything implementing [`IntoResolution`]. `Err` plays the
//! role of a thrown exception and rejects the derived promise; returning a
//! promise makes the derived promise adopt it.
//!
//! ```
//! use promissory::{EventLoop, Error};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let el = EventLoop::new();
//! let seen = Rc::new(Cell::new(0));
//! let sink = seen.clone();
//!
//! el.resolve::<i32, Error, _>(Ok(20))
//!     .then(|v| Ok(v * 2))
//!     .then(|v| Ok(v + 2))
//!     .done_with(move |v| {
//!         sink.set(v);
//!         Ok::<_, Error>(())
//!     });
//!
//! assert_eq!(seen.get(), 0);
//! el.run_to_completion();
//! assert_eq!(seen.get(), 42);
//! ```

mod deferred;
mod pending;
mod settlement;

pub use self::deferred::{Deferred, Resolver};
pub use self::settlement::{IntoResolution, Reason, Resolution, Settlement, Value};

use self::pending::{invoke, reaction_for, Core, Reaction};
use crate::error::Error;
use crate::event_loop::{shared, Scheduler};
use crate::unhandled::{report_unhandled, RejectionOrigin, RejectionTracker, UnhandledRejection};
use std::fmt;
use std::rc::{Rc, Weak};

struct Fulfilled<T> {
    value: T,
    scheduler: Rc<dyn Scheduler>,
}

struct Rejected<E> {
    reason: E,
    tracker: RejectionTracker,
    scheduler: Rc<dyn Scheduler>,
}

enum Repr<T, E> {
    Fulfilled(Rc<Fulfilled<T>>),
    Rejected(Rc<Rejected<E>>),
    Pending(Rc<Core<T, E>>),
}

/// A value that may not be known yet
pub struct Promise<T, E = Error> {
    repr: Repr<T, E>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Fulfilled(cell) => Repr::Fulfilled(cell.clone()),
            Repr::Rejected(cell) => Repr::Rejected(cell.clone()),
            Repr::Pending(core) => Repr::Pending(core.clone()),
        };
        Self { repr }
    }
}

impl<T: Value, E: Reason> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.settlement() {
            None => "pending",
            Some(Settlement::Fulfilled(_)) => "fulfilled",
            Some(Settlement::Rejected(_)) => "rejected",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<T: Value, E: Reason> Promise<T, E> {
    /// Create an already fulfilled promise
    pub fn fulfilled<S: Scheduler + Clone + 'static>(scheduler: &S, value: T) -> Self {
        Self::from_value(shared(scheduler), value)
    }

    /// Create an already rejected promise
    pub fn rejected<S: Scheduler + Clone + 'static>(scheduler: &S, reason: E) -> Self {
        Self::from_reason(shared(scheduler), reason)
    }

    /// Create an already fulfilled promise from a resolution.
    ///
    /// Passing a promise is a programmer error: an immediate promise never
    /// waits, so use [`resolve`] to adopt another promise instead.
    pub fn try_fulfilled<S: Scheduler + Clone + 'static>(
        scheduler: &S,
        resolution: Resolution<T, E>,
    ) -> Result<Self, Error> {
        match resolution {
            Resolution::Value(value) => Ok(Self::fulfilled(scheduler, value)),
            Resolution::Promise(_) => Err(Error::invalid_argument(
                "cannot create a fulfilled promise with a promise; use resolve() to adopt it instead",
            )),
        }
    }

    fn from_value(scheduler: Rc<dyn Scheduler>, value: T) -> Self {
        Self {
            repr: Repr::Fulfilled(Rc::new(Fulfilled { value, scheduler })),
        }
    }

    fn from_reason(scheduler: Rc<dyn Scheduler>, reason: E) -> Self {
        let tracker = RejectionTracker::new(&reason);
        Self {
            repr: Repr::Rejected(Rc::new(Rejected {
                reason,
                tracker,
                scheduler,
            })),
        }
    }

    pub(crate) fn from_core(core: Rc<Core<T, E>>) -> Self {
        Self {
            repr: Repr::Pending(core),
        }
    }

    /// The pending state behind this promise, or the settlement of an
    /// immediate (which the caller takes over responsibility for)
    pub(crate) fn into_core(self) -> Result<Rc<Core<T, E>>, Settlement<T, E>> {
        match self.repr {
            Repr::Pending(core) => Ok(core),
            Repr::Fulfilled(cell) => Err(Settlement::Fulfilled(cell.value.clone())),
            Repr::Rejected(cell) => {
                cell.tracker.mark_handled();
                Err(Settlement::Rejected(cell.reason.clone()))
            }
        }
    }

    /// Snapshot of the settlement, `None` while pending.
    ///
    /// A promise that adopted another promise stays pending until that one
    /// settles.
    pub fn settlement(&self) -> Option<Settlement<T, E>> {
        match &self.repr {
            Repr::Fulfilled(cell) => Some(Settlement::Fulfilled(cell.value.clone())),
            Repr::Rejected(cell) => Some(Settlement::Rejected(cell.reason.clone())),
            Repr::Pending(core) => core.settlement(),
        }
    }

    pub fn is_pending(&self) -> bool {
        match &self.repr {
            Repr::Pending(core) => !core.is_settled(),
            _ => false,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.settlement(), Some(Settlement::Fulfilled(_)))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.settlement(), Some(Settlement::Rejected(_)))
    }

    /// Number of derived consumers that have not withdrawn their interest
    pub fn consumers(&self) -> usize {
        match &self.repr {
            Repr::Pending(core) => core.consumers(),
            _ => 0,
        }
    }

    /// Whether both handles refer to the same promise
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.repr, &other.repr) {
            (Repr::Fulfilled(a), Repr::Fulfilled(b)) => Rc::ptr_eq(a, b),
            (Repr::Rejected(a), Repr::Rejected(b)) => Rc::ptr_eq(a, b),
            (Repr::Pending(a), Repr::Pending(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// A handle that does not keep the promise alive
    pub fn downgrade(&self) -> WeakPromise<T, E> {
        let repr = match &self.repr {
            Repr::Fulfilled(cell) => WeakRepr::Fulfilled(Rc::downgrade(cell)),
            Repr::Rejected(cell) => WeakRepr::Rejected(Rc::downgrade(cell)),
            Repr::Pending(core) => WeakRepr::Pending(Rc::downgrade(core)),
        };
        WeakPromise { repr }
    }

    /// Derive a promise settled by `handler` once this one settles.
    ///
    /// Pending sources count the derived promise as a consumer for
    /// cancellation purposes.
    fn derive<U, H>(&self, handler: H) -> Promise<U, E>
    where
        U: Value,
        H: FnOnce(Settlement<T, E>) -> Result<Resolution<U, E>, E> + 'static,
    {
        match &self.repr {
            Repr::Fulfilled(cell) => {
                let derived = Core::new(cell.scheduler.clone(), None, None);
                let reaction = reaction_for(&derived, handler);
                let settlement = Settlement::Fulfilled(cell.value.clone());
                cell.scheduler
                    .schedule(Box::new(move || reaction.deliver(settlement)));
                Promise::from_core(derived)
            }
            Repr::Rejected(cell) => {
                cell.tracker.mark_handled();
                let derived = Core::new(cell.scheduler.clone(), None, None);
                let reaction = reaction_for(&derived, handler);
                let settlement = Settlement::Rejected(cell.reason.clone());
                cell.scheduler
                    .schedule(Box::new(move || reaction.deliver(settlement)));
                Promise::from_core(derived)
            }
            Repr::Pending(core) => {
                let upstream = core.register_consumer();
                let derived = Core::new(core.scheduler().clone(), None, upstream);
                core.subscribe(reaction_for(&derived, handler));
                Promise::from_core(derived)
            }
        }
    }

    /// Register a terminal consumer: failures are reported, not captured
    fn terminate<V, H>(&self, handler: H)
    where
        V: Value,
        H: FnOnce(Settlement<T, E>) -> Result<Resolution<V, E>, E> + 'static,
    {
        let reaction: Reaction<T, E> = Reaction::new(move |settlement| {
            match invoke(move || handler(settlement)) {
                Ok(Resolution::Value(_)) => {}
                Ok(Resolution::Promise(next)) => next.done(),
                Err(reason) => {
                    report_unhandled(UnhandledRejection::from_reason(&reason, RejectionOrigin::Done))
                }
            }
        });
        match &self.repr {
            Repr::Fulfilled(cell) => {
                let settlement = Settlement::Fulfilled(cell.value.clone());
                cell.scheduler
                    .schedule(Box::new(move || reaction.deliver(settlement)));
            }
            Repr::Rejected(cell) => {
                cell.tracker.mark_handled();
                let settlement = Settlement::Rejected(cell.reason.clone());
                cell.scheduler
                    .schedule(Box::new(move || reaction.deliver(settlement)));
            }
            Repr::Pending(core) => core.subscribe(reaction),
        }
    }

    /// Same rejection, retyped for a handler chain whose fulfillment side
    /// does not apply
    fn forward_rejection<U: Value>(&self) -> Option<Promise<U, E>> {
        match &self.repr {
            Repr::Rejected(cell) => {
                cell.tracker.mark_handled();
                Some(Promise::from_reason(cell.scheduler.clone(), cell.reason.clone()))
            }
            _ => None,
        }
    }

    /// Transform the fulfillment value. Rejections pass through untouched.
    pub fn then<U, R, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Value,
        R: IntoResolution<U, E>,
        F: FnOnce(T) -> R + 'static,
    {
        if let Some(rejected) = self.forward_rejection() {
            return rejected;
        }
        self.derive(move |settlement| match settlement {
            Settlement::Fulfilled(value) => on_fulfilled(value).into_resolution(),
            Settlement::Rejected(reason) => Err(reason),
        })
    }

    /// Handle both outcomes
    pub fn then_or_else<U, R1, R2, F, G>(&self, on_fulfilled: F, on_rejected: G) -> Promise<U, E>
    where
        U: Value,
        R1: IntoResolution<U, E>,
        R2: IntoResolution<U, E>,
        F: FnOnce(T) -> R1 + 'static,
        G: FnOnce(E) -> R2 + 'static,
    {
        self.derive(move |settlement| match settlement {
            Settlement::Fulfilled(value) => on_fulfilled(value).into_resolution(),
            Settlement::Rejected(reason) => on_rejected(reason).into_resolution(),
        })
    }

    /// `then` without handlers: a promise that settles identically to this
    /// one. Immediates return themselves.
    pub fn follow(&self) -> Promise<T, E> {
        match &self.repr {
            Repr::Pending(_) => self.derive(|settlement| settlement.into_resolution()),
            _ => self.clone(),
        }
    }

    /// Handle a rejection. Fulfillments pass through untouched.
    pub fn otherwise<R, G>(&self, on_rejected: G) -> Promise<T, E>
    where
        R: IntoResolution<T, E>,
        G: FnOnce(E) -> R + 'static,
    {
        if let Repr::Fulfilled(_) = self.repr {
            return self.clone();
        }
        self.derive(move |settlement| match settlement {
            Settlement::Fulfilled(value) => Ok(Resolution::Value(value)),
            Settlement::Rejected(reason) => on_rejected(reason).into_resolution(),
        })
    }

    /// Run `on_settled` once this promise settles either way, for its side
    /// effect only.
    ///
    /// The original value or reason is passed downstream unchanged, unless
    /// `on_settled` fails (or returns a promise that rejects), in which case
    /// its reason replaces the original one.
    pub fn always<V, R, F>(&self, on_settled: F) -> Promise<T, E>
    where
        V: Value,
        R: IntoResolution<V, E>,
        F: FnOnce() -> R + 'static,
    {
        self.derive(move |settlement| match on_settled().into_resolution()? {
            Resolution::Value(_) => settlement.into_resolution(),
            Resolution::Promise(pending) => Ok(Resolution::Promise(pending.derive(
                move |side| match side {
                    Settlement::Fulfilled(_) => settlement.into_resolution(),
                    Settlement::Rejected(reason) => Err(reason),
                },
            ))),
        })
    }

    /// Terminal consumer without handlers: a rejection is reported as
    /// unhandled.
    pub fn done(&self) {
        if let Repr::Fulfilled(_) = self.repr {
            return;
        }
        self.terminate(|settlement| settlement.into_resolution());
    }

    /// Terminal consumer. A rejection, or a failure of `on_fulfilled`, is
    /// reported as unhandled instead of producing a further promise.
    pub fn done_with<V, R, F>(&self, on_fulfilled: F)
    where
        V: Value,
        R: IntoResolution<V, E>,
        F: FnOnce(T) -> R + 'static,
    {
        self.terminate(move |settlement| match settlement {
            Settlement::Fulfilled(value) => on_fulfilled(value).into_resolution(),
            Settlement::Rejected(reason) => Err(reason),
        });
    }

    /// Terminal consumer handling both outcomes; failures of either handler
    /// are reported as unhandled.
    pub fn done_or_else<V, R1, R2, F, G>(&self, on_fulfilled: F, on_rejected: G)
    where
        V: Value,
        R1: IntoResolution<V, E>,
        R2: IntoResolution<V, E>,
        F: FnOnce(T) -> R1 + 'static,
        G: FnOnce(E) -> R2 + 'static,
    {
        self.terminate(move |settlement| match settlement {
            Settlement::Fulfilled(value) => on_fulfilled(value).into_resolution(),
            Settlement::Rejected(reason) => on_rejected(reason).into_resolution(),
        });
    }

    /// Withdraw interest in this promise.
    ///
    /// On a promise with a canceller, runs it (at most once). On a derived
    /// promise, the request reaches the promise it was derived from only
    /// once every consumer of that promise has cancelled. Settled and
    /// immediate promises ignore the request.
    pub fn cancel(&self) {
        if let Repr::Pending(core) = &self.repr {
            core.cancel();
        }
    }
}

impl<T: Value, E: Reason> From<Deferred<T, E>> for Promise<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        deferred.promise()
    }
}

enum WeakRepr<T, E> {
    Fulfilled(Weak<Fulfilled<T>>),
    Rejected(Weak<Rejected<E>>),
    Pending(Weak<Core<T, E>>),
}

/// Non-owning handle to a promise, see [`Promise::downgrade`]
pub struct WeakPromise<T, E = Error> {
    repr: WeakRepr<T, E>,
}

impl<T, E> WeakPromise<T, E> {
    /// Recover the promise if it is still alive
    pub fn upgrade(&self) -> Option<Promise<T, E>> {
        let repr = match &self.repr {
            WeakRepr::Fulfilled(cell) => Repr::Fulfilled(cell.upgrade()?),
            WeakRepr::Rejected(cell) => Repr::Rejected(cell.upgrade()?),
            WeakRepr::Pending(core) => Repr::Pending(core.upgrade()?),
        };
        Some(Promise { repr })
    }

    pub fn is_alive(&self) -> bool {
        match &self.repr {
            WeakRepr::Fulfilled(cell) => cell.strong_count() > 0,
            WeakRepr::Rejected(cell) => cell.strong_count() > 0,
            WeakRepr::Pending(core) => core.strong_count() > 0,
        }
    }
}

/// Create a promise from a plain value (`Ok`), a thrown reason (`Err`) or
/// another promise, which is returned as is
pub fn resolve<S, T, E, R>(scheduler: &S, resolution: R) -> Promise<T, E>
where
    S: Scheduler + Clone + 'static,
    T: Value,
    E: Reason,
    R: IntoResolution<T, E>,
{
    match resolution.into_resolution() {
        Ok(Resolution::Value(value)) => Promise::fulfilled(scheduler, value),
        Ok(Resolution::Promise(promise)) => promise,
        Err(reason) => Promise::rejected(scheduler, reason),
    }
}

/// Create a rejected promise
pub fn reject<S, T, E>(scheduler: &S, reason: E) -> Promise<T, E>
where
    S: Scheduler + Clone + 'static,
    T: Value,
    E: Reason,
{
    Promise::rejected(scheduler, reason)
}
