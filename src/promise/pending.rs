//! Pending promise state machine
//!
//! A [`Core`] is the shared state behind every promise that did not start out
//! settled: the settlement slot, the handler registry, the canceller and the
//! consumer bookkeeping used for cancellation fan-in.
//!
//! Delivery edges are owning. A registered [`Reaction`] owns the promise it
//! settles until delivery, so a chain stays alive for as long as the promise
//! at its head can still settle, whether or not the caller kept handles to
//! the intermediate links. Cancellation edges (derived to parent, adopter to
//! adopted) are weak. Settlement drops the canceller and the drained
//! reactions, so a canceller that captures its own resolver cannot keep the
//! promise alive past settlement.
//!
//! Cancellation propagation and teardown both walk chains with an explicit
//! work list, so neither recurses once per link.

use super::deferred::Resolver;
use super::settlement::{Reason, Resolution, Settlement, Value};
use super::Promise;
use crate::error::Error;
use crate::event_loop::Scheduler;
use crate::unhandled::RejectionTracker;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

/// User-supplied cancellation routine
pub(crate) type Canceller<T, E> = Box<dyn FnOnce(Resolver<T, E>) -> Result<(), E>>;

/// A registered handler record, consumed once on delivery
pub(crate) struct Reaction<T, E> {
    run: Box<dyn FnOnce(Settlement<T, E>)>,
    /// The promise this reaction settles, owned until delivery
    target: Option<Rc<dyn Dependent>>,
}

impl<T, E> Reaction<T, E> {
    /// A reaction that settles nothing, such as a terminal `done` consumer
    pub(crate) fn new<F>(run: F) -> Self
    where
        F: FnOnce(Settlement<T, E>) + 'static,
    {
        Self {
            run: Box::new(run),
            target: None,
        }
    }

    fn settling<F>(run: F, target: Rc<dyn Dependent>) -> Self
    where
        F: FnOnce(Settlement<T, E>) + 'static,
    {
        Self {
            run: Box::new(run),
            target: Some(target),
        }
    }

    pub(crate) fn deliver(self, settlement: Settlement<T, E>) {
        let Reaction { run, target } = self;
        run(settlement);
        drop(target);
    }
}

/// Type-erased view of a promise that has consumers depending on it
pub(crate) trait Upstream {
    /// One consumer withdrew its interest. Returns the promises this one
    /// must in turn release if that withdrawal cancelled it.
    fn release_consumer(&self) -> Vec<Rc<dyn Upstream>>;
}

/// Type-erased view of a promise owned by another promise's reactions
pub(crate) trait Dependent {
    /// Detach the promises this one owns through its own reactions
    fn take_dependents(&self) -> Vec<Rc<dyn Dependent>>;
}

enum Slot<T, E> {
    /// Not yet resolved; resolve/reject are accepted
    Pending,
    /// Resolved with a pending promise; waiting for it to settle
    Following(Weak<Core<T, E>>),
    /// Terminal
    Settled(Settlement<T, E>),
}

struct State<T, E> {
    slot: Slot<T, E>,
    reactions: Vec<Reaction<T, E>>,
    canceller: Option<Canceller<T, E>>,
    upstream: Option<Weak<dyn Upstream>>,
    consumers: usize,
    cancel_requested: bool,
    tracker: Option<RejectionTracker>,
}

pub(crate) struct Core<T, E> {
    me: Weak<Core<T, E>>,
    scheduler: Rc<dyn Scheduler>,
    state: RefCell<State<T, E>>,
}

impl<T: Value, E: Reason> Core<T, E> {
    pub(crate) fn new(
        scheduler: Rc<dyn Scheduler>,
        canceller: Option<Canceller<T, E>>,
        upstream: Option<Weak<dyn Upstream>>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Core {
            me: me.clone(),
            scheduler,
            state: RefCell::new(State {
                slot: Slot::Pending,
                reactions: Vec::new(),
                canceller,
                upstream,
                consumers: 0,
                cancel_requested: false,
                tracker: None,
            }),
        })
    }

    pub(crate) fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.scheduler
    }

    pub(crate) fn settlement(&self) -> Option<Settlement<T, E>> {
        match &self.state.borrow().slot {
            Slot::Settled(settlement) => Some(settlement.clone()),
            _ => None,
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        matches!(self.state.borrow().slot, Slot::Settled(_))
    }

    /// Whether resolve/reject would still take effect
    pub(crate) fn is_open(&self) -> bool {
        matches!(self.state.borrow().slot, Slot::Pending)
    }

    pub(crate) fn consumers(&self) -> usize {
        self.state.borrow().consumers
    }

    /// Resolve with a value or adopt another promise. Ignored unless open.
    pub(crate) fn resolve(&self, resolution: Resolution<T, E>) {
        if !self.is_open() {
            tracing::trace!("ignoring resolve of a promise that is already resolved");
            return;
        }
        match resolution {
            Resolution::Value(value) => self.complete(Settlement::Fulfilled(value)),
            Resolution::Promise(promise) => self.adopt(promise),
        }
    }

    /// Reject with a reason. Ignored unless open.
    pub(crate) fn reject(&self, reason: E) {
        if !self.is_open() {
            tracing::trace!("ignoring reject of a promise that is already resolved");
            return;
        }
        self.complete(Settlement::Rejected(reason));
    }

    /// Register a reaction; delivered through the scheduler once settled
    pub(crate) fn subscribe(&self, reaction: Reaction<T, E>) {
        match self.observe_settlement() {
            Some(settlement) => self
                .scheduler
                .schedule(Box::new(move || reaction.deliver(settlement))),
            None => self.state.borrow_mut().reactions.push(reaction),
        }
    }

    /// Record one more consumer and hand out the cancellation edge it will
    /// hold. Settled promises need no cancellation bookkeeping.
    pub(crate) fn register_consumer(&self) -> Option<Weak<dyn Upstream>> {
        if self.is_settled() {
            return None;
        }
        self.add_consumer();
        let me: Weak<dyn Upstream> = self.me.clone();
        Some(me)
    }

    fn add_consumer(&self) {
        self.state.borrow_mut().consumers += 1;
    }

    /// Request cancellation, then walk every promise whose last consumer
    /// withdrew as a result.
    pub(crate) fn cancel(&self) {
        let mut releases = self.cancel_once();
        while let Some(upstream) = releases.pop() {
            releases.extend(upstream.release_consumer());
        }
    }

    /// Run the canceller at most once and collect the promises this one held
    /// a consumer slot on.
    fn cancel_once(&self) -> Vec<Rc<dyn Upstream>> {
        let (canceller, releases) = {
            let mut state = self.state.borrow_mut();
            if state.cancel_requested || matches!(state.slot, Slot::Settled(_)) {
                return Vec::new();
            }
            state.cancel_requested = true;

            let mut releases: Vec<Rc<dyn Upstream>> = Vec::new();
            if let Some(upstream) = state.upstream.as_ref().and_then(Weak::upgrade) {
                releases.push(upstream);
            }
            if let Slot::Following(inner) = &state.slot {
                if let Some(inner) = inner.upgrade() {
                    releases.push(inner);
                }
            }
            (state.canceller.take(), releases)
        };

        if let Some(canceller) = canceller {
            tracing::debug!("invoking canceller");
            self.invoke_canceller(canceller);
        }
        releases
    }

    fn invoke_canceller(&self, canceller: Canceller<T, E>) {
        let Some(me) = self.me.upgrade() else { return };
        let resolver = Resolver::from_core(me);
        if let Err(reason) = invoke(move || canceller(resolver)) {
            self.reject(reason);
        }
    }

    fn adopt(&self, promise: Promise<T, E>) {
        let inner = match promise.into_core() {
            Ok(inner) => inner,
            // Already settled immediates hand over their settlement directly.
            Err(settlement) => return self.complete(settlement),
        };

        if self.is_followed_by(&inner) {
            tracing::debug!("rejecting circular resolution");
            return self.complete(Settlement::Rejected(E::from(Error::CircularResolution)));
        }

        if let Some(settlement) = inner.observe_settlement() {
            return self.complete(settlement);
        }

        let Some(me) = self.me.upgrade() else { return };
        inner.add_consumer();
        self.state.borrow_mut().slot = Slot::Following(Rc::downgrade(&inner));
        tracing::trace!("adopting pending promise");

        let target = self.me.clone();
        inner.subscribe(Reaction::settling(
            move |settlement| {
                if let Some(core) = target.upgrade() {
                    core.complete(settlement);
                }
            },
            me,
        ));
    }

    /// Whether `inner` is this promise or (transitively) follows it
    fn is_followed_by(&self, inner: &Rc<Core<T, E>>) -> bool {
        let mut current = inner.clone();
        loop {
            if std::ptr::eq(Rc::as_ptr(&current), self) {
                return true;
            }
            let next = match &current.state.borrow().slot {
                Slot::Following(next) => next.upgrade(),
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    /// Current settlement, marking a rejection as handled by the caller
    fn observe_settlement(&self) -> Option<Settlement<T, E>> {
        let state = self.state.borrow();
        match &state.slot {
            Slot::Settled(settlement) => {
                if let Some(tracker) = &state.tracker {
                    tracker.mark_handled();
                }
                Some(settlement.clone())
            }
            _ => None,
        }
    }

    /// Transition to the terminal state and queue delivery to every
    /// registered reaction, in registration order.
    pub(crate) fn complete(&self, settlement: Settlement<T, E>) {
        let (reactions, released) = {
            let mut state = self.state.borrow_mut();
            if matches!(state.slot, Slot::Settled(_)) {
                return;
            }
            let previous = std::mem::replace(&mut state.slot, Slot::Settled(settlement.clone()));
            let reactions = std::mem::take(&mut state.reactions);
            if reactions.is_empty() {
                if let Settlement::Rejected(reason) = &settlement {
                    state.tracker = Some(RejectionTracker::new(reason));
                }
            }
            let released = (previous, state.canceller.take(), state.upstream.take());
            (reactions, released)
        };
        // The canceller may own the last handle to other promises.
        drop(released);

        tracing::trace!(
            fulfilled = settlement.is_fulfilled(),
            handlers = reactions.len(),
            "promise settled"
        );
        for reaction in reactions {
            let settlement = settlement.clone();
            self.scheduler
                .schedule(Box::new(move || reaction.deliver(settlement)));
        }
    }
}

impl<T: Value, E: Reason> Upstream for Core<T, E> {
    fn release_consumer(&self) -> Vec<Rc<dyn Upstream>> {
        let withdrawn = {
            let mut state = self.state.borrow_mut();
            state.consumers = state.consumers.saturating_sub(1);
            state.consumers == 0
        };
        if withdrawn {
            tracing::debug!("all consumers withdrew; propagating cancellation");
            self.cancel_once()
        } else {
            Vec::new()
        }
    }
}

fn detach<T, E>(reactions: &mut [Reaction<T, E>]) -> Vec<Rc<dyn Dependent>> {
    reactions
        .iter_mut()
        .filter_map(|reaction| reaction.target.take())
        .collect()
}

impl<T, E> Dependent for Core<T, E> {
    fn take_dependents(&self) -> Vec<Rc<dyn Dependent>> {
        detach(&mut self.state.borrow_mut().reactions)
    }
}

impl<T, E> Drop for Core<T, E> {
    fn drop(&mut self) {
        // Unlink owned chains one link at a time instead of recursively.
        let mut owned = detach(&mut self.state.get_mut().reactions);
        while let Some(dependent) = owned.pop() {
            if Rc::strong_count(&dependent) == 1 {
                owned.extend(dependent.take_dependents());
            }
        }
    }
}

/// Build the reaction that runs `handler` and settles the derived promise.
///
/// The reaction owns the derived promise until it has been delivered, so
/// the rest of a chain runs even if nobody holds the intermediate links.
pub(crate) fn reaction_for<T, E, U, H>(derived: &Rc<Core<U, E>>, handler: H) -> Reaction<T, E>
where
    T: Value,
    E: Reason,
    U: Value,
    H: FnOnce(Settlement<T, E>) -> Result<Resolution<U, E>, E> + 'static,
{
    let target = Rc::downgrade(derived);
    let owned: Rc<dyn Dependent> = derived.clone();
    Reaction::settling(
        move |settlement| {
            let outcome = invoke(move || handler(settlement));
            let Some(core) = target.upgrade() else { return };
            match outcome {
                Ok(resolution) => core.resolve(resolution),
                Err(reason) => core.reject(reason),
            }
        },
        owned,
    )
}

/// Run a user callback, turning a panic into a rejection reason
pub(crate) fn invoke<R, E, F>(callback: F) -> Result<R, E>
where
    E: From<Error>,
    F: FnOnce() -> Result<R, E>,
{
    catch_unwind(AssertUnwindSafe(callback))
        .unwrap_or_else(|payload| Err(E::from(Error::from_panic(payload))))
}
