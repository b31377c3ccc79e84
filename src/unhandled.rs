//! Unhandled Rejection Reporting
//!
//! Rejections that nobody observes are reported through a hook instead of
//! being dropped silently. Promises are `!Send`, so the hook is scoped to the
//! thread of control that owns them. Without an installed hook, reports are
//! logged through `tracing` at error level.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Where an unhandled rejection was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionOrigin {
    /// A rejection (or a failing callback) reached a terminal `done` consumer
    Done,
    /// A rejected promise was released without any handler attached to it
    Dropped,
    /// A queued task panicked outside of any promise callback
    Task,
}

impl fmt::Display for RejectionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionOrigin::Done => write!(f, "done"),
            RejectionOrigin::Dropped => write!(f, "dropped"),
            RejectionOrigin::Task => write!(f, "task"),
        }
    }
}

/// A single unhandled rejection report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledRejection {
    /// Debug rendering of the rejection reason
    pub reason: String,
    /// Where the rejection was detected
    pub origin: RejectionOrigin,
}

impl UnhandledRejection {
    pub fn new(reason: impl Into<String>, origin: RejectionOrigin) -> Self {
        Self {
            reason: reason.into(),
            origin,
        }
    }

    pub(crate) fn from_reason<E: fmt::Debug>(reason: &E, origin: RejectionOrigin) -> Self {
        Self::new(format!("{:?}", reason), origin)
    }
}

impl fmt::Display for UnhandledRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unhandled rejection ({}): {}", self.origin, self.reason)
    }
}

type Hook = Rc<dyn Fn(&UnhandledRejection)>;

thread_local! {
    static HOOK: RefCell<Option<Hook>> = const { RefCell::new(None) };
}

/// Install the hook that receives unhandled rejection reports, returning the
/// previously installed one.
pub fn set_unhandled_rejection_hook<F>(hook: F) -> Option<Rc<dyn Fn(&UnhandledRejection)>>
where
    F: Fn(&UnhandledRejection) + 'static,
{
    HOOK.with(|slot| slot.borrow_mut().replace(Rc::new(hook)))
}

/// Remove the installed hook, restoring the default `tracing` reporter
pub fn take_unhandled_rejection_hook() -> Option<Rc<dyn Fn(&UnhandledRejection)>> {
    HOOK.with(|slot| slot.borrow_mut().take())
}

/// Deliver a report to the installed hook
pub fn report_unhandled(report: UnhandledRejection) {
    // Clone the hook out so it may replace itself or trigger further reports.
    let hook = HOOK
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten();
    match hook {
        Some(hook) => hook(&report),
        None => tracing::error!(origin = %report.origin, reason = %report.reason, "unhandled promise rejection"),
    }
}

/// Reports a rejection on drop unless some consumer observed it first
pub(crate) struct RejectionTracker {
    reason: String,
    handled: Cell<bool>,
}

impl RejectionTracker {
    pub(crate) fn new<E: fmt::Debug>(reason: &E) -> Self {
        Self {
            reason: format!("{:?}", reason),
            handled: Cell::new(false),
        }
    }

    pub(crate) fn mark_handled(&self) {
        self.handled.set(true);
    }
}

impl Drop for RejectionTracker {
    fn drop(&mut self) {
        if !self.handled.get() {
            report_unhandled(UnhandledRejection::new(
                std::mem::take(&mut self.reason),
                RejectionOrigin::Dropped,
            ));
        }
    }
}
