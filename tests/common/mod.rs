//! Shared test helpers for integration tests

use promissory::{set_unhandled_rejection_hook, take_unhandled_rejection_hook, UnhandledRejection};
use std::cell::RefCell;
use std::rc::Rc;

/// Shared log that closures can push into
pub fn recorder<T: 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(T) + Clone) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (log, move |item| sink.borrow_mut().push(item))
}

/// Captures unhandled rejection reports for the current test thread.
/// The hook is removed again when the guard is dropped.
pub struct UnhandledCapture {
    reports: Rc<RefCell<Vec<UnhandledRejection>>>,
}

impl UnhandledCapture {
    pub fn install() -> Self {
        init_tracing();
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = reports.clone();
        set_unhandled_rejection_hook(move |report| sink.borrow_mut().push(report.clone()));
        Self { reports }
    }

    pub fn reports(&self) -> Vec<UnhandledRejection> {
        self.reports.borrow().clone()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.reports.borrow().is_empty()
    }
}

impl Drop for UnhandledCapture {
    fn drop(&mut self) {
        take_unhandled_rejection_hook();
    }
}

/// Route engine logs to the test output when `RUST_LOG` is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
