//! Settlement values and the conversions handlers use to produce them

use super::Promise;
use crate::error::Error;
use std::fmt;

/// Bound for fulfillment values. Values are cloned once per delivered
/// handler, since several consumers may observe the same settlement.
pub trait Value: Clone + 'static {}

impl<T: Clone + 'static> Value for T {}

/// Bound for rejection reasons. Reasons must be constructible from [`Error`]
/// so the engine can reject on its own behalf.
pub trait Reason: Clone + fmt::Debug + From<Error> + 'static {}

impl<E: Clone + fmt::Debug + From<Error> + 'static> Reason for E {}

/// The final state of a settled promise
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement<T, E> {
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> Settlement<T, E> {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settlement::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Settlement::Rejected(_))
    }

    /// Convert into a `Result`, fulfilled values on the `Ok` side
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Settlement::Fulfilled(value) => Ok(value),
            Settlement::Rejected(reason) => Err(reason),
        }
    }
}

impl<T, E> From<Result<T, E>> for Settlement<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Settlement::Fulfilled(value),
            Err(reason) => Settlement::Rejected(reason),
        }
    }
}

/// What a promise is resolved with: a plain value, or another promise whose
/// eventual settlement is adopted
pub enum Resolution<T, E> {
    Value(T),
    Promise(Promise<T, E>),
}

impl<T, E> fmt::Debug for Resolution<T, E>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(_) => f.write_str("Promise(..)"),
        }
    }
}

/// Conversion used for everything a handler may return.
///
/// `Err` is the equivalent of throwing from a handler: the derived promise
/// rejects with it.
pub trait IntoResolution<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E>;
}

impl<T, E> IntoResolution<T, E> for Result<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        self.map(Resolution::Value)
    }
}

impl<T, E> IntoResolution<T, E> for Promise<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        Ok(Resolution::Promise(self))
    }
}

impl<T, E> IntoResolution<T, E> for Resolution<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        Ok(self)
    }
}

impl<T, E> IntoResolution<T, E> for Settlement<T, E> {
    fn into_resolution(self) -> Result<Resolution<T, E>, E> {
        self.into_result().map(Resolution::Value)
    }
}
