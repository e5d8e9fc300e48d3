mod fmt;

pub use self::fmt::*;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type BoxedErrorResult<T> = std::result::Result<T, BoxedError>;

/// Convert any error into a [`BoxedError`], e.g. in test code that mixes
/// error types from multiple crates.
pub trait WhateverResult<T> {
    fn boxed(self) -> BoxedErrorResult<T>;
}

impl<T, E> WhateverResult<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn boxed(self) -> BoxedErrorResult<T> {
        self.map_err(|e| Box::new(e) as BoxedError)
    }
}
