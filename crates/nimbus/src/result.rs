use alloc::string::String;
use alloc::vec::Vec;

use crate::error::Error;

/// A callback invoked with an [`AsyncResult`] once it has been updated.
pub type AsyncResultCallback = fn(result: &AsyncResult);

/// The outcome of an asynchronous operation.
///
/// A result is updated in place by the operation which owns it, so any
/// interested caller can inspect it between two ticks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsyncResult {
    uid: String,
    payload: Vec<u8>,
    error: Option<Error>,
    available: bool,
}

impl AsyncResult {
    /// Creates an empty [`AsyncResult`] identified by `uid`.
    #[must_use]
    #[inline]
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
    }

    /// Returns the identifier of the operation.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Returns the payload produced by the operation.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the payload as text, if it is valid `UTF-8`.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }

    /// Returns the error reported by the operation, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Returns whether the operation failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Returns whether the result holds an outcome.
    #[must_use]
    pub const fn available(&self) -> bool {
        self.available
    }

    /// Stores a successful outcome, replacing any previous error.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
        self.error = None;
        self.available = true;
    }

    /// Stores a failed outcome, discarding any previous payload.
    pub fn set_error(&mut self, error: Error) {
        self.payload.clear();
        self.error = Some(error);
        self.available = true;
    }

    /// Discards the outcome, keeping the identifier.
    pub fn clear(&mut self) {
        self.payload.clear();
        self.error = None;
        self.available = false;
    }
}
