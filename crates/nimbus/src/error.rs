use alloc::borrow::Cow;

use core::fmt;

/// All possible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The heap region could not satisfy a reservation.
    OutOfMemory,
    /// The transport failed to send data.
    Send,
    /// The transport failed to receive data or lost the connection.
    Receive,
    /// A request did not complete within its timeout.
    Timeout,
    /// The client is already processing a request.
    Busy,
    /// The device clock has not been set or reports an invalid time.
    TimeNotSet,
    /// The credentials used to create a token are incomplete.
    InvalidCredentials,
    /// A token payload could not be serialized.
    Serialization,
    /// A token payload could not be signed.
    Signing,
}

impl ErrorKind {
    /// Returns the numeric code associated with the error kind.
    ///
    /// Codes are stable and always negative, so they can be reported as-is
    /// over channels which only carry integers.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Send => -2,
            Self::Receive => -4,
            Self::Timeout => -6,
            Self::Busy => -7,
            Self::OutOfMemory => -100,
            Self::TimeNotSet => -118,
            Self::InvalidCredentials => -119,
            Self::Serialization => -120,
            Self::Signing => -121,
        }
    }

    const fn description(self) -> &'static str {
        match self {
            Self::OutOfMemory => "Out of memory",
            Self::Send => "Send",
            Self::Receive => "Receive",
            Self::Timeout => "Timeout",
            Self::Busy => "Busy",
            Self::TimeNotSet => "Time not set",
            Self::InvalidCredentials => "Invalid credentials",
            Self::Serialization => "Serialization",
            Self::Signing => "Signing",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A library error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    info: Cow<'static, str>,
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description of the
    /// failure.
    #[must_use]
    #[inline]
    pub fn new(kind: ErrorKind, info: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            info: info.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn info(&self) -> &str {
        &self.info
    }

    /// Returns the numeric code of the error.
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.kind.code()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (code {})", self.kind, self.info, self.code())
    }
}

impl core::error::Error for Error {}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::{Error, ErrorKind};

    #[test]
    fn codes_are_negative_and_distinct() {
        let kinds = [
            ErrorKind::OutOfMemory,
            ErrorKind::Send,
            ErrorKind::Receive,
            ErrorKind::Timeout,
            ErrorKind::Busy,
            ErrorKind::TimeNotSet,
            ErrorKind::InvalidCredentials,
            ErrorKind::Serialization,
            ErrorKind::Signing,
        ];

        for (i, kind) in kinds.iter().enumerate() {
            assert!(kind.code() < 0);
            for other in &kinds[i + 1..] {
                assert_ne!(kind.code(), other.code());
            }
        }
    }

    #[test]
    fn display_error() {
        let error = Error::new(ErrorKind::Timeout, "request timed out");

        assert_eq!(error.info(), "request timed out");
        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert_eq!(error.to_string(), "Timeout: request timed out (code -6)");
    }
}
