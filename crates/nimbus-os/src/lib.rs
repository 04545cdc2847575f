//! The `nimbus-os` library plugs the `nimbus` core into an operating system.
//!
//! It provides:
//!
//! - [`tcp::TcpTransport`], a non-blocking `TCP` implementation of the
//!   [`nimbus::transport::AsyncTcp`] contract built on `socket2`.
//! - [`clock::SystemClock`], a [`nimbus::clock::Clock`] reading the system
//!   time.
//!
//! These adapters let the same firmware logic run on a desktop host, which
//! is convenient for development and integration tests.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// System time source.
pub mod clock;
/// Non-blocking `TCP` transport.
pub mod tcp;

pub use clock::SystemClock;
pub use tcp::TcpTransport;
