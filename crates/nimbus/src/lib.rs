//! The `nimbus` core lets a constrained device talk to cloud services
//! through a transport supplied by its own firmware.
//!
//! This crate provides APIs to:
//!
//! - Reserve scratch buffers from a configurable heap region through an
//!   [`arena::Arena`], with explicit ownership and idempotent release.
//! - Stage binary payloads for uploads and downloads with a
//!   [`file::FileConfig`] descriptor which either owns its buffer or borrows
//!   caller memory.
//! - Plug any non-blocking `TCP`/`TLS` stack into the client through the
//!   [`transport::AsyncTcp`] contract, and drive a request over it with the
//!   [`client::AsyncClient`].
//! - Generate signed `JWT` credentials incrementally, one step per call,
//!   with the [`jwt::TokenGenerator`].
//!
//! Everything in this crate runs on a single cooperative thread of control.
//! No operation blocks: an operation either completes immediately or reports
//! that it is still in progress, and the firmware main loop calls it again
//! on its next tick.
//!
//! This crate is `no_std` and only requires an allocator.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// Scratch memory reservation and release.
pub mod arena;
/// A request driver built on top of the transport contract.
pub mod client;
/// Time sources.
pub mod clock;
/// Error management.
pub mod error;
/// Staging descriptors for binary payloads.
pub mod file;
/// The incremental token generator.
#[cfg(feature = "jwt")]
pub mod jwt;
/// Results delivered to interested callers.
pub mod result;
/// The pluggable asynchronous transport contract.
pub mod transport;

#[cfg(test)]
mod tests;
