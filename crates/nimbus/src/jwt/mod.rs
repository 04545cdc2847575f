mod auth;
mod claims;
mod signer;

pub use auth::{
    ACCESS_TOKEN_AUDIENCE, AuthData, CUSTOM_TOKEN_AUDIENCE, DEFAULT_SCOPE, ServiceAccount,
    TokenConfig, TokenKind,
};
pub use signer::{DIGEST_SIZE, SIGNATURE_SIZE, Signer};

use alloc::format;
use alloc::string::String;

use core::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use log::{debug, error, info};

use sha2::{Digest, Sha256};

use zeroize::Zeroize;

use crate::arena::{Arena, ArenaBlock};
use crate::clock::Clock;
use crate::error::{Error, ErrorKind};
use crate::result::{AsyncResult, AsyncResultCallback};

use claims::{Claims, Header, encode_segment};

/// Token generator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JwtState {
    /// No generation has started.
    #[default]
    Idle,
    /// Serializing header and claims.
    BuildingPayload,
    /// Hashing the payload.
    Hashing,
    /// Signing the digest.
    Signing,
    /// Assembling the final token.
    Encoding,
    /// A token is available.
    Done,
    /// The last generation failed.
    Error,
}

impl JwtState {
    /// Returns whether the generation has finished, successfully or not.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Working data of a token generation.
#[derive(Default)]
pub struct JwtTokenData {
    token: String,
    msg: String,
    pk: String,
    err_code: i32,
    hash: Option<ArenaBlock>,
    signature: Option<ArenaBlock>,
    signature_len: usize,
}

impl JwtTokenData {
    /// Returns the last generated token, empty when none is available.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the message of the last failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the code of the last failure, or `0`.
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.err_code
    }

    /// Returns the digest buffer, when held.
    #[must_use]
    pub const fn hash(&self) -> Option<&ArenaBlock> {
        self.hash.as_ref()
    }

    /// Returns the signature buffer, when held.
    #[must_use]
    pub const fn signature(&self) -> Option<&ArenaBlock> {
        self.signature.as_ref()
    }
}

impl fmt::Debug for JwtTokenData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtTokenData")
            .field("token", &self.token)
            .field("msg", &self.msg)
            .field("err_code", &self.err_code)
            .field("hash", &self.hash)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl Drop for JwtTokenData {
    fn drop(&mut self) {
        self.pk.zeroize();
    }
}

/// An incremental `JWT` generator.
///
/// Each call to [`TokenGenerator::poll`] performs at most one step of the
/// generation, so the caller can interleave it with other work on a single
/// cooperative thread:
///
/// 1. validate the clock and the credentials
/// 2. serialize the header and the claims
/// 3. hash the payload
/// 4. sign the digest through the [`Signer`]
/// 5. assemble the token
///
/// Failures are reported both in place, through
/// [`TokenGenerator::result`], and once per attempt through the optional
/// callback.
#[derive(Debug)]
pub struct TokenGenerator<S: Signer> {
    arena: Arena,
    signer: S,
    state: JwtState,
    processing: bool,
    issued_at: u64,
    expires_at: u64,
    payload: String,
    data: JwtTokenData,
    result: AsyncResult,
    callback: Option<AsyncResultCallback>,
    reported: bool,
}

impl<S: Signer> TokenGenerator<S> {
    /// Creates a [`TokenGenerator`] reserving its buffers from `arena`.
    #[must_use]
    pub fn new(signer: S, arena: Arena) -> Self {
        Self {
            arena,
            signer,
            state: JwtState::Idle,
            processing: false,
            issued_at: 0,
            expires_at: 0,
            payload: String::new(),
            data: JwtTokenData::default(),
            result: AsyncResult::new("jwt"),
            callback: None,
            reported: false,
        }
    }

    /// Sets the callback invoked once per failed generation.
    #[must_use]
    #[inline]
    pub fn callback(mut self, callback: AsyncResultCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Advances the generation by one step.
    ///
    /// Returns `true` when the generation has finished, either with a token
    /// or with an error. Once finished, further calls return `true` without
    /// doing any work until [`TokenGenerator::refresh`] or
    /// [`TokenGenerator::clear`] is called.
    pub fn poll<C: Clock>(&mut self, auth: &AuthData, clock: &C) -> bool {
        if !self.processing {
            if self.state.is_terminal() {
                return true;
            }
            self.begin(auth, clock);
            return self.state.is_terminal();
        }

        match self.state {
            JwtState::BuildingPayload => self.build_payload(auth),
            JwtState::Hashing => self.hash(),
            JwtState::Signing => self.sign(),
            JwtState::Encoding => self.encode(),
            JwtState::Idle | JwtState::Done | JwtState::Error => self.begin(auth, clock),
        }

        self.state.is_terminal()
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> JwtState {
        self.state
    }

    /// Returns whether a token is available.
    #[must_use]
    pub const fn ready(&self) -> bool {
        matches!(self.state, JwtState::Done)
    }

    /// Returns the generated token, when available.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.ready().then_some(self.data.token.as_str())
    }

    /// Returns the working data.
    #[must_use]
    pub const fn data(&self) -> &JwtTokenData {
        &self.data
    }

    /// Returns the outcome of the last generation.
    #[must_use]
    pub const fn result(&self) -> &AsyncResult {
        &self.result
    }

    /// Returns the `UNIX` timestamp at which the last generated token
    /// expires, or `0` when no generation has started.
    #[must_use]
    pub const fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Returns the signer.
    #[must_use]
    pub const fn signer(&self) -> &S {
        &self.signer
    }

    /// Prepares a new generation after a finished one.
    ///
    /// The digest buffer, when held, is reused by the next generation.
    pub fn refresh(&mut self) {
        if !self.processing && self.state.is_terminal() {
            self.state = JwtState::Idle;
        }
    }

    /// Releases every buffer and wipes the working data, in any state.
    pub fn clear(&mut self) {
        self.processing = false;
        self.arena.release(&mut self.data.signature);
        self.arena.release(&mut self.data.hash);
        self.data.signature_len = 0;
        self.data.pk.zeroize();
        self.data.token.clear();
        self.data.msg.clear();
        self.data.err_code = 0;
        self.payload.clear();
        self.result.clear();
        self.reported = false;
        self.state = JwtState::Idle;
    }

    fn begin<C: Clock>(&mut self, auth: &AuthData, clock: &C) {
        self.reported = false;
        self.data.token.clear();
        self.data.msg.clear();
        self.data.err_code = 0;
        self.result.clear();

        if !clock.is_valid() {
            self.fail(Error::new(
                ErrorKind::TimeNotSet,
                "The device time is not set or not synchronized",
            ));
            return;
        }

        let account = auth.account();
        if account.client_email().is_empty() || account.private_key().is_empty() {
            self.fail(Error::new(
                ErrorKind::InvalidCredentials,
                "The client email and the private key are required",
            ));
            return;
        }

        if let TokenKind::CustomToken { uid, .. } = auth.kind()
            && uid.is_empty()
        {
            self.fail(Error::new(
                ErrorKind::InvalidCredentials,
                "A custom token requires a user identifier",
            ));
            return;
        }

        self.data.pk.zeroize();
        self.data.pk.push_str(account.private_key());
        self.issued_at = clock.timestamp();
        self.expires_at = self
            .issued_at
            .saturating_add(auth.token_config().expiry_secs());
        self.processing = true;
        self.state = JwtState::BuildingPayload;

        debug!("Token generation started for {}", account.client_email());
    }

    fn build_payload(&mut self, auth: &AuthData) {
        self.payload.clear();

        let header = Header::new(self.signer.algorithm());
        let claims = Claims::new(auth, self.issued_at);

        let outcome = encode_segment(&header, &mut self.payload).and_then(|()| {
            self.payload.push('.');
            encode_segment(&claims, &mut self.payload)
        });

        match outcome {
            Ok(()) => self.state = JwtState::Hashing,
            Err(e) => self.fail(e),
        }
    }

    fn hash(&mut self) {
        let Some(mut hash) = self
            .data
            .hash
            .take()
            .or_else(|| self.arena.alloc(DIGEST_SIZE))
        else {
            self.fail(Error::new(
                ErrorKind::OutOfMemory,
                "Unable to reserve the digest buffer",
            ));
            return;
        };

        hash.copy_from_slice(&Sha256::digest(self.payload.as_bytes()));
        self.data.hash = Some(hash);
        self.state = JwtState::Signing;
    }

    fn sign(&mut self) {
        let mut digest = [0; DIGEST_SIZE];
        match self.data.hash.as_deref() {
            Some(hash) => digest.copy_from_slice(hash),
            None => {
                self.fail(Error::new(ErrorKind::Signing, "The digest is missing"));
                return;
            }
        }

        let Some(mut signature) = self.arena.alloc(SIGNATURE_SIZE) else {
            self.fail(Error::new(
                ErrorKind::OutOfMemory,
                "Unable to reserve the signature buffer",
            ));
            return;
        };

        match self.signer.sign(&self.data.pk, &digest, &mut signature) {
            Ok(len) if len > 0 && len <= SIGNATURE_SIZE => {
                self.data.signature = Some(signature);
                self.data.signature_len = len;
                self.state = JwtState::Encoding;
            }
            Ok(len) => self.fail(Error::new(
                ErrorKind::Signing,
                format!("Invalid signature length {len}"),
            )),
            Err(e) => self.fail(e),
        }
    }

    fn encode(&mut self) {
        let Some(signature) = self.data.signature.as_deref() else {
            self.fail(Error::new(ErrorKind::Signing, "The signature is missing"));
            return;
        };

        let mut token = core::mem::take(&mut self.payload);
        token.push('.');
        URL_SAFE_NO_PAD.encode_string(&signature[..self.data.signature_len], &mut token);

        self.result.set_payload(token.as_bytes().into());
        self.data.token = token;
        self.state = JwtState::Done;
        self.exit(true);

        info!("Token generated, expiring at {}", self.expires_at);
    }

    fn fail(&mut self, error: Error) {
        error!("Token generation failed: {error}");

        self.data.msg.clear();
        self.data.msg.push_str(error.info());
        self.data.err_code = error.code();
        self.state = JwtState::Error;
        self.exit(false);
        self.result.set_error(error);

        if !self.reported {
            self.reported = true;
            if let Some(callback) = self.callback {
                callback(&self.result);
            }
        }
    }

    // The signature never outlives a generation, while the digest buffer
    // is kept for the next one unless the generation failed.
    fn exit(&mut self, ok: bool) {
        self.processing = false;
        self.arena.release(&mut self.data.signature);
        self.data.signature_len = 0;
        if !ok {
            self.arena.release(&mut self.data.hash);
        }
        self.data.pk.zeroize();
        self.payload.clear();
    }
}
