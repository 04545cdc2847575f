use alloc::format;

use log::{debug, error};

use crate::arena::{Arena, ArenaBlock};
use crate::error::{Error, ErrorKind, Result};
use crate::file::FileConfig;
use crate::result::{AsyncResult, AsyncResultCallback};
use crate::transport::{AsyncTcp, AsyncTcpConfig, Fill};

// Default request timeout.
const DEFAULT_TIMEOUT_MS: u64 = 30 * 1000;
// Default response buffer capacity.
const DEFAULT_RESPONSE_CAPACITY: usize = 1024;
// Default maximum number of bytes handed to the transport in a single send.
const DEFAULT_SEND_CHUNK: usize = 1024;

/// The request driver configuration.
///
/// ## Parameters
///
/// - **`timeout_ms`**
///   Time (in milliseconds) allowed for a request, from connection to the
///   end of the response. Defaults to `30000`.
///   See [`ClientConfig::timeout()`].
///
/// - **`response_capacity`**
///   Size (in bytes) of the buffer collecting the response. A response
///   exceeding it fails the request. Defaults to `1024`.
///   See [`ClientConfig::response_capacity()`].
///
/// - **`send_chunk`**
///   Maximum number of bytes handed to the transport on each tick.
///   Defaults to `1024`.
///   See [`ClientConfig::send_chunk()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    timeout_ms: u64,
    response_capacity: usize,
    send_chunk: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfig {
    /// Creates a [`ClientConfig`] with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
            send_chunk: DEFAULT_SEND_CHUNK,
        }
    }

    /// Sets the request timeout (in milliseconds).
    #[must_use]
    pub const fn timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the response buffer capacity (in bytes).
    #[must_use]
    pub const fn response_capacity(mut self, capacity: usize) -> Self {
        self.response_capacity = capacity;
        self
    }

    /// Sets the maximum number of bytes sent on each tick.
    ///
    /// A value of zero is raised to one.
    #[must_use]
    pub const fn send_chunk(mut self, send_chunk: usize) -> Self {
        self.send_chunk = if send_chunk == 0 { 1 } else { send_chunk };
        self
    }
}

/// The state of the request driven by an [`AsyncClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestState {
    /// No request has been started.
    #[default]
    Idle,
    /// Waiting for the transport to report a live connection.
    Connecting,
    /// Handing the request payload to the transport.
    Sending,
    /// Collecting the response.
    Receiving,
    /// The response has been collected.
    Done,
    /// The request failed.
    Failed,
}

impl RequestState {
    /// Returns whether a request is in flight.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Connecting | Self::Sending | Self::Receiving)
    }
}

/// A driver which carries a single request over an [`AsyncTcp`] transport.
///
/// A request is started with [`AsyncClient::begin`] and progresses one step
/// each time [`AsyncClient::poll`] is called. The request payload is staged
/// in an arena block and the response is collected in a blob buffer, both
/// released as soon as the request terminates.
#[derive(Debug)]
pub struct AsyncClient<T: AsyncTcp> {
    tcp: AsyncTcpConfig<T>,
    arena: Arena,
    config: ClientConfig,
    state: RequestState,
    payload: Option<ArenaBlock>,
    sent: usize,
    response: FileConfig<'static>,
    received: usize,
    started_ms: u64,
    result: AsyncResult,
    callback: Option<AsyncResultCallback>,
}

impl<T: AsyncTcp> AsyncClient<T> {
    /// Creates an [`AsyncClient`] over `transport`, reserving its buffers
    /// from `arena`.
    #[must_use]
    pub fn new(transport: T, arena: Arena) -> Self {
        Self {
            tcp: AsyncTcpConfig::new(transport),
            response: FileConfig::new(arena.clone()),
            arena,
            config: ClientConfig::new(),
            state: RequestState::Idle,
            payload: None,
            sent: 0,
            received: 0,
            started_ms: 0,
            result: AsyncResult::default(),
            callback: None,
        }
    }

    /// Sets the [`ClientConfig`].
    #[must_use]
    #[inline]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets a callback invoked each time a request terminates.
    #[must_use]
    #[inline]
    pub fn callback(mut self, callback: AsyncResultCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Starts a request sending `payload` to `host` on `port`.
    ///
    /// `now_ms` is the current monotonic time, from which the request
    /// timeout is measured.
    ///
    /// # Errors
    ///
    /// - A request is already in flight
    /// - The payload or the response buffer cannot be reserved
    pub fn begin(&mut self, host: &str, port: u16, payload: &[u8], now_ms: u64) -> Result<()> {
        if self.state.is_in_flight() {
            return Err(Error::new(
                ErrorKind::Busy,
                "A request is already in flight",
            ));
        }

        self.reset();

        let Some(mut block) = self.arena.alloc(payload.len()) else {
            return Err(Error::new(
                ErrorKind::OutOfMemory,
                format!("Unable to stage a payload of {} bytes", payload.len()),
            ));
        };
        block.copy_from_slice(payload);

        self.response.init_blob_writer(self.config.response_capacity);
        if self.response.data_size() != self.config.response_capacity {
            return Err(Error::new(
                ErrorKind::OutOfMemory,
                format!(
                    "Unable to reserve a response buffer of {} bytes",
                    self.config.response_capacity
                ),
            ));
        }

        self.payload = Some(block);
        self.sent = 0;
        self.received = 0;
        self.started_ms = now_ms;

        self.tcp.connect(host, port);
        self.state = RequestState::Connecting;

        Ok(())
    }

    /// Advances the request by one step.
    ///
    /// Returns `true` when no request is in flight anymore, either because
    /// it terminated or because none was started.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if !self.state.is_in_flight() {
            return true;
        }

        if now_ms.saturating_sub(self.started_ms) >= self.config.timeout_ms {
            self.terminate(Err(Error::new(
                ErrorKind::Timeout,
                format!(
                    "The request did not complete within {} ms",
                    self.config.timeout_ms
                ),
            )));
            return true;
        }

        match self.state {
            RequestState::Connecting => {
                if self.tcp.connected() {
                    debug!("Connection established");
                    self.state = RequestState::Sending;
                }
                false
            }
            RequestState::Sending => self.poll_send(),
            RequestState::Receiving => self.poll_receive(),
            RequestState::Idle | RequestState::Done | RequestState::Failed => true,
        }
    }

    /// Aborts any request in flight and releases every buffer.
    ///
    /// Calling this method in any state is safe.
    pub fn reset(&mut self) {
        if self.state.is_in_flight() {
            self.tcp.stop();
        }
        self.arena.release(&mut self.payload);
        self.response.clear();
        self.result.clear();
        self.sent = 0;
        self.received = 0;
        self.state = RequestState::Idle;
    }

    /// Returns the request state.
    #[must_use]
    pub const fn state(&self) -> RequestState {
        self.state
    }

    /// Returns the result of the last terminated request.
    #[must_use]
    pub const fn result(&self) -> &AsyncResult {
        &self.result
    }

    /// Returns the transport with its staging state.
    #[must_use]
    pub const fn tcp(&self) -> &AsyncTcpConfig<T> {
        &self.tcp
    }

    fn poll_send(&mut self) -> bool {
        let (sent, total) = match self.payload.as_deref() {
            Some(payload) if self.sent < payload.len() => {
                let end = self
                    .sent
                    .saturating_add(self.config.send_chunk)
                    .min(payload.len());
                (self.tcp.send(&payload[self.sent..end]), payload.len())
            }
            _ => {
                self.arena.release(&mut self.payload);
                self.state = RequestState::Receiving;
                return false;
            }
        };

        // NOTE: A zero-byte send fails the request, even if the transport
        // was only momentarily unable to write.
        if sent == 0 {
            self.terminate(Err(Error::new(
                ErrorKind::Send,
                format!("The transport failed to send after {} bytes", self.sent),
            )));
            return true;
        }

        self.sent += sent;
        if self.sent == total {
            debug!("Request of {total} bytes sent");
            self.arena.release(&mut self.payload);
            self.state = RequestState::Receiving;
        }

        false
    }

    fn poll_receive(&mut self) -> bool {
        match self.tcp.fill() {
            Fill::Data(staged) => {
                let written = self.response.write(self.tcp.staged());
                self.tcp.consume(written);
                self.received += written;

                if written < staged {
                    self.terminate(Err(Error::new(
                        ErrorKind::OutOfMemory,
                        format!(
                            "The response exceeds the buffer capacity of {} bytes",
                            self.config.response_capacity
                        ),
                    )));
                    return true;
                }
                false
            }
            Fill::Empty => {
                if self.received > 0 && self.tcp.available() == 0 {
                    self.terminate(Ok(()));
                    return true;
                }
                false
            }
            Fill::Failed => {
                self.terminate(Err(Error::new(
                    ErrorKind::Receive,
                    "The connection was lost while receiving",
                )));
                true
            }
        }
    }

    // Every terminal transition goes through here.
    fn terminate(&mut self, outcome: Result<()>) {
        self.tcp.stop();
        self.arena.release(&mut self.payload);

        match outcome {
            Ok(()) => {
                debug!("Response of {} bytes received", self.received);
                self.result.set_payload(self.response.written().to_vec());
                self.state = RequestState::Done;
            }
            Err(e) => {
                error!("Request failed: {e}");
                self.result.set_error(e);
                self.state = RequestState::Failed;
            }
        }

        self.response.clear();

        if let Some(callback) = self.callback {
            callback(&self.result);
        }
    }
}
