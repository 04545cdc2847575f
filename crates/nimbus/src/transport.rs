use log::{debug, warn};

/// Size of the inbound staging buffer in bytes.
pub const STAGING_BUFFER_SIZE: usize = 100;

/// The contract a firmware `TCP`/`TLS` stack implements to carry the client
/// traffic.
///
/// Every method must return immediately. Progress and failures are reported
/// through output parameters, and the client polls again on its next tick
/// whenever an operation is not complete yet.
pub trait AsyncTcp {
    /// Requests a connection to `host` on `port`.
    ///
    /// The request is fire-and-forget: its completion is observed through
    /// [`AsyncTcp::status`].
    fn connect(&mut self, host: &str, port: u16);

    /// Writes the current connection liveness into `status`.
    fn status(&mut self, status: &mut bool);

    /// Sends up to `data.len()` bytes and writes the amount actually sent
    /// into `sent`.
    ///
    /// A `sent` value of zero is an unrecoverable failure for the call.
    /// A stack which is temporarily unable to write must not report zero:
    /// it has to queue the data, or report the bytes it accepted. Otherwise
    /// the whole request fails, and a caller retrying it reconnects and
    /// resends the full payload.
    fn send(&mut self, data: &[u8], sent: &mut u32);

    /// Copies up to `buf.len()` already received bytes into `buf`.
    ///
    /// `filled` receives the number of copied bytes, `0` when nothing is
    /// ready yet, or `-1` on a receive failure. `available` receives the
    /// number of bytes still buffered after the copy.
    fn receive(&mut self, buf: &mut [u8], filled: &mut i32, available: &mut u32);

    /// Requests the connection to be closed.
    fn stop(&mut self);
}

impl<T: AsyncTcp + ?Sized> AsyncTcp for &mut T {
    fn connect(&mut self, host: &str, port: u16) {
        (**self).connect(host, port);
    }

    fn status(&mut self, status: &mut bool) {
        (**self).status(status);
    }

    fn send(&mut self, data: &[u8], sent: &mut u32) {
        (**self).send(data, sent);
    }

    fn receive(&mut self, buf: &mut [u8], filled: &mut i32, available: &mut u32) {
        (**self).receive(buf, filled, available);
    }

    fn stop(&mut self) {
        (**self).stop();
    }
}

/// Connection request callback.
pub type AsyncTcpConnect = fn(host: &str, port: u16);
/// Connection status callback.
pub type AsyncTcpStatus = fn(status: &mut bool);
/// Send request callback.
pub type AsyncTcpSend = fn(data: &[u8], sent: &mut u32);
/// Receive request callback.
pub type AsyncTcpReceive = fn(buf: &mut [u8], filled: &mut i32, available: &mut u32);
/// Connection stop callback.
pub type AsyncTcpStop = fn();

/// An [`AsyncTcp`] implementation built from five free functions.
///
/// Useful for firmware which keeps its `TCP` client in a global and exposes
/// it through plain functions.
#[derive(Debug, Clone, Copy)]
pub struct CallbackTransport {
    connect: AsyncTcpConnect,
    status: AsyncTcpStatus,
    send: AsyncTcpSend,
    receive: AsyncTcpReceive,
    stop: AsyncTcpStop,
}

impl CallbackTransport {
    /// Creates a [`CallbackTransport`].
    #[must_use]
    pub const fn new(
        connect: AsyncTcpConnect,
        status: AsyncTcpStatus,
        send: AsyncTcpSend,
        receive: AsyncTcpReceive,
        stop: AsyncTcpStop,
    ) -> Self {
        Self {
            connect,
            status,
            send,
            receive,
            stop,
        }
    }
}

impl AsyncTcp for CallbackTransport {
    fn connect(&mut self, host: &str, port: u16) {
        (self.connect)(host, port);
    }

    fn status(&mut self, status: &mut bool) {
        (self.status)(status);
    }

    fn send(&mut self, data: &[u8], sent: &mut u32) {
        (self.send)(data, sent);
    }

    fn receive(&mut self, buf: &mut [u8], filled: &mut i32, available: &mut u32) {
        (self.receive)(buf, filled, available);
    }

    fn stop(&mut self) {
        (self.stop)();
    }
}

/// The outcome of a staging buffer refill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The staging buffer holds this many unread bytes.
    Data(usize),
    /// No data is ready yet.
    Empty,
    /// The transport reported a receive failure.
    Failed,
}

/// An [`AsyncTcp`] transport together with its inbound staging state.
///
/// Received data is staged into a fixed buffer of [`STAGING_BUFFER_SIZE`]
/// bytes, and consumed through a read cursor which never moves past the
/// last filled byte.
#[derive(Debug)]
pub struct AsyncTcpConfig<T: AsyncTcp> {
    transport: T,
    buff: [u8; STAGING_BUFFER_SIZE],
    buff_pos: usize,
    filled_size: i32,
    available: u32,
}

impl<T: AsyncTcp> AsyncTcpConfig<T> {
    /// Creates an [`AsyncTcpConfig`] over `transport`.
    #[must_use]
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            buff: [0; STAGING_BUFFER_SIZE],
            buff_pos: 0,
            filled_size: 0,
            available: 0,
        }
    }

    /// Requests a connection to `host` on `port`, discarding any staged
    /// data.
    pub fn connect(&mut self, host: &str, port: u16) {
        self.reset();
        debug!("Connecting to {host}:{port}");
        self.transport.connect(host, port);
    }

    /// Polls the connection liveness.
    pub fn connected(&mut self) -> bool {
        let mut status = false;
        self.transport.status(&mut status);
        status
    }

    /// Sends `data` and returns the number of bytes actually sent.
    ///
    /// Zero means that the transport failed.
    pub fn send(&mut self, data: &[u8]) -> usize {
        let mut sent = 0;
        self.transport.send(data, &mut sent);

        let sent = usize::try_from(sent).unwrap_or(usize::MAX);
        if sent > data.len() {
            warn!("The transport reported {sent} bytes sent out of {}", data.len());
            return data.len();
        }
        sent
    }

    /// Refills the staging buffer when every staged byte has been consumed.
    ///
    /// Once the transport reports a failure, the staging state stays failed
    /// until [`AsyncTcpConfig::reset`] is called.
    pub fn fill(&mut self) -> Fill {
        if self.filled_size < 0 {
            return Fill::Failed;
        }

        let unread = self.staged().len();
        if unread > 0 {
            return Fill::Data(unread);
        }

        let mut filled = 0;
        let mut available = 0;
        self.transport
            .receive(&mut self.buff, &mut filled, &mut available);

        if filled < 0 {
            warn!("The transport reported a receive failure");
            // The read cursor stays at the last valid position.
            self.filled_size = -1;
            self.available = 0;
            return Fill::Failed;
        }

        self.available = available;

        let filled = usize::try_from(filled).unwrap_or(usize::MAX);
        if filled > STAGING_BUFFER_SIZE {
            warn!("The transport reported {filled} bytes filled out of {STAGING_BUFFER_SIZE}");
            self.filled_size = -1;
            return Fill::Failed;
        }

        self.buff_pos = 0;
        // Bounded by the staging buffer size.
        self.filled_size = filled as i32;

        if filled == 0 {
            Fill::Empty
        } else {
            Fill::Data(filled)
        }
    }

    /// Returns the staged bytes not consumed yet.
    #[must_use]
    pub fn staged(&self) -> &[u8] {
        match usize::try_from(self.filled_size) {
            Ok(filled) => &self.buff[self.buff_pos..filled],
            Err(_) => &[],
        }
    }

    /// Marks `count` staged bytes as consumed.
    ///
    /// The read cursor never moves past the last staged byte.
    pub fn consume(&mut self, count: usize) {
        let unread = self.staged().len();
        self.buff_pos += count.min(unread);
    }

    /// Copies staged bytes into `out`, consuming them.
    ///
    /// Returns the number of copied bytes.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let staged = self.staged();
        let count = staged.len().min(out.len());
        out[..count].copy_from_slice(&staged[..count]);
        self.consume(count);
        count
    }

    /// Requests the connection to be closed and discards any staged data.
    pub fn stop(&mut self) {
        debug!("Stopping the connection");
        self.transport.stop();
        self.reset();
    }

    /// Discards any staged data and clears a previous failure.
    pub fn reset(&mut self) {
        self.buff_pos = 0;
        self.filled_size = 0;
        self.available = 0;
    }

    /// Returns the read cursor.
    #[must_use]
    pub const fn buff_pos(&self) -> usize {
        self.buff_pos
    }

    /// Returns the size of the last refill, `-1` after a failure.
    #[must_use]
    pub const fn filled_size(&self) -> i32 {
        self.filled_size
    }

    /// Returns the number of bytes the transport reported as still
    /// buffered after the last refill.
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.available
    }

    /// Returns whether the transport reported a receive failure.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.filled_size < 0
    }

    /// Returns the transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the transport mutably.
    #[must_use]
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use alloc::collections::VecDeque;
    use alloc::string::String;
    use alloc::vec::Vec;

    use super::{AsyncTcp, AsyncTcpConfig, CallbackTransport, Fill, STAGING_BUFFER_SIZE};

    /// A scripted transaction expected by the [`MockTransport`].
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Transaction {
        Connect(&'static str, u16),
        Status(bool),
        Send { expected: usize, sent: u32 },
        Receive { data: Vec<u8>, available: u32 },
        ReceiveFailure,
        // Reports `filled` without copying anything.
        ReceiveCount(i32),
        Stop,
    }

    impl Transaction {
        pub(crate) fn receive(data: &[u8], available: u32) -> Self {
            Self::Receive {
                data: data.to_vec(),
                available,
            }
        }
    }

    /// A transport replaying a list of expected transactions.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        expectations: VecDeque<Transaction>,
        pub(crate) host: String,
        pub(crate) sent: Vec<u8>,
    }

    impl MockTransport {
        pub(crate) fn new(expectations: &[Transaction]) -> Self {
            Self {
                expectations: expectations.iter().cloned().collect(),
                ..Self::default()
            }
        }

        fn next(&mut self) -> Transaction {
            self.expectations
                .pop_front()
                .unwrap_or_else(|| panic!("Unexpected transport call"))
        }

        pub(crate) fn done(&self) {
            assert!(
                self.expectations.is_empty(),
                "Unmet expectations: {:?}",
                self.expectations
            );
        }
    }

    impl AsyncTcp for MockTransport {
        fn connect(&mut self, host: &str, port: u16) {
            match self.next() {
                Transaction::Connect(expected_host, expected_port) => {
                    assert_eq!(host, expected_host);
                    assert_eq!(port, expected_port);
                    self.host = host.into();
                }
                other => panic!("Expected {other:?}, got connect"),
            }
        }

        fn status(&mut self, status: &mut bool) {
            match self.next() {
                Transaction::Status(value) => *status = value,
                other => panic!("Expected {other:?}, got status"),
            }
        }

        fn send(&mut self, data: &[u8], sent: &mut u32) {
            match self.next() {
                Transaction::Send {
                    expected,
                    sent: value,
                } => {
                    assert_eq!(data.len(), expected);
                    let accepted = (value as usize).min(data.len());
                    self.sent.extend_from_slice(&data[..accepted]);
                    *sent = value;
                }
                other => panic!("Expected {other:?}, got send"),
            }
        }

        fn receive(&mut self, buf: &mut [u8], filled: &mut i32, available: &mut u32) {
            assert_eq!(buf.len(), STAGING_BUFFER_SIZE);
            match self.next() {
                Transaction::Receive {
                    data,
                    available: value,
                } => {
                    buf[..data.len()].copy_from_slice(&data);
                    *filled = data.len() as i32;
                    *available = value;
                }
                Transaction::ReceiveFailure => *filled = -1,
                Transaction::ReceiveCount(count) => *filled = count,
                other => panic!("Expected {other:?}, got receive"),
            }
        }

        fn stop(&mut self) {
            match self.next() {
                Transaction::Stop => {}
                other => panic!("Expected {other:?}, got stop"),
            }
        }
    }

    #[test]
    fn fill_and_consume() {
        let mut mock = MockTransport::new(&[
            Transaction::receive(&[1, 2, 3, 4, 5], 7),
            Transaction::receive(&[], 0),
        ]);
        let mut tcp = AsyncTcpConfig::new(&mut mock);

        assert_eq!(tcp.fill(), Fill::Data(5));
        assert_eq!(tcp.available(), 7);

        let mut out = [0u8; 3];
        assert_eq!(tcp.read(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(tcp.buff_pos(), 3);

        // Staged bytes are served before the transport is polled again.
        assert_eq!(tcp.fill(), Fill::Data(2));
        tcp.consume(10);
        assert_eq!(tcp.buff_pos(), 5);
        assert!(tcp.staged().is_empty());

        assert_eq!(tcp.fill(), Fill::Empty);
        assert_eq!(tcp.filled_size(), 0);

        mock.done();
    }

    #[test]
    fn receive_failure_keeps_cursor() {
        let mut mock = MockTransport::new(&[
            Transaction::receive(&[9; 10], 0),
            Transaction::ReceiveFailure,
        ]);
        let mut tcp = AsyncTcpConfig::new(&mut mock);

        assert_eq!(tcp.fill(), Fill::Data(10));
        tcp.consume(10);
        let position = tcp.buff_pos();

        assert_eq!(tcp.fill(), Fill::Failed);
        assert!(tcp.is_failed());
        assert_eq!(tcp.filled_size(), -1);
        assert_eq!(tcp.buff_pos(), position);
        assert!(tcp.staged().is_empty());

        // The failure is sticky and the transport is not polled again.
        assert_eq!(tcp.fill(), Fill::Failed);
        tcp.consume(5);
        assert_eq!(tcp.buff_pos(), position);

        tcp.reset();
        assert!(!tcp.is_failed());

        mock.done();
    }

    #[test]
    fn send_clamps_overreported_progress() {
        let mut mock = MockTransport::new(&[
            Transaction::Send {
                expected: 4,
                sent: 4,
            },
            Transaction::Send {
                expected: 4,
                sent: 9,
            },
            Transaction::Send {
                expected: 4,
                sent: 0,
            },
        ]);
        let mut tcp = AsyncTcpConfig::new(&mut mock);

        assert_eq!(tcp.send(b"ping"), 4);
        assert_eq!(tcp.send(b"ping"), 4);
        assert_eq!(tcp.send(b"ping"), 0);

        mock.done();
    }

    #[test]
    fn overfilled_staging_buffer_fails() {
        let mut mock = MockTransport::new(&[
            Transaction::ReceiveCount(STAGING_BUFFER_SIZE as i32 + 1),
        ]);
        let mut tcp = AsyncTcpConfig::new(&mut mock);

        assert_eq!(tcp.fill(), Fill::Failed);
        assert!(tcp.is_failed());
        assert_eq!(tcp.buff_pos(), 0);
        assert!(tcp.staged().is_empty());

        // The transport is not polled again until a reset.
        assert_eq!(tcp.fill(), Fill::Failed);

        mock.done();
    }

    #[test]
    fn callback_transport_forwards_calls() {
        fn connect(_host: &str, _port: u16) {}
        fn status(status: &mut bool) {
            *status = true;
        }
        fn send(data: &[u8], sent: &mut u32) {
            *sent = data.len() as u32;
        }
        fn receive(buf: &mut [u8], filled: &mut i32, available: &mut u32) {
            buf[..2].copy_from_slice(b"ok");
            *filled = 2;
            *available = 0;
        }
        fn stop() {}

        let mut tcp =
            AsyncTcpConfig::new(CallbackTransport::new(connect, status, send, receive, stop));

        tcp.connect("db.example.com", 443);
        assert!(tcp.connected());
        assert_eq!(tcp.send(b"hello"), 5);
        assert_eq!(tcp.fill(), Fill::Data(2));
        assert_eq!(tcp.staged(), b"ok");
        tcp.stop();
        assert!(tcp.staged().is_empty());
    }
}
