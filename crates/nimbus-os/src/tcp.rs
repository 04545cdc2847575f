use std::io::{self, Read, Write};
use std::net::{Shutdown, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};

use tracing::{debug, error, warn};

use nimbus::transport::AsyncTcp;

// Default maximum number of bytes queued while the socket is not writable.
const DEFAULT_PENDING_CAPACITY: usize = 16 * 1024;

// Raw `EINPROGRESS` code returned by a non-blocking connect.
#[cfg(any(target_os = "linux", target_os = "android"))]
const IN_PROGRESS: Option<i32> = Some(115);
#[cfg(any(
    target_vendor = "apple",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
const IN_PROGRESS: Option<i32> = Some(36);
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
const IN_PROGRESS: Option<i32> = None;

fn is_in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || (IN_PROGRESS.is_some() && e.raw_os_error() == IN_PROGRESS)
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn open(host: &str, port: u16) -> io::Result<(Socket, bool)> {
    let address = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("No address found for {host}"),
        )
    })?;

    let socket = Socket::new(
        Domain::for_address(address),
        Type::STREAM,
        Some(Protocol::TCP),
    )?;
    socket.set_nonblocking(true)?;

    match socket.connect(&address.into()) {
        Ok(()) => Ok((socket, true)),
        Err(e) if is_in_progress(&e) => Ok((socket, false)),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Closed,
    Connecting,
    Connected,
    // The peer closed its side of the stream.
    Finished,
    Failed,
}

/// A non-blocking `TCP` transport.
///
/// Name resolution happens when connecting and may block, everything else
/// returns immediately.
///
/// Data which the socket cannot accept right away is queued, up to the
/// pending capacity, and flushed on the next calls. Queued data is reported
/// as sent, so a slow socket is never confused with a failed one.
///
/// A plain socket does not know how many bytes the peer still has to send:
/// while the stream is open, a receive reports one available byte, and it
/// reports zero once the peer has closed the stream.
#[derive(Debug)]
pub struct TcpTransport {
    socket: Option<Socket>,
    link: Link,
    pending: Vec<u8>,
    pending_capacity: usize,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    /// Creates a [`TcpTransport`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            socket: None,
            link: Link::Closed,
            pending: Vec::new(),
            pending_capacity: DEFAULT_PENDING_CAPACITY,
        }
    }

    /// Sets the maximum number of bytes queued while the socket is not
    /// writable.
    #[must_use]
    pub const fn pending_capacity(mut self, capacity: usize) -> Self {
        self.pending_capacity = capacity;
        self
    }

    /// Returns whether the connection is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link == Link::Connected
    }

    /// Returns whether the connection failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.link == Link::Failed
    }

    /// Returns the number of queued bytes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn poll_connect(&mut self) {
        let Some(socket) = &self.socket else {
            return;
        };

        let outcome = match socket.take_error() {
            Ok(Some(e)) | Err(e) => Err(e),
            Ok(None) => socket.peer_addr().map(|_| ()),
        };

        match outcome {
            Ok(()) => {
                debug!("Connection established");
                self.link = Link::Connected;
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => self.fail("Connection failed", &e),
        }
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let Some(socket) = self.socket.as_mut() else {
            return 0;
        };

        match socket.write(data) {
            Ok(written) => written,
            Err(e) if is_transient(&e) => 0,
            Err(e) => {
                self.fail("Send failed", &e);
                0
            }
        }
    }

    fn flush(&mut self) {
        while !self.pending.is_empty() {
            let Some(socket) = self.socket.as_mut() else {
                return;
            };

            match socket.write(&self.pending) {
                Ok(0) => return,
                Ok(written) => {
                    let _ = self.pending.drain(..written);
                }
                Err(e) if is_transient(&e) => return,
                Err(e) => {
                    self.fail("Send failed", &e);
                    return;
                }
            }
        }
    }

    fn fail(&mut self, context: &str, e: &io::Error) {
        warn!("{context}: {e}");
        self.link = Link::Failed;
        self.pending.clear();
    }
}

impl AsyncTcp for TcpTransport {
    fn connect(&mut self, host: &str, port: u16) {
        self.stop();

        match open(host, port) {
            Ok((socket, connected)) => {
                debug!("Connecting to {host}:{port}");
                self.socket = Some(socket);
                self.link = if connected {
                    Link::Connected
                } else {
                    Link::Connecting
                };
            }
            Err(e) => {
                error!("Unable to connect to {host}:{port}: {e}");
                self.link = Link::Failed;
            }
        }
    }

    fn status(&mut self, status: &mut bool) {
        if self.link == Link::Connecting {
            self.poll_connect();
        }
        if self.link == Link::Connected {
            self.flush();
        }
        *status = self.link == Link::Connected;
    }

    fn send(&mut self, data: &[u8], sent: &mut u32) {
        *sent = 0;
        if self.link != Link::Connected {
            return;
        }

        let data = &data[..data.len().min(usize::try_from(u32::MAX).unwrap_or(usize::MAX))];

        self.flush();

        let mut accepted = 0;
        if self.pending.is_empty() {
            accepted = self.write(data);
        }
        if self.link != Link::Connected {
            return;
        }

        let queued = (data.len() - accepted).min(
            self.pending_capacity
                .saturating_sub(self.pending.len()),
        );
        self.pending
            .extend_from_slice(&data[accepted..accepted + queued]);

        *sent = u32::try_from(accepted + queued).unwrap_or(u32::MAX);
    }

    fn receive(&mut self, buf: &mut [u8], filled: &mut i32, available: &mut u32) {
        *filled = 0;
        *available = 0;

        match self.link {
            Link::Connected => self.flush(),
            Link::Connecting => {
                *available = 1;
                return;
            }
            Link::Finished => return,
            Link::Closed | Link::Failed => {
                *filled = -1;
                return;
            }
        }

        let Some(socket) = self.socket.as_mut() else {
            *filled = -1;
            return;
        };

        match socket.read(buf) {
            Ok(0) => {
                debug!("Stream closed by the peer");
                self.link = Link::Finished;
            }
            Ok(read) => {
                *filled = i32::try_from(read).unwrap_or(i32::MAX);
                *available = 1;
            }
            Err(e) if is_transient(&e) => *available = 1,
            Err(e) => {
                self.fail("Receive failed", &e);
                *filled = -1;
            }
        }
    }

    fn stop(&mut self) {
        if let Some(socket) = self.socket.take() {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!("Shutdown skipped: {e}");
            }
            debug!("Connection closed");
        }
        self.pending.clear();
        self.link = Link::Closed;
    }
}
