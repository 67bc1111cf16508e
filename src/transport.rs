use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use std::thread;
use std::time::{Duration, Instant};

use mio::net::TcpStream;

/// Outcome of a single non-blocking read. `Eof` and `WouldBlock` are kept
/// distinct (rather than collapsing both to an empty byte vector) because
/// the client's `on_readable` dispatch needs to tell "nothing to read yet"
/// apart from "the peer is gone" without a second `MSG_PEEK` syscall —
/// see Open Question (b) in the design notes.
pub enum RecvOutcome {
    Data(Vec<u8>),
    WouldBlock,
    Eof,
}

/// Thin non-blocking facade over a BSD socket, in this crate backed by
/// `mio::net::TcpStream` — itself a minimal wrapper around `socket`/`bind`/
/// `connect`/`recv`/`send`/`shutdown` that this core treats as an external
/// collaborator rather than reimplementing.
pub struct Transport {
    stream: Option<TcpStream>,
    id: RawFd,
    io_timeout: Option<Duration>,
}

impl Transport {
    pub fn new(stream: TcpStream, io_timeout: Option<Duration>) -> Self {
        let id = stream.as_raw_fd();
        Self {
            stream: Some(stream),
            id,
            io_timeout,
        }
    }

    pub fn id(&self) -> RawFd {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn peer_name(&self) -> io::Result<SocketAddr> {
        self.require()?.peer_addr()
    }

    /// Reads at most `max` bytes without blocking. A `WouldBlock` error is
    /// translated to `RecvOutcome::WouldBlock`; a zero-length successful
    /// read (the stream was readable) is translated to `RecvOutcome::Eof`.
    pub fn recv_nonblocking(&mut self, max: usize) -> io::Result<RecvOutcome> {
        let stream = self.require_mut()?;
        let mut buf = vec![0u8; max];
        match stream.read(&mut buf) {
            Ok(0) => Ok(RecvOutcome::Eof),
            Ok(n) => {
                buf.truncate(n);
                Ok(RecvOutcome::Data(buf))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.clear_slipped_error()?;
                Ok(RecvOutcome::WouldBlock)
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort single write; returns the number of bytes actually
    /// accepted by the socket buffer, 0 on would-block.
    pub fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.require_mut()?.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.clear_slipped_error()?;
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Loops until every byte of `data` has been accepted by the socket or
    /// an error (including a configured `io_timeout` elapsing) occurs. This
    /// and `react`'s own select call are the only two sanctioned blocking
    /// points in the whole reactor.
    pub fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        let started = Instant::now();
        while !data.is_empty() {
            let stream = self.require_mut()?;
            match stream.write(data) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "write returned zero bytes accepted",
                    ))
                }
                Ok(n) => data = &data[n..],
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.clear_slipped_error()?;
                    if let Some(timeout) = self.io_timeout {
                        if started.elapsed() > timeout {
                            return Err(io::Error::new(
                                ErrorKind::TimedOut,
                                "write_all timed out waiting for a writable socket",
                            ));
                        }
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.require()?.shutdown(how)
    }

    /// Closes the transport. Idempotent: closing an already-closed
    /// transport is a no-op, matching CLOSED being a terminal state.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Exposes the underlying `mio` event source for reactor registration.
    /// Only valid while `is_open()`; the reactor only ever calls this right
    /// after construction, while the connection is still open.
    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        self.stream.as_mut().expect("transport already closed")
    }

    fn require(&self) -> io::Result<&TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "transport already closed"))
    }

    fn require_mut(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(ErrorKind::NotConnected, "transport already closed"))
    }

    /// Non-blocking sockets can leave a pending error on the socket (e.g. a
    /// previous write hitting `ECONNRESET`) that only surfaces on an
    /// unrelated later call. `take_error` drains and clears it so it is
    /// reported here, on first observation, instead of silently vanishing.
    fn clear_slipped_error(&self) -> io::Result<()> {
        if let Some(err) = self.require()?.take_error()? {
            return Err(err);
        }
        Ok(())
    }
}
