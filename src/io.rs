//! Datagram transport seam for the [`Engine`](crate::Engine).

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// Result of waiting for a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// A datagram of `len` bytes from `peer` was written to the buffer.
    Datagram { peer: SocketAddr, len: usize },
    /// The deadline passed without a datagram.
    Timeout,
    /// The transport is shut down. The run-loop returns.
    Stopped,
}

/// Packet in, packet out. No framing or delivery guarantees.
pub trait DatagramIo {
    /// Best-effort send of one datagram.
    fn send(&mut self, peer: SocketAddr, bytes: &[u8]) -> io::Result<()>;

    /// Block until a datagram arrives, `deadline` passes, or the transport stops.
    ///
    /// A `None` deadline waits indefinitely.
    fn receive(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> io::Result<Received>;
}

/// [`DatagramIo`] over an already bound [`UdpSocket`].
#[derive(Debug)]
pub struct UdpIo {
    socket: UdpSocket,
}

impl UdpIo {
    pub fn new(socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(false)?;
        Ok(UdpIo { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramIo for UdpIo {
    fn send(&mut self, peer: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        self.socket.send_to(bytes, peer).map(|_| ())
    }

    fn receive(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> io::Result<Received> {
        let timeout = match deadline {
            Some(d) => {
                let left = d.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Ok(Received::Timeout);
                }
                // A zero read timeout means "block forever" to the OS.
                Some(left.max(Duration::from_millis(1)))
            }
            None => None,
        };
        self.socket.set_read_timeout(timeout)?;

        match self.socket.recv_from(buf) {
            Ok((len, peer)) => Ok(Received::Datagram { peer, len }),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(Received::Timeout)
            }
            Err(e) => Err(e),
        }
    }
}
