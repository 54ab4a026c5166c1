use std::time::Instant;

use super::Connection;
use crate::Error;

/// Which side of the handshake a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Handshake and lifetime state of a [`Connection`].
///
/// The client walks
/// `Idle → SendingClientHello → AwaitingHelloVerify → ResendingClientHelloWithCookie
/// → AwaitingServerHello → Negotiating → AwaitingFinished → Established`.
/// A server starts in `AwaitingClientHello`, since the engine only creates
/// it for a ClientHello that passed the cookie check. `Closing` and the two
/// terminal states are shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    SendingClientHello,
    AwaitingHelloVerify,
    ResendingClientHelloWithCookie,
    AwaitingServerHello,
    AwaitingClientHello,
    Negotiating,
    AwaitingFinished,
    Established,
    Closing,
    Closed,
    Failed,
}

impl HandshakeState {
    /// `Closed` or `Failed`. Nothing moves a connection out of these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Closed | HandshakeState::Failed)
    }

    /// Still negotiating keys.
    pub fn is_handshaking(&self) -> bool {
        !matches!(
            self,
            HandshakeState::Established
                | HandshakeState::Closing
                | HandshakeState::Closed
                | HandshakeState::Failed
        )
    }

    pub(super) fn make_progress(self, conn: &mut Connection, now: Instant) -> Result<Self, Error> {
        if !self.is_handshaking() {
            return Ok(self);
        }

        match conn.role() {
            Role::Client => self.client_progress(conn, now),
            Role::Server => self.server_progress(conn, now),
        }
    }
}

/// Why a connection reached [`HandshakeState::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// We closed and the peer answered with its own close_notify.
    Acknowledged,
    /// The peer closed first.
    PeerClosed,
    /// We closed and no answer arrived in time.
    LingerTimeout,
    /// No authenticated record arrived for the idle timeout.
    IdleTimeout,
}
