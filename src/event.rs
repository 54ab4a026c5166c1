//! Local events queued by a connection for delivery via `poll_output`.

use crate::connection::CloseReason;
use crate::Output;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LocalEvent {
    /// Handshake completed.
    Connected,
    /// The connection reached `Closed`.
    Closed(CloseReason),
}

impl LocalEvent {
    pub(crate) fn into_output<'a>(self) -> Output<'a> {
        match self {
            LocalEvent::Connected => Output::Connected,
            LocalEvent::Closed(reason) => Output::Closed(reason),
        }
    }
}
