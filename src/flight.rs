//! The outstanding flight of a connection.
//!
//! Messages are saved verbatim at the epoch they were first sent in. A
//! resend re-encodes them with fresh record sequence numbers, so the
//! handshake bytes are identical on every attempt.

use std::time::{Duration, Instant};

use crate::buffer::Buf;
use crate::message::{Alert, MessageType};
use crate::timer::ExponentialBackoff;
use crate::Error;

/// Timer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Disabled,
    Armed(Instant),
}

impl Timeout {
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Timeout::Disabled => None,
            Timeout::Armed(at) => Some(*at),
        }
    }

    pub fn expired(&self, now: Instant) -> bool {
        matches!(self, Timeout::Armed(at) if now >= *at)
    }
}

/// Saved content of one flight entry.
#[derive(Debug, Clone)]
pub enum SavedContent {
    Handshake {
        msg_type: MessageType,
        message_seq: u16,
        body: Buf,
    },
    Alert(Alert),
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub epoch: u16,
    pub content: SavedContent,
}

/// Result of [`Flight::handle_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightTimeout {
    /// Not yet due.
    Pending,
    /// Due, resend the saved entries.
    Resend,
}

#[derive(Debug)]
pub struct Flight {
    number: u8,
    entries: Vec<Entry>,
    backoff: ExponentialBackoff,
    timeout: Timeout,
}

impl Flight {
    pub fn new(start_rto: Duration, max_rto: Duration, retries: usize) -> Self {
        Flight {
            number: 0,
            entries: Vec::new(),
            backoff: ExponentialBackoff::new(start_rto, max_rto, retries),
            timeout: Timeout::Disabled,
        }
    }

    /// Start a new flight, dropping the previous one.
    ///
    /// With `retransmit` the flight is resent under backoff until
    /// [`stop`](Self::stop). Otherwise it is only kept for resends
    /// triggered by a duplicate from the peer.
    pub fn begin(&mut self, number: u8, now: Instant, retransmit: bool) {
        debug!("Begin flight {}", number);
        self.number = number;
        self.entries.clear();
        self.backoff.reset();
        self.timeout = if retransmit {
            Timeout::Armed(now + self.backoff.rto())
        } else {
            Timeout::Disabled
        };
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The peer answered. Entries stay for duplicate triggered resends.
    pub fn stop(&mut self) {
        if self.timeout != Timeout::Disabled {
            debug!("Stop flight {} timer", self.number);
        }
        self.timeout = Timeout::Disabled;
    }

    /// Forget the flight entirely.
    pub fn clear(&mut self) {
        self.stop();
        self.entries.clear();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.deadline()
    }

    /// Current retransmission interval.
    pub fn rto(&self) -> Duration {
        self.backoff.rto()
    }

    pub fn attempts(&self) -> usize {
        self.backoff.attempts()
    }

    /// Advance the backoff if the timer is due.
    ///
    /// Fails once the retry budget is spent.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<FlightTimeout, Error> {
        if !self.timeout.expired(now) {
            return Ok(FlightTimeout::Pending);
        }

        if !self.backoff.can_retry() {
            return Err(Error::Timeout("flight"));
        }

        self.backoff.attempt();
        debug!(
            "Re-arm flight {} timeout due to resend in {:.03}s",
            self.number,
            self.backoff.rto().as_secs_f32()
        );
        self.timeout = Timeout::Armed(now + self.backoff.rto());
        Ok(FlightTimeout::Resend)
    }
}
