//! Handshake message reassembly.
//!
//! Fragments are keyed by `message_seq` and placed by `fragment_offset`, so
//! arrival order does not matter. The buffer is bounded in message count,
//! total bytes, and age.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::time::{Duration, Instant};

use crate::buffer::Buf;
use crate::message::{Header, MessageType};

/// Outcome of [`Reassembler::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// New bytes were stored.
    Stored,
    /// Every byte of the fragment was already held.
    Duplicate,
    /// Inconsistent with earlier fragments or over the limits.
    Rejected,
}

struct Partial {
    msg_type: MessageType,
    body: Buf,
    /// Sorted, non-overlapping, non-adjacent covered ranges.
    filled: Vec<Range<usize>>,
    started: Instant,
}

impl Partial {
    fn covers(&self, range: &Range<usize>) -> bool {
        self.filled
            .iter()
            .any(|r| r.start <= range.start && range.end <= r.end)
    }

    fn add(&mut self, range: Range<usize>, data: &[u8]) {
        self.body[range.clone()].copy_from_slice(data);

        let mut merged = range;
        let mut kept = Vec::with_capacity(self.filled.len() + 1);
        for r in self.filled.drain(..) {
            if r.end < merged.start || merged.end < r.start {
                kept.push(r);
            } else {
                merged = merged.start.min(r.start)..merged.end.max(r.end);
            }
        }
        kept.push(merged);
        kept.sort_by_key(|r| r.start);
        self.filled = kept;
    }

    fn is_complete(&self) -> bool {
        self.body.is_empty() || self.filled.first() == Some(&(0..self.body.len()))
    }
}

pub struct Reassembler {
    pending: BTreeMap<u16, Partial>,
    bytes: usize,
    max_messages: usize,
    max_bytes: usize,
}

impl Reassembler {
    pub fn new(max_messages: usize, max_bytes: usize) -> Self {
        Reassembler {
            pending: BTreeMap::new(),
            bytes: 0,
            max_messages,
            max_bytes,
        }
    }

    pub fn insert(&mut self, header: &Header, fragment: &[u8], now: Instant) -> Insert {
        let length = header.length as usize;
        let range = header.fragment_range();

        if range.end > length || range.len() != fragment.len() {
            return Insert::Rejected;
        }

        if let Some(partial) = self.pending.get_mut(&header.message_seq) {
            if partial.msg_type != header.msg_type || partial.body.len() != length {
                trace!(
                    "Fragment of message_seq {} disagrees with earlier fragments",
                    header.message_seq
                );
                return Insert::Rejected;
            }
            if partial.covers(&range) {
                return Insert::Duplicate;
            }
            partial.add(range, fragment);
            return Insert::Stored;
        }

        if self.pending.len() >= self.max_messages || self.bytes + length > self.max_bytes {
            warn!(
                "Reassembly buffer full ({} messages, {} bytes)",
                self.pending.len(),
                self.bytes
            );
            return Insert::Rejected;
        }

        let mut body = Buf::new();
        body.resize(length, 0);
        let mut partial = Partial {
            msg_type: header.msg_type,
            body,
            filled: Vec::new(),
            started: now,
        };
        partial.add(range, fragment);

        self.bytes += length;
        self.pending.insert(header.message_seq, partial);
        Insert::Stored
    }

    /// Remove and return the message `message_seq` if all its bytes arrived.
    pub fn take_complete(&mut self, message_seq: u16) -> Option<(MessageType, Buf)> {
        if !self.pending.get(&message_seq)?.is_complete() {
            return None;
        }
        let partial = self.pending.remove(&message_seq)?;
        self.bytes -= partial.body.len();
        Some((partial.msg_type, partial.body))
    }

    /// Drop incomplete messages whose first fragment is older than `max_age`.
    pub fn expire(&mut self, now: Instant, max_age: Duration) {
        let before = self.pending.len();
        let mut freed = 0;
        self.pending.retain(|seq, p| {
            let keep = p.is_complete() || now.saturating_duration_since(p.started) < max_age;
            if !keep {
                trace!("Discard incomplete message_seq {}", seq);
                freed += p.body.len();
            }
            keep
        });
        self.bytes -= freed;
        if self.pending.len() != before {
            debug!("Expired {} partial messages", before - self.pending.len());
        }
    }

    /// Drop everything with a `message_seq` below `message_seq`.
    pub fn discard_below(&mut self, message_seq: u16) {
        let keep = self.pending.split_off(&message_seq);
        let freed: usize = self.pending.values().map(|p| p.body.len()).sum();
        self.bytes -= freed;
        self.pending = keep;
    }

    /// Lowest `message_seq` held, complete or not.
    pub fn first_seq(&self) -> Option<u16> {
        self.pending.keys().next().copied()
    }

    /// Oldest start time of a message still waiting for fragments.
    pub fn oldest(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter(|p| !p.is_complete())
            .map(|p| p.started)
            .min()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reassembler")
            .field("messages", &self.pending.len())
            .field("bytes", &self.bytes)
            .finish()
    }
}
