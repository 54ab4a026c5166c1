//! Timer multiplexing for the engine.
//!
//! Every connection has at most one registered deadline, the earliest of
//! its flight, handshake, linger and idle timers. Deadlines live in a
//! min-heap. Rescheduling does not search the heap; superseded entries are
//! recognised and skipped when they surface, and the heap is rebuilt once
//! they outnumber the live ones.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Default)]
pub struct RetransmissionScheduler {
    heap: BinaryHeap<Reverse<(Instant, SocketAddr)>>,
    deadlines: HashMap<SocketAddr, Instant>,
}

impl RetransmissionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or move the deadline of `peer`.
    pub fn schedule(&mut self, peer: SocketAddr, deadline: Instant) {
        if self.deadlines.insert(peer, deadline) == Some(deadline) {
            return;
        }
        self.heap.push(Reverse((deadline, peer)));

        if self.heap.len() > 2 * self.deadlines.len() + 16 {
            self.compact();
        }
    }

    pub fn cancel(&mut self, peer: SocketAddr) {
        self.deadlines.remove(&peer);
    }

    pub fn deadline(&self, peer: SocketAddr) -> Option<Instant> {
        self.deadlines.get(&peer).copied()
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.skip_stale();
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove and return every peer whose deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<SocketAddr> {
        let mut expired = Vec::new();
        loop {
            self.skip_stale();
            match self.heap.peek() {
                Some(Reverse((at, peer))) if *at <= now => {
                    let peer = *peer;
                    self.heap.pop();
                    self.deadlines.remove(&peer);
                    expired.push(peer);
                }
                _ => break,
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    fn compact(&mut self) {
        self.heap = self
            .deadlines
            .iter()
            .map(|(peer, at)| Reverse((*at, *peer)))
            .collect();
    }

    fn skip_stale(&mut self) {
        while let Some(Reverse((at, peer))) = self.heap.peek() {
            if self.deadlines.get(peer) == Some(at) {
                break;
            }
            self.heap.pop();
        }
    }
}
