//! Queue wrapper types with safe Debug implementations.
//!
//! These wrappers ensure that debug output only shows metadata,
//! not potentially sensitive payload data.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::buffer::Buf;
use crate::Error;

/// Outgoing datagrams.
///
/// Wire records are packed into the last datagram while it stays within
/// the MTU, otherwise a new datagram is started.
pub(crate) struct QueueTx(VecDeque<Buf>);

impl QueueTx {
    pub fn new() -> Self {
        Self(VecDeque::new())
    }

    /// Append one complete wire record.
    pub fn push_record(&mut self, record: &[u8], mtu: usize, max_len: usize) -> Result<(), Error> {
        let can_append = self
            .0
            .back()
            .map(|b| b.len() + record.len() <= mtu)
            .unwrap_or(false);

        if can_append {
            if let Some(last) = self.0.back_mut() {
                last.extend_from_slice(record);
                return Ok(());
            }
        }

        if self.0.len() >= max_len {
            warn!("Transmit queue full (max {}): {:?}", max_len, self);
            return Err(Error::TransmitQueueFull);
        }

        self.0.push_back(Buf::from_slice(record));
        Ok(())
    }
}

impl Deref for QueueTx {
    type Target = VecDeque<Buf>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for QueueTx {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl fmt::Debug for QueueTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_bytes: usize = self.0.iter().map(|b| b.len()).sum();
        f.debug_struct("QueueTx")
            .field("datagrams", &self.0.len())
            .field("total_bytes", &total_bytes)
            .finish()
    }
}

/// Decrypted application data waiting for `poll_output`.
pub(crate) struct QueueRx(VecDeque<Buf>);

impl QueueRx {
    pub fn new() -> Self {
        Self(VecDeque::new())
    }
}

impl Deref for QueueRx {
    type Target = VecDeque<Buf>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for QueueRx {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl fmt::Debug for QueueRx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_bytes: usize = self.0.iter().map(|b| b.len()).sum();
        f.debug_struct("QueueRx")
            .field("records", &self.0.len())
            .field("total_bytes", &total_bytes)
            .finish()
    }
}
