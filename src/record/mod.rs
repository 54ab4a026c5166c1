//! The record layer.
//!
//! Frames handshake fragments, alerts and application data into wire
//! records, protects records of epoch 1 and above with the epoch's
//! [`TrafficKeys`], and enforces the per-epoch replay window on the way in.
//!
//! Inbound validation failures never surface as errors. A record that fails
//! parsing, authentication or the replay check, or that belongs to an epoch
//! we do not hold keys for, is dropped and counted through the
//! [`StatsSink`](crate::StatsSink). Authentication failure and replay share
//! one drop reason.

mod header;
mod reassembly;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

pub use header::RecordHeader;
pub use reassembly::{Insert, Reassembler};

use crate::buffer::{Buf, BufferPool};
use crate::crypto::{TrafficKeys, AEAD_OVERHEAD};
use crate::message::{Alert, Header, MessageType, HANDSHAKE_HEADER_LEN};
use crate::stats::{DropReason, Stat};
use crate::types::{ContentType, ProtocolVersion, Sequence};
use crate::util::U48_MAX;
use crate::window::ReplayWindow;
use crate::{Config, Error};

/// Content handed to [`RecordLayer::encode_outbound`].
#[derive(Debug, Clone, Copy)]
pub enum Outbound<'a> {
    /// A complete handshake message body. Fragmented as needed.
    Handshake {
        msg_type: MessageType,
        message_seq: u16,
        body: &'a [u8],
    },
    Alert(Alert),
    /// Must fit one record.
    ApplicationData(&'a [u8]),
}

/// A record that passed all inbound checks.
#[derive(Debug)]
pub struct Record {
    pub content_type: ContentType,
    pub sequence: Sequence,
    /// Plaintext.
    pub payload: Buf,
}

struct SendEpoch {
    epoch: u16,
    next_seq: u64,
    keys: Option<TrafficKeys>,
}

struct RecvEpoch {
    epoch: u16,
    window: ReplayWindow,
    keys: Option<TrafficKeys>,
}

impl RecvEpoch {
    fn new(epoch: u16, keys: Option<TrafficKeys>) -> Self {
        RecvEpoch {
            epoch,
            window: ReplayWindow::new(),
            keys,
        }
    }
}

pub struct RecordLayer {
    config: Arc<Config>,
    send: SendEpoch,
    send_previous: Option<SendEpoch>,
    recv: RecvEpoch,
    recv_previous: Option<RecvEpoch>,
    /// Records of the next epoch that arrived before its keys.
    deferred: VecDeque<Buf>,
    buffers: BufferPool,
}

impl RecordLayer {
    pub fn new(config: Arc<Config>) -> Self {
        RecordLayer {
            config,
            send: SendEpoch {
                epoch: 0,
                next_seq: 0,
                keys: None,
            },
            send_previous: None,
            recv: RecvEpoch::new(0, None),
            recv_previous: None,
            deferred: VecDeque::new(),
            buffers: BufferPool::default(),
        }
    }

    /// Current send epoch.
    pub fn send_epoch(&self) -> u16 {
        self.send.epoch
    }

    /// Highest epoch a record authenticated in.
    pub fn recv_epoch(&self) -> u16 {
        self.recv.epoch
    }

    /// Whether records can still be produced in `epoch`.
    pub fn has_send_epoch(&self, epoch: u16) -> bool {
        self.send.epoch == epoch || matches!(&self.send_previous, Some(p) if p.epoch == epoch)
    }

    /// Continue the epoch 0 sequence at or above `seq`.
    ///
    /// A server picks up where the stateless cookie exchange left off, so the
    /// client's epoch 0 replay window accepts the first flight.
    pub fn align_send_sequence(&mut self, seq: u64) {
        if self.send.epoch == 0 && self.send.next_seq < seq {
            self.send.next_seq = seq;
        }
    }

    /// Start sending in the next epoch with `keys`.
    ///
    /// The current epoch is retained so flights saved in it can be resent.
    pub fn install_send_keys(&mut self, keys: TrafficKeys) -> Result<u16, Error> {
        let epoch = self.send.epoch.checked_add(1).ok_or(Error::EpochExhausted)?;
        let next = SendEpoch {
            epoch,
            next_seq: 0,
            keys: Some(keys),
        };
        self.send_previous = Some(std::mem::replace(&mut self.send, next));
        debug!("Send epoch {}", epoch);
        Ok(epoch)
    }

    /// Accept records in the next epoch with `keys`.
    ///
    /// Returns records of that epoch that arrived early. Feed them back
    /// through [`decode_inbound`](Self::decode_inbound).
    pub fn install_recv_keys(&mut self, keys: TrafficKeys) -> Result<Vec<Buf>, Error> {
        let epoch = self.recv.epoch.checked_add(1).ok_or(Error::EpochExhausted)?;
        let next = RecvEpoch::new(epoch, Some(keys));
        self.recv_previous = Some(std::mem::replace(&mut self.recv, next));
        debug!("Receive epoch {}", epoch);
        Ok(self.deferred.drain(..).collect())
    }

    /// Move the send side to the next epoch, deriving its keys from the current.
    pub fn rekey_send(&mut self) -> Result<u16, Error> {
        let Some(keys) = &self.send.keys else {
            return Err(Error::NotConnected);
        };
        if self.send.epoch == u16::MAX {
            return Err(Error::EpochExhausted);
        }
        let next = keys.next()?;
        self.install_send_keys(next)
    }

    /// Largest plaintext that fits one record in one datagram at `epoch`.
    pub fn max_plaintext(&self, epoch: u16) -> usize {
        let overhead = if epoch >= 1 { AEAD_OVERHEAD } else { 0 };
        self.config.mtu() - RecordHeader::LEN - overhead
    }

    /// Encode `content` at `epoch` into one or more wire records.
    ///
    /// Handshake bodies larger than one record are split into fragments
    /// that each carry their own handshake header.
    pub fn encode_outbound(
        &mut self,
        epoch: u16,
        content: Outbound<'_>,
    ) -> Result<Vec<Buf>, Error> {
        let max = self.max_plaintext(epoch);

        match content {
            Outbound::Handshake {
                msg_type,
                message_seq,
                body,
            } => {
                let max_fragment = max - HANDSHAKE_HEADER_LEN;
                let mut records = Vec::new();
                let mut offset = 0;

                loop {
                    let len = (body.len() - offset).min(max_fragment);
                    let header = Header {
                        msg_type,
                        length: body.len() as u32,
                        message_seq,
                        fragment_offset: offset as u32,
                        fragment_length: len as u32,
                    };

                    let mut plaintext = self.buffers.pop();
                    header.serialize(&mut plaintext);
                    plaintext.extend_from_slice(&body[offset..offset + len]);
                    let record = self.encode_record(ContentType::Handshake, epoch, &plaintext);
                    self.buffers.push(plaintext);
                    records.push(record?);

                    offset += len;
                    if offset >= body.len() {
                        break;
                    }
                }

                if records.len() > 1 {
                    trace!(
                        "{:?} message_seq {} split into {} fragments",
                        msg_type,
                        message_seq,
                        records.len()
                    );
                }

                Ok(records)
            }
            Outbound::Alert(alert) => {
                let mut plaintext = self.buffers.pop();
                alert.serialize(&mut plaintext);
                let record = self.encode_record(ContentType::Alert, epoch, &plaintext);
                self.buffers.push(plaintext);
                Ok(vec![record?])
            }
            Outbound::ApplicationData(data) => {
                if data.len() > max {
                    return Err(Error::PayloadTooLarge(data.len(), max));
                }
                Ok(vec![self.encode_record(
                    ContentType::ApplicationData,
                    epoch,
                    data,
                )?])
            }
        }
    }

    fn encode_record(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        plaintext: &[u8],
    ) -> Result<Buf, Error> {
        let state = if self.send.epoch == epoch {
            &mut self.send
        } else {
            match &mut self.send_previous {
                Some(p) if p.epoch == epoch => p,
                _ => {
                    return Err(Error::UnexpectedMessage(format!(
                        "No send state for epoch {}",
                        epoch
                    )))
                }
            }
        };

        if state.next_seq > U48_MAX {
            return Err(Error::SequenceExhausted(epoch));
        }
        let sequence = Sequence {
            epoch,
            sequence_number: state.next_seq,
        };
        state.next_seq += 1;

        let mut payload = Buf::from_slice(plaintext);
        if let Some(keys) = &state.keys {
            keys.seal(content_type, sequence, &mut payload)?;
        }

        let header = RecordHeader {
            content_type,
            version: ProtocolVersion::V1,
            sequence,
            length: payload.len() as u16,
        };

        let mut record = Buf::new();
        header.serialize(&mut record);
        record.extend_from_slice(&payload);
        Ok(record)
    }

    /// Decode every record in a datagram into `out`.
    ///
    /// The header is parsed and the replay window consulted before any
    /// decryption. The window only moves for records that authenticated.
    pub fn decode_inbound(&mut self, packet: &[u8], out: &mut Vec<Record>) {
        let mut input = packet;

        while !input.is_empty() {
            let (rest, (header, payload)) = match RecordHeader::parse_record(input) {
                Ok(v) => v,
                Err(_) => {
                    trace!("Malformed record, dropping {} bytes", input.len());
                    self.drop_record(DropReason::Malformed);
                    return;
                }
            };
            let raw = &input[..input.len() - rest.len()];
            input = rest;

            if header.version != ProtocolVersion::V1
                || matches!(header.content_type, ContentType::Unknown(_))
            {
                trace!(
                    "Drop record with version {} content type {:?}",
                    header.version,
                    header.content_type
                );
                self.drop_record(DropReason::Malformed);
                continue;
            }

            if let Some(record) = self.decode_record(&header, payload, raw) {
                out.push(record);
            }
        }
    }

    fn decode_record(&mut self, header: &RecordHeader, payload: &[u8], raw: &[u8]) -> Option<Record> {
        let epoch = header.sequence.epoch;
        let seq = header.sequence.sequence_number;

        if epoch == self.recv.epoch.wrapping_add(1) && epoch != 0 {
            return self.decode_next_epoch(header, payload, raw);
        }

        let config = &self.config;
        let state = if epoch == self.recv.epoch {
            &mut self.recv
        } else {
            match &mut self.recv_previous {
                Some(p) if p.epoch == epoch => p,
                _ => {
                    trace!("Drop record for unknown epoch {}", epoch);
                    dropped(config, DropReason::UnknownEpoch);
                    return None;
                }
            }
        };

        if !state.window.is_fresh(seq) {
            trace!("Drop replayed record {}", header.sequence);
            dropped(config, DropReason::BadAuthOrReplay);
            return None;
        }

        let mut plaintext = Buf::from_slice(payload);
        if let Some(keys) = &state.keys {
            if keys
                .open(header.content_type, header.sequence, &mut plaintext)
                .is_err()
            {
                trace!("Drop record {} failing authentication", header.sequence);
                dropped(config, DropReason::BadAuthOrReplay);
                return None;
            }
        }
        state.window.mark(seq);

        Some(Record {
            content_type: header.content_type,
            sequence: header.sequence,
            payload: plaintext,
        })
    }

    /// A record one epoch ahead of the receive epoch.
    ///
    /// With keys for the current epoch the next keys are derived and the
    /// record is tried. The epoch only advances if it authenticates. Without
    /// keys (the handshake has not installed any yet) the record is held
    /// until [`install_recv_keys`](Self::install_recv_keys).
    fn decode_next_epoch(
        &mut self,
        header: &RecordHeader,
        payload: &[u8],
        raw: &[u8],
    ) -> Option<Record> {
        let Some(current) = &self.recv.keys else {
            if self.deferred.len() >= self.config.max_queue_rx() {
                trace!("Drop early record {}, deferred queue full", header.sequence);
                self.drop_record(DropReason::ResourceLimit);
                return None;
            }
            trace!("Defer record {} until keys are installed", header.sequence);
            self.deferred.push_back(Buf::from_slice(raw));
            return None;
        };

        let next = match current.next() {
            Ok(k) => k,
            Err(e) => {
                debug!("Failed to derive next epoch keys: {}", e);
                self.drop_record(DropReason::UnknownEpoch);
                return None;
            }
        };

        let mut plaintext = Buf::from_slice(payload);
        if next
            .open(header.content_type, header.sequence, &mut plaintext)
            .is_err()
        {
            trace!("Drop record {} failing authentication", header.sequence);
            self.drop_record(DropReason::BadAuthOrReplay);
            return None;
        }

        let mut state = RecvEpoch::new(header.sequence.epoch, Some(next));
        state.window.mark(header.sequence.sequence_number);
        self.recv_previous = Some(std::mem::replace(&mut self.recv, state));
        debug!("Peer moved to epoch {}", header.sequence.epoch);

        Some(Record {
            content_type: header.content_type,
            sequence: header.sequence,
            payload: plaintext,
        })
    }

    fn drop_record(&self, reason: DropReason) {
        dropped(&self.config, reason);
    }
}

fn dropped(config: &Config, reason: DropReason) {
    config.stats().record(Stat::RecordDropped(reason));
}

impl fmt::Debug for RecordLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordLayer")
            .field("send_epoch", &self.send.epoch)
            .field("send_seq", &self.send.next_seq)
            .field("recv_epoch", &self.recv.epoch)
            .field("deferred", &self.deferred.len())
            .finish()
    }
}
