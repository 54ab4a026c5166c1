//! One peer session.
//!
//! A [`Connection`] is sans-IO: datagrams go in through
//! [`handle_packet`](Connection::handle_packet), time through
//! [`handle_timeout`](Connection::handle_timeout), and everything the
//! connection wants to emit is pulled with
//! [`poll_output`](Connection::poll_output) until it returns
//! [`Output::Timeout`].

mod client;
mod server;
mod state;

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use state::{CloseReason, HandshakeState, Role};

use crate::buffer::Buf;
use crate::crypto::{KeyExchange, TrafficSecrets};
use crate::event::LocalEvent;
use crate::flight::{Entry, Flight, FlightTimeout, SavedContent};
use crate::message::{Alert, AlertLevel, Body, ClientHello, Header, MessageType, Random, ServerHello};
use crate::queue::{QueueRx, QueueTx};
use crate::record::{Insert, Outbound, Reassembler, Record, RecordLayer};
use crate::rng::RandomSource;
use crate::stats::{DropReason, Stat};
use crate::types::ContentType;
use crate::{Config, Error, Output};

const DISTANT_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Flight number used for the close_notify retransmission.
const CLOSE_FLIGHT: u8 = 6;

pub struct Connection {
    config: Arc<Config>,
    role: Role,
    peer: SocketAddr,
    state: HandshakeState,

    record: RecordLayer,
    reassembler: Reassembler,
    flight: Flight,

    queue_tx: QueueTx,
    queue_rx: QueueRx,
    /// Application data that authenticated before our handshake completed.
    early_data: VecDeque<Buf>,
    local_events: VecDeque<LocalEvent>,
    /// Records that waited for keys, decoded again once they exist.
    redecode: VecDeque<Buf>,

    random: Random,
    key_exchange: KeyExchange,
    client_hello: Option<ClientHello>,
    server_hello: Option<ServerHello>,
    cookie_requests: usize,
    transcript: Buf,
    secrets: Option<TrafficSecrets>,

    send_message_seq: u16,
    /// Next handshake message expected. A server learns it from the first
    /// ClientHello.
    recv_message_seq: Option<u16>,

    handshake_deadline: Instant,
    last_activity: Instant,
    linger_deadline: Option<Instant>,
    last_now: Instant,

    peer_retransmitted: bool,
    flight_sent_in_datagram: bool,
}

impl Connection {
    /// Start a handshake towards `peer`.
    ///
    /// The first ClientHello is queued immediately, drain it with
    /// [`poll_output`](Self::poll_output).
    pub fn new_client(
        config: Arc<Config>,
        peer: SocketAddr,
        now: Instant,
        rng: &mut dyn RandomSource,
    ) -> Result<Self, Error> {
        let mut conn = Self::new(config, Role::Client, peer, now, rng)?;
        conn.make_progress(now)?;
        Ok(conn)
    }

    /// Accept a handshake from `peer`.
    ///
    /// The caller has already checked the cookie of the ClientHello it is
    /// about to feed through [`handle_packet`](Self::handle_packet).
    pub fn new_server(
        config: Arc<Config>,
        peer: SocketAddr,
        now: Instant,
        rng: &mut dyn RandomSource,
    ) -> Result<Self, Error> {
        let mut conn = Self::new(config, Role::Server, peer, now, rng)?;
        conn.make_progress(now)?;
        Ok(conn)
    }

    fn new(
        config: Arc<Config>,
        role: Role,
        peer: SocketAddr,
        now: Instant,
        rng: &mut dyn RandomSource,
    ) -> Result<Self, Error> {
        let random = Random::new(rng)?;
        let key_exchange = KeyExchange::new(rng)?;

        Ok(Connection {
            record: RecordLayer::new(config.clone()),
            reassembler: Reassembler::new(config.max_queue_rx(), config.max_reassembly_bytes()),
            flight: Flight::new(
                config.flight_start_rto(),
                config.flight_max_rto(),
                config.flight_retries(),
            ),
            queue_tx: QueueTx::new(),
            queue_rx: QueueRx::new(),
            early_data: VecDeque::new(),
            local_events: VecDeque::new(),
            redecode: VecDeque::new(),
            random,
            key_exchange,
            client_hello: None,
            server_hello: None,
            cookie_requests: 0,
            transcript: Buf::new(),
            secrets: None,
            send_message_seq: 0,
            recv_message_seq: None,
            handshake_deadline: now + config.handshake_timeout(),
            last_activity: now,
            linger_deadline: None,
            last_now: now,
            peer_retransmitted: false,
            flight_sent_in_datagram: false,
            state: HandshakeState::Idle,
            role,
            peer,
            config,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Current send epoch.
    pub fn epoch(&self) -> u16 {
        self.record.send_epoch()
    }

    /// Highest epoch the peer has been seen sending in.
    pub fn peer_epoch(&self) -> u16 {
        self.record.recv_epoch()
    }

    /// Feed one received datagram.
    ///
    /// Records failing validation are dropped silently. An `Err` means the
    /// connection is now [`HandshakeState::Failed`].
    pub fn handle_packet(&mut self, packet: &[u8], now: Instant) -> Result<(), Error> {
        self.last_now = now;
        self.config.stats().record(Stat::PacketReceived);

        if self.state.is_terminal() {
            trace!("Ignore datagram in {:?}", self.state);
            return Ok(());
        }

        self.peer_retransmitted = false;
        self.flight_sent_in_datagram = false;

        let result = self.process_packet(packet, now);
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    fn process_packet(&mut self, packet: &[u8], now: Instant) -> Result<(), Error> {
        self.ingest(packet, now)?;
        self.make_progress(now)?;

        while let Some(raw) = self.redecode.pop_front() {
            self.ingest(&raw, now)?;
            self.make_progress(now)?;
        }

        // The peer resent a flight we already answered, so our answer was lost.
        if self.peer_retransmitted
            && !self.flight_sent_in_datagram
            && !self.flight.is_empty()
            && !self.state.is_terminal()
        {
            debug!(
                "Peer retransmitted, resend flight {}",
                self.flight.number()
            );
            self.resend_flight()?;
            self.config.stats().record(Stat::Retransmission);
        }

        Ok(())
    }

    /// Advance timers.
    ///
    /// An `Err` means the connection is now [`HandshakeState::Failed`].
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        self.last_now = now;

        if self.state.is_terminal() {
            return Ok(());
        }

        let result = self.check_timers(now);
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    fn check_timers(&mut self, now: Instant) -> Result<(), Error> {
        self.reassembler.expire(now, self.flight.rto());

        if self.state.is_handshaking() && now >= self.handshake_deadline {
            return Err(Error::Timeout("handshake"));
        }

        if self.state == HandshakeState::Closing
            && self.linger_deadline.is_some_and(|at| now >= at)
        {
            debug!("No close_notify from {}, stop lingering", self.peer);
            self.enter_closed(CloseReason::LingerTimeout);
            return Ok(());
        }

        if self.state == HandshakeState::Established
            && now >= self.last_activity + self.config.idle_timeout()
        {
            debug!("Connection to {} idle, closing", self.peer);
            if let Err(e) = self.send_alert(Alert::close_notify()) {
                debug!("Failed to queue close_notify: {}", e);
            }
            self.enter_closed(CloseReason::IdleTimeout);
            return Ok(());
        }

        match self.flight.handle_timeout(now) {
            Ok(FlightTimeout::Pending) => {}
            Ok(FlightTimeout::Resend) => {
                trace!(
                    "Resend flight {}, attempt {}",
                    self.flight.number(),
                    self.flight.attempts()
                );
                self.resend_flight()?;
                self.config.stats().record(Stat::Retransmission);
            }
            Err(e) => {
                if self.state == HandshakeState::Closing {
                    self.enter_closed(CloseReason::LingerTimeout);
                } else {
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Pull the next output.
    ///
    /// Events come first, then received application data, then datagrams to
    /// send. [`Output::Timeout`] means there is nothing more until the given
    /// instant or the next call to `handle_packet`.
    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        if self.local_events.front() == Some(&LocalEvent::Connected) {
            if let Some(event) = self.local_events.pop_front() {
                return event.into_output();
            }
        }

        if let Some(data) = self.queue_rx.pop_front() {
            assert!(
                data.len() <= buf.len(),
                "Output buffer too small for application data {} > {}",
                data.len(),
                buf.len()
            );
            let len = data.len();
            buf[..len].copy_from_slice(&data);
            return Output::ApplicationData(&buf[..len]);
        }

        if let Some(p) = self.queue_tx.pop_front() {
            assert!(
                p.len() <= buf.len(),
                "Output buffer too small for packet {} > {}",
                p.len(),
                buf.len()
            );
            let len = p.len();
            buf[..len].copy_from_slice(&p);
            self.config.stats().record(Stat::PacketSent);
            return Output::Packet(&buf[..len]);
        }

        if let Some(event) = self.local_events.pop_front() {
            return event.into_output();
        }

        Output::Timeout(self.timeout().unwrap_or(self.last_now + DISTANT_FUTURE))
    }

    /// Earliest instant [`handle_timeout`](Self::handle_timeout) has work to do.
    pub fn timeout(&self) -> Option<Instant> {
        if self.state.is_terminal() {
            return None;
        }

        let handshaking = self.state.is_handshaking();

        let handshake = handshaking.then_some(self.handshake_deadline);
        let reassembly = if handshaking {
            self.reassembler.oldest().map(|at| at + self.flight.rto())
        } else {
            None
        };
        let idle = (self.state == HandshakeState::Established)
            .then(|| self.last_activity + self.config.idle_timeout());
        let linger = if self.state == HandshakeState::Closing {
            self.linger_deadline
        } else {
            None
        };

        [self.flight.deadline(), handshake, reassembly, idle, linger]
            .into_iter()
            .flatten()
            .min()
    }

    /// Send one datagram of application data.
    ///
    /// Only possible in [`HandshakeState::Established`]. Data must fit one
    /// record within the MTU.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        match self.state {
            HandshakeState::Established => {}
            HandshakeState::Closing | HandshakeState::Closed | HandshakeState::Failed => {
                return Err(Error::ConnectionClosed)
            }
            _ => return Err(Error::NotConnected),
        }

        let epoch = self.record.send_epoch();
        let records = self
            .record
            .encode_outbound(epoch, Outbound::ApplicationData(data))?;
        self.enqueue(&records)
    }

    /// Send close_notify and wait for the peer's answer.
    ///
    /// The alert is retransmitted under the flight backoff until the peer
    /// answers or the linger timeout passes.
    pub fn close(&mut self, now: Instant) -> Result<(), Error> {
        self.last_now = now;

        if self.state.is_terminal() || self.state == HandshakeState::Closing {
            return Ok(());
        }

        debug!("Closing connection to {}", self.peer);
        let alert = Alert::close_notify();
        let epoch = self.record.send_epoch();

        self.begin_flight(CLOSE_FLIGHT, now, true);
        self.flight.push(Entry {
            epoch,
            content: SavedContent::Alert(alert),
        });
        let records = self.record.encode_outbound(epoch, Outbound::Alert(alert))?;
        self.enqueue(&records)?;

        trace!("{:?} -> {:?}", self.state, HandshakeState::Closing);
        self.state = HandshakeState::Closing;
        self.linger_deadline = Some(now + self.config.close_linger());

        Ok(())
    }

    /// Move the send side to a new epoch.
    ///
    /// The peer follows when the first record of the new epoch
    /// authenticates, no message is exchanged.
    pub fn rekey(&mut self) -> Result<u16, Error> {
        match self.state {
            HandshakeState::Established => self.record.rekey_send(),
            HandshakeState::Closing | HandshakeState::Closed | HandshakeState::Failed => {
                Err(Error::ConnectionClosed)
            }
            _ => Err(Error::NotConnected),
        }
    }

    fn make_progress(&mut self, now: Instant) -> Result<(), Error> {
        loop {
            let prev_state = self.state;

            let new_state = prev_state.make_progress(self, now)?;
            if prev_state != new_state {
                self.state = new_state;
                trace!("{:?} -> {:?}", prev_state, new_state);
            } else {
                break;
            }
        }
        Ok(())
    }

    fn ingest(&mut self, packet: &[u8], now: Instant) -> Result<(), Error> {
        let mut records = Vec::new();
        self.record.decode_inbound(packet, &mut records);

        for record in records {
            if self.state.is_terminal() {
                break;
            }

            if record.sequence.epoch >= 1 {
                self.last_activity = now;
            }

            match record.content_type {
                ContentType::Handshake => self.ingest_handshake(&record, now),
                ContentType::Alert => self.ingest_alert(&record)?,
                ContentType::ApplicationData => self.ingest_application_data(record),
                ContentType::Unknown(_) => {}
            }
        }

        Ok(())
    }

    fn ingest_handshake(&mut self, record: &Record, now: Instant) {
        let epoch = record.sequence.epoch;

        if self.role == Role::Server
            && self.state == HandshakeState::AwaitingClientHello
            && epoch == 0
        {
            self.record
                .align_send_sequence(record.sequence.sequence_number);
        }

        let mut input = &record.payload[..];

        while !input.is_empty() {
            let (rest, (header, fragment)) = match Header::parse_fragment(input) {
                Ok(v) => v,
                Err(_) => {
                    trace!("Malformed handshake fragment in {}", record.sequence);
                    self.drop_record(DropReason::Malformed);
                    return;
                }
            };
            input = rest;

            // Finished is the only message protected by keys.
            let protected = header.msg_type == MessageType::Finished;
            if protected != (epoch >= 1) {
                trace!("Drop {:?} in epoch {}", header.msg_type, epoch);
                self.drop_record(DropReason::Malformed);
                continue;
            }

            if let Some(next) = self.recv_message_seq {
                if header.message_seq < next {
                    trace!(
                        "Retransmitted {:?} message_seq {}",
                        header.msg_type,
                        header.message_seq
                    );
                    self.peer_retransmitted = true;
                    continue;
                }
                if (header.message_seq - next) as usize >= self.config.max_queue_rx() {
                    trace!("Drop {:?} too far ahead", header.msg_type);
                    self.drop_record(DropReason::ResourceLimit);
                    continue;
                }
            }

            if !self.state.is_handshaking() {
                continue;
            }

            match self.reassembler.insert(&header, fragment, now) {
                Insert::Stored => {}
                Insert::Duplicate => self.peer_retransmitted = true,
                Insert::Rejected => self.drop_record(DropReason::ResourceLimit),
            }
        }
    }

    fn ingest_alert(&mut self, record: &Record) -> Result<(), Error> {
        if record.sequence.epoch == 0 {
            trace!("Ignore unauthenticated alert");
            return Ok(());
        }

        let alert = match Alert::parse(&record.payload) {
            Ok((_, alert)) => alert,
            Err(_) => {
                self.drop_record(DropReason::Malformed);
                return Ok(());
            }
        };

        if alert.is_close_notify() {
            match self.state {
                HandshakeState::Closing => {
                    debug!("Peer acknowledged close");
                    self.enter_closed(CloseReason::Acknowledged);
                }
                HandshakeState::Established
                | HandshakeState::Negotiating
                | HandshakeState::AwaitingFinished => {
                    debug!("Peer closed connection");
                    if let Err(e) = self.send_alert(Alert::close_notify()) {
                        debug!("Failed to queue close_notify: {}", e);
                    }
                    self.enter_closed(CloseReason::PeerClosed);
                }
                _ => {}
            }
            return Ok(());
        }

        if alert.level == AlertLevel::Fatal {
            return Err(Error::SecurityError(format!(
                "Fatal alert from peer: {:?}",
                alert.description
            )));
        }

        trace!("Ignore alert {:?}", alert);
        Ok(())
    }

    fn ingest_application_data(&mut self, record: Record) {
        if record.sequence.epoch == 0 {
            trace!("Drop plaintext application data");
            self.drop_record(DropReason::Malformed);
            return;
        }

        let limit = self.config.max_queue_rx();

        match self.state {
            HandshakeState::Established | HandshakeState::Closing => {
                if self.queue_rx.len() >= limit {
                    warn!("Receive queue full (max {}): {:?}", limit, self.queue_rx);
                    self.drop_record(DropReason::ResourceLimit);
                    return;
                }
                self.queue_rx.push_back(record.payload);
            }
            HandshakeState::Negotiating | HandshakeState::AwaitingFinished => {
                if self.early_data.len() >= limit {
                    self.drop_record(DropReason::ResourceLimit);
                    return;
                }
                trace!("Hold application data until the handshake completes");
                self.early_data.push_back(record.payload);
            }
            _ => trace!("Ignore application data in {:?}", self.state),
        }
    }

    /// The next handshake message in sequence, if it is complete and one of `accept`.
    ///
    /// Messages of another type are discarded without moving the sequence.
    fn next_handshake(&mut self, accept: &[MessageType]) -> Result<Option<(u16, Body)>, Error> {
        let Some(seq) = self.recv_message_seq.or_else(|| self.reassembler.first_seq()) else {
            return Ok(None);
        };

        let Some((msg_type, body)) = self.reassembler.take_complete(seq) else {
            return Ok(None);
        };

        if !accept.contains(&msg_type) {
            trace!(
                "Discard {:?} (message_seq {}) in {:?}",
                msg_type,
                seq,
                self.state
            );
            return Ok(None);
        }

        let parsed = match Body::parse(msg_type, &body) {
            Ok(b) => b,
            Err(e) => {
                trace!("Discard malformed {:?}: {}", msg_type, e);
                self.drop_record(DropReason::Malformed);
                return Ok(None);
            }
        };

        let next = seq
            .checked_add(1)
            .ok_or_else(|| Error::UnexpectedMessage("message_seq exhausted".to_string()))?;
        self.recv_message_seq = Some(next);
        self.reassembler.discard_below(next);

        Ok(Some((seq, parsed)))
    }

    fn begin_flight(&mut self, number: u8, now: Instant, retransmit: bool) {
        self.flight.begin(number, now, retransmit);
        self.flight_sent_in_datagram = true;
        self.config.stats().record(Stat::FlightSent);
    }

    /// Send a handshake message as part of the current flight.
    fn send_handshake(&mut self, msg_type: MessageType, body: &[u8]) -> Result<(), Error> {
        let message_seq = self.send_message_seq;
        self.send_message_seq = message_seq
            .checked_add(1)
            .ok_or_else(|| Error::UnexpectedMessage("message_seq exhausted".to_string()))?;

        let epoch = self.record.send_epoch();
        let records = self.record.encode_outbound(
            epoch,
            Outbound::Handshake {
                msg_type,
                message_seq,
                body,
            },
        )?;

        self.flight.push(Entry {
            epoch,
            content: SavedContent::Handshake {
                msg_type,
                message_seq,
                body: Buf::from_slice(body),
            },
        });

        self.enqueue(&records)
    }

    /// Alert outside any flight.
    fn send_alert(&mut self, alert: Alert) -> Result<(), Error> {
        let epoch = self.record.send_epoch();
        let records = self.record.encode_outbound(epoch, Outbound::Alert(alert))?;
        self.enqueue(&records)
    }

    fn resend_flight(&mut self) -> Result<(), Error> {
        let mtu = self.config.mtu();
        let max_queue_tx = self.config.max_queue_tx();

        for entry in self.flight.entries() {
            if !self.record.has_send_epoch(entry.epoch) {
                trace!("Skip flight entry of retired epoch {}", entry.epoch);
                continue;
            }

            let content = match &entry.content {
                SavedContent::Handshake {
                    msg_type,
                    message_seq,
                    body,
                } => Outbound::Handshake {
                    msg_type: *msg_type,
                    message_seq: *message_seq,
                    body,
                },
                SavedContent::Alert(alert) => Outbound::Alert(*alert),
            };

            for record in self.record.encode_outbound(entry.epoch, content)? {
                self.queue_tx.push_record(&record, mtu, max_queue_tx)?;
            }
        }

        Ok(())
    }

    fn enqueue(&mut self, records: &[Buf]) -> Result<(), Error> {
        let mtu = self.config.mtu();
        let max_queue_tx = self.config.max_queue_tx();
        for record in records {
            self.queue_tx.push_record(record, mtu, max_queue_tx)?;
        }
        Ok(())
    }

    /// Bookkeeping when the handshake completes.
    fn establish(&mut self, now: Instant) {
        debug!("Handshake with {} complete", self.peer);
        self.last_activity = now;
        self.local_events.push_back(LocalEvent::Connected);
        self.config.stats().record(Stat::HandshakeCompleted);
        self.queue_rx.extend(self.early_data.drain(..));
        self.secrets = None;
    }

    fn enter_closed(&mut self, reason: CloseReason) {
        trace!("{:?} -> {:?}", self.state, HandshakeState::Closed);
        self.state = HandshakeState::Closed;
        self.flight.clear();
        self.linger_deadline = None;
        self.local_events.push_back(LocalEvent::Closed(reason));
        self.config.stats().record(Stat::ConnectionClosed);
    }

    fn fail(&mut self, error: &Error) {
        if self.state.is_terminal() {
            return;
        }

        debug!(
            "Connection to {} failed in {:?}: {}",
            self.peer, self.state, error
        );
        if self.state.is_handshaking() {
            self.config.stats().record(Stat::HandshakeFailed);
        }

        self.state = HandshakeState::Failed;
        self.flight.clear();
        self.queue_tx.clear();
        self.early_data.clear();
    }

    fn drop_record(&self, reason: DropReason) {
        self.config.stats().record(Stat::RecordDropped(reason));
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("record", &self.record)
            .field("flight", &self.flight.number())
            .field("queue_tx", &self.queue_tx)
            .finish_non_exhaustive()
    }
}
