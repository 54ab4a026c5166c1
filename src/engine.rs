//! The run-loop.
//!
//! An [`Engine`] owns every [`Connection`] of one datagram endpoint, keyed by
//! peer address. It answers unknown ClientHellos with a stateless
//! HelloVerifyRequest, creates server connections only for validated
//! cookies, multiplexes all connection timers through one
//! [`RetransmissionScheduler`], and rotates the cookie secret on the same
//! loop.
//!
//! Everything happens on the caller's thread. [`Engine::run`] blocks;
//! [`Engine::handle_datagram`], [`Engine::handle_timeout`] and
//! [`Engine::poll_timeout`] expose the same loop one step at a time.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::Buf;
use crate::connection::{CloseReason, Connection, HandshakeState, Role};
use crate::cookie::CookieManager;
use crate::io::{DatagramIo, Received};
use crate::message::{ClientHello, Cookie, Header, HelloVerifyRequest, MessageType};
use crate::record::RecordHeader;
use crate::rng::RandomSource;
use crate::scheduler::RetransmissionScheduler;
use crate::stats::{DropReason, Stat};
use crate::types::{ContentType, ProtocolVersion, Sequence};
use crate::{Config, Error, Output};

/// Largest datagram or record payload handled.
const MAX_DATAGRAM: usize = 65_535;

/// What happened to a connection, in the order it happened.
#[derive(Debug)]
pub enum Event {
    /// Handshake completed.
    Connected { peer: SocketAddr },
    /// Application data received.
    Data { peer: SocketAddr, data: Vec<u8> },
    /// The connection failed and was removed.
    Failed { peer: SocketAddr, error: Error },
    /// The connection closed and was removed.
    Closed {
        peer: SocketAddr,
        reason: CloseReason,
    },
}

pub struct Engine<T: DatagramIo> {
    config: Arc<Config>,
    io: T,
    rng: Box<dyn RandomSource>,
    cookies: CookieManager,
    connections: HashMap<SocketAddr, Connection>,
    scheduler: RetransmissionScheduler,
    events: VecDeque<Event>,
    recv_buf: Vec<u8>,
    out_buf: Vec<u8>,
}

impl<T: DatagramIo> Engine<T> {
    /// Create an engine over `io`.
    ///
    /// Draws the first cookie secret, so a failing random source stops
    /// here rather than in the run-loop.
    pub fn new(
        config: Arc<Config>,
        io: T,
        mut rng: Box<dyn RandomSource>,
        now: Instant,
    ) -> Result<Self, Error> {
        let cookies = CookieManager::new(config.cookie_rotation_interval(), rng.as_mut(), now)?;

        Ok(Engine {
            config,
            io,
            rng,
            cookies,
            connections: HashMap::new(),
            scheduler: RetransmissionScheduler::new(),
            events: VecDeque::new(),
            recv_buf: vec![0; MAX_DATAGRAM],
            out_buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn io(&self) -> &T {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut T {
        &mut self.io
    }

    /// Begin an outbound handshake.
    ///
    /// Does nothing if a live connection to `peer` exists.
    pub fn start_connection(&mut self, peer: SocketAddr, now: Instant) -> Result<(), Error> {
        if self.connections.contains_key(&peer) {
            trace!("Connection to {} already exists", peer);
            return Ok(());
        }

        if self.connections.len() >= self.config.max_connections() {
            warn!("Connection limit {} reached", self.config.max_connections());
            return Err(Error::ConnectionLimit);
        }

        debug!("Start connection to {}", peer);
        let conn = Connection::new_client(self.config.clone(), peer, now, self.rng.as_mut())?;
        self.connections.insert(peer, conn);
        self.flush(peer);

        Ok(())
    }

    /// Route one received datagram.
    pub fn handle_datagram(&mut self, now: Instant, from: SocketAddr, datagram: &[u8]) {
        if let Some(conn) = self.connections.get_mut(&from) {
            if let Err(error) = conn.handle_packet(datagram, now) {
                self.events.push_back(Event::Failed { peer: from, error });
            }
            self.flush(from);
            return;
        }

        // A connection created here counts the datagram itself.
        if !self.accept(now, from, datagram) {
            self.config.stats().record(Stat::PacketReceived);
        }
    }

    /// A datagram from a peer without connection. Returns whether a new
    /// connection took it.
    fn accept(&mut self, now: Instant, from: SocketAddr, datagram: &[u8]) -> bool {
        let Some(hello) = peek_client_hello(datagram) else {
            trace!("Drop datagram from unknown peer {}", from);
            self.drop_datagram(DropReason::Malformed);
            return false;
        };

        if self.config.require_cookie() {
            let Some(client_hello) = &hello.client_hello else {
                // A fragmented ClientHello cannot be checked without state.
                trace!("Drop fragmented ClientHello from {}", from);
                self.drop_datagram(DropReason::ResourceLimit);
                return false;
            };

            let extra = client_hello.random.as_bytes();
            if !self.cookies.validate(from, extra, &client_hello.cookie) {
                self.send_hello_verify(from, &hello, extra);
                return false;
            }
        }

        if self.connections.len() >= self.config.max_connections() {
            warn!("Drop ClientHello from {}: {}", from, Error::ConnectionLimit);
            self.drop_datagram(DropReason::ResourceLimit);
            return false;
        }

        if self.half_open() >= self.config.max_half_open() {
            warn!("Drop ClientHello from {}: {}", from, Error::HalfOpenLimit);
            self.drop_datagram(DropReason::ResourceLimit);
            return false;
        }

        debug!("Accept connection from {}", from);
        let mut conn = match Connection::new_server(self.config.clone(), from, now, self.rng.as_mut())
        {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to create connection for {}: {}", from, e);
                return false;
            }
        };

        let result = conn.handle_packet(datagram, now);
        self.connections.insert(from, conn);
        if let Err(error) = result {
            self.events.push_back(Event::Failed { peer: from, error });
        }
        self.flush(from);
        true
    }

    /// Answer with a cookie. Nothing is remembered about `peer`.
    fn send_hello_verify(&mut self, peer: SocketAddr, hello: &PeekedHello, extra: &[u8]) {
        let cookie = match self.cookies.issue(peer, extra) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to issue cookie: {}", e);
                return;
            }
        };

        debug!("Send HelloVerifyRequest to {}", peer);
        let datagram = hello_verify_datagram(hello.sequence, hello.message_seq, cookie);
        if let Err(e) = self.io.send(peer, &datagram) {
            debug!("Failed to send to {}: {}", peer, e);
        }
        self.config.stats().record(Stat::CookieIssued);
        self.config.stats().record(Stat::PacketSent);
    }

    fn half_open(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.role() == Role::Server && c.state().is_handshaking())
            .count()
    }

    /// Fire due connection timers and rotate the cookie secret.
    pub fn handle_timeout(&mut self, now: Instant) {
        match self.cookies.maybe_rotate(now, self.rng.as_mut()) {
            Ok(true) => self.config.stats().record(Stat::CookieRotated),
            Ok(false) => {}
            Err(e) => warn!("Cookie rotation failed, keeping secret: {}", e),
        }

        for peer in self.scheduler.pop_expired(now) {
            let Some(conn) = self.connections.get_mut(&peer) else {
                continue;
            };
            if let Err(error) = conn.handle_timeout(now) {
                self.events.push_back(Event::Failed { peer, error });
            }
            self.flush(peer);
        }
    }

    /// The nearest instant [`handle_timeout`](Self::handle_timeout) has work.
    pub fn poll_timeout(&mut self) -> Instant {
        let rotation = self.cookies.next_rotation();
        match self.scheduler.next_deadline() {
            Some(at) => at.min(rotation),
            None => rotation,
        }
    }

    /// Wait for one datagram or the nearest deadline and handle it.
    ///
    /// Returns `false` once the transport stopped.
    pub fn run_once(&mut self) -> Result<bool, Error> {
        let deadline = self.poll_timeout();

        let mut buf = std::mem::take(&mut self.recv_buf);
        let received = self.io.receive(&mut buf, Some(deadline));
        let now = Instant::now();

        let keep_running = match received {
            Ok(Received::Datagram { peer, len }) => {
                self.handle_datagram(now, peer, &buf[..len]);
                true
            }
            Ok(Received::Timeout) => true,
            Ok(Received::Stopped) => false,
            Err(e) => {
                self.recv_buf = buf;
                return Err(e.into());
            }
        };
        self.recv_buf = buf;

        if keep_running {
            self.handle_timeout(now);
        }
        Ok(keep_running)
    }

    /// Run until the transport stops.
    pub fn run(&mut self) -> Result<(), Error> {
        while self.run_once()? {}
        debug!("Engine stopped");
        Ok(())
    }

    /// Send application data on an established connection.
    pub fn send(&mut self, peer: SocketAddr, data: &[u8]) -> Result<(), Error> {
        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(Error::NotConnected)?;
        conn.send_application_data(data)?;
        self.flush(peer);
        Ok(())
    }

    /// Start closing the connection to `peer`.
    pub fn close(&mut self, peer: SocketAddr, now: Instant) -> Result<(), Error> {
        let conn = self
            .connections
            .get_mut(&peer)
            .ok_or(Error::NotConnected)?;
        conn.close(now)?;
        self.flush(peer);
        Ok(())
    }

    /// Move the send side of the connection to `peer` to a new epoch.
    pub fn rekey(&mut self, peer: SocketAddr) -> Result<u16, Error> {
        self.connections
            .get_mut(&peer)
            .ok_or(Error::NotConnected)?
            .rekey()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn state(&self, peer: SocketAddr) -> Option<HandshakeState> {
        self.connections.get(&peer).map(|c| c.state())
    }

    pub fn connection(&self, peer: SocketAddr) -> Option<&Connection> {
        self.connections.get(&peer)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Drain a connection's output, then reap it or reschedule its timer.
    fn flush(&mut self, peer: SocketAddr) {
        let Some(conn) = self.connections.get_mut(&peer) else {
            return;
        };

        loop {
            match conn.poll_output(&mut self.out_buf) {
                Output::Packet(p) => {
                    if let Err(e) = self.io.send(peer, p) {
                        debug!("Failed to send to {}: {}", peer, e);
                    }
                }
                Output::Connected => self.events.push_back(Event::Connected { peer }),
                Output::ApplicationData(data) => self.events.push_back(Event::Data {
                    peer,
                    data: data.to_vec(),
                }),
                Output::Closed(reason) => self.events.push_back(Event::Closed { peer, reason }),
                Output::Timeout(_) => break,
            }
        }

        if conn.state().is_terminal() {
            debug!("Remove connection to {} ({:?})", peer, conn.state());
            self.connections.remove(&peer);
            self.scheduler.cancel(peer);
            return;
        }

        match conn.timeout() {
            Some(at) => self.scheduler.schedule(peer, at),
            None => self.scheduler.cancel(peer),
        }
    }

    fn drop_datagram(&self, reason: DropReason) {
        self.config.stats().record(Stat::RecordDropped(reason));
    }
}

struct PeekedHello {
    sequence: Sequence,
    message_seq: u16,
    /// `None` when the first record only holds a fragment.
    client_hello: Option<ClientHello>,
}

/// The ClientHello opening `datagram`, if it starts with one.
fn peek_client_hello(datagram: &[u8]) -> Option<PeekedHello> {
    let (_, (record, payload)) = RecordHeader::parse_record(datagram).ok()?;
    if record.content_type != ContentType::Handshake
        || record.version != ProtocolVersion::V1
        || record.sequence.epoch != 0
    {
        return None;
    }

    let (_, (header, fragment)) = Header::parse_fragment(payload).ok()?;
    if header.msg_type != MessageType::ClientHello {
        return None;
    }

    let client_hello = if header.is_fragment() {
        None
    } else {
        Some(ClientHello::parse(fragment).ok()?.1)
    };

    Some(PeekedHello {
        sequence: record.sequence,
        message_seq: header.message_seq,
        client_hello,
    })
}

/// HelloVerifyRequest echoing the record and message sequence of the ClientHello.
fn hello_verify_datagram(sequence: Sequence, message_seq: u16, cookie: Cookie) -> Buf {
    let mut body = Buf::new();
    HelloVerifyRequest::new(cookie).serialize(&mut body);

    let mut payload = Buf::new();
    Header::whole(MessageType::HelloVerifyRequest, message_seq, body.len() as u32)
        .serialize(&mut payload);
    payload.extend_from_slice(&body);

    let header = RecordHeader {
        content_type: ContentType::Handshake,
        version: ProtocolVersion::V1,
        sequence,
        length: payload.len() as u16,
    };

    let mut datagram = Buf::new();
    header.serialize(&mut datagram);
    datagram.extend_from_slice(&payload);
    datagram
}
