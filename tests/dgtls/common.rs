//! Shared helpers for the integration tests.

#![allow(unused)]

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dgtls::{
    CloseReason, Config, ConfigBuilder, Connection, CountingStats, DatagramIo, Engine,
    HandshakeState, Output, Received, SeededRandom,
};

pub const CLIENT_ADDR: ([u8; 4], u16) = ([10, 0, 0, 1], 5000);
pub const SERVER_ADDR: ([u8; 4], u16) = ([10, 0, 0, 2], 4433);

pub fn client_addr() -> SocketAddr {
    SocketAddr::from(CLIENT_ADDR)
}

pub fn server_addr() -> SocketAddr {
    SocketAddr::from(SERVER_ADDR)
}

/// Collected outputs from polling an endpoint to `Timeout`.
#[derive(Default, Debug)]
pub struct DrainedOutputs {
    pub packets: Vec<Vec<u8>>,
    pub connected: bool,
    pub app_data: Vec<Vec<u8>>,
    pub closed: Option<CloseReason>,
    pub timeout: Option<Instant>,
}

/// Poll until `Timeout`, collecting only packets.
pub fn collect_packets(endpoint: &mut Connection) -> Vec<Vec<u8>> {
    drain_outputs(endpoint).packets
}

/// Poll until `Timeout`, collecting everything.
pub fn drain_outputs(endpoint: &mut Connection) -> DrainedOutputs {
    let mut result = DrainedOutputs::default();
    let mut buf = vec![0u8; 2048];
    loop {
        match endpoint.poll_output(&mut buf) {
            Output::Packet(p) => result.packets.push(p.to_vec()),
            Output::Connected => result.connected = true,
            Output::ApplicationData(data) => result.app_data.push(data.to_vec()),
            Output::Closed(reason) => result.closed = Some(reason),
            Output::Timeout(t) => {
                result.timeout = Some(t);
                break;
            }
        }
    }
    result
}

/// Deliver a slice of packets to a destination endpoint.
pub fn deliver_packets(packets: &[Vec<u8>], dest: &mut Connection, now: Instant) {
    for p in packets {
        // Failures are asserted through the state where they matter.
        let _ = dest.handle_packet(p, now);
    }
}

/// Advance time to the endpoint's next deadline and fire it.
pub fn trigger_timeout(ep: &mut Connection, now: &mut Instant) {
    let at = ep.timeout().expect("endpoint has a timer");
    *now = (*now).max(at);
    ep.handle_timeout(*now).expect("handle_timeout");
}

pub fn config() -> Arc<Config> {
    Arc::new(Config::builder().build().expect("default config"))
}

pub fn config_with(f: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Arc<Config> {
    Arc::new(f(Config::builder()).build().expect("config"))
}

/// Config reporting into fresh counters.
pub fn counted_config(
    f: impl FnOnce(ConfigBuilder) -> ConfigBuilder,
) -> (Arc<Config>, Arc<CountingStats>) {
    let stats = Arc::new(CountingStats::new());
    let config = config_with(|b| f(b).with_stats_sink(stats.clone()));
    (config, stats)
}

pub fn new_pair(config: &Arc<Config>, now: Instant) -> (Connection, Connection) {
    let mut rng_c = SeededRandom::new(1);
    let mut rng_s = SeededRandom::new(2);
    let client = Connection::new_client(config.clone(), server_addr(), now, &mut rng_c)
        .expect("client");
    let server = Connection::new_server(config.clone(), client_addr(), now, &mut rng_s)
        .expect("server");
    (client, server)
}

/// Exchange packets without loss until both sides are established.
pub fn complete_handshake(client: &mut Connection, server: &mut Connection, now: Instant) {
    for _ in 0..10 {
        let c = drain_outputs(client);
        deliver_packets(&c.packets, server, now);
        let s = drain_outputs(server);
        deliver_packets(&s.packets, client, now);

        if client.state() == HandshakeState::Established
            && server.state() == HandshakeState::Established
        {
            // Drain the Connected events and the client's last flight.
            let c = drain_outputs(client);
            deliver_packets(&c.packets, server, now);
            drain_outputs(server);
            return;
        }
    }
    panic!(
        "Handshake did not complete: client {:?}, server {:?}",
        client.state(),
        server.state()
    );
}

/// An established pair.
pub fn established_pair(config: &Arc<Config>, now: Instant) -> (Connection, Connection) {
    let (mut client, mut server) = new_pair(config, now);
    complete_handshake(&mut client, &mut server, now);
    (client, server)
}

/// One wire record.
pub fn record(content_type: u8, epoch: u16, seq: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![content_type, 0xFE, 0xFD];
    out.extend_from_slice(&epoch.to_be_bytes());
    out.extend_from_slice(&seq.to_be_bytes()[2..]);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// One handshake fragment with its 12 byte header.
pub fn handshake_fragment(
    msg_type: u8,
    length: usize,
    message_seq: u16,
    offset: usize,
    body: &[u8],
) -> Vec<u8> {
    let mut out = vec![msg_type];
    out.extend_from_slice(&(length as u32).to_be_bytes()[1..]);
    out.extend_from_slice(&message_seq.to_be_bytes());
    out.extend_from_slice(&(offset as u32).to_be_bytes()[1..]);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(body);
    out
}

/// Split a datagram into its records.
pub fn split_records(datagram: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = datagram;
    while rest.len() >= 13 {
        let len = u16::from_be_bytes([rest[11], rest[12]]) as usize;
        out.push(rest[..13 + len].to_vec());
        rest = &rest[13 + len..];
    }
    out
}

pub fn record_epoch(record: &[u8]) -> u16 {
    u16::from_be_bytes([record[3], record[4]])
}

pub fn record_seq(record: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b[2..].copy_from_slice(&record[5..11]);
    u64::from_be_bytes(b)
}

/// Handshake type of the first fragment of a plaintext handshake record.
pub fn handshake_type(record: &[u8]) -> Option<u8> {
    (record[0] == 22 && record_epoch(record) == 0).then(|| record[13])
}

/// Number of plaintext ClientHello records in `packets`.
pub fn count_client_hellos(packets: &[Vec<u8>]) -> usize {
    packets
        .iter()
        .flat_map(|p| split_records(p))
        .filter(|r| handshake_type(r) == Some(1))
        .count()
}

/// In-memory transport. Sent datagrams are collected, received ones are
/// served from `inbox`.
#[derive(Debug, Default)]
pub struct MemoryIo {
    pub sent: Vec<(SocketAddr, Vec<u8>)>,
    pub inbox: VecDeque<(SocketAddr, Vec<u8>)>,
    /// Report `Stopped` once the inbox is empty.
    pub stop_when_empty: bool,
}

impl DatagramIo for MemoryIo {
    fn send(&mut self, peer: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        self.sent.push((peer, bytes.to_vec()));
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], _deadline: Option<Instant>) -> io::Result<Received> {
        match self.inbox.pop_front() {
            Some((peer, data)) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(Received::Datagram {
                    peer,
                    len: data.len(),
                })
            }
            None if self.stop_when_empty => Ok(Received::Stopped),
            None => Ok(Received::Timeout),
        }
    }
}

pub fn new_engine(config: &Arc<Config>, seed: u64, now: Instant) -> Engine<MemoryIo> {
    Engine::new(
        config.clone(),
        MemoryIo::default(),
        Box::new(SeededRandom::new(seed)),
        now,
    )
    .expect("engine")
}

/// Move every datagram `from` sent into `to`, letting `keep` decide which
/// survive. Returns how many were moved, dropped ones included.
pub fn pump(
    from: &mut Engine<MemoryIo>,
    from_addr: SocketAddr,
    to: &mut Engine<MemoryIo>,
    now: Instant,
    keep: &mut dyn FnMut(&[u8]) -> bool,
) -> usize {
    let sent: Vec<_> = from.io_mut().sent.drain(..).collect();
    let n = sent.len();
    for (_, datagram) in sent {
        if keep(&datagram) {
            to.handle_datagram(now, from_addr, &datagram);
        }
    }
    n
}
