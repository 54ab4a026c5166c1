//! Handshake tests.

use std::time::{Duration, Instant};

use dgtls::{Error, Event, HandshakeState, Stat};

use crate::common::*;

#[test]
fn handshake_without_cookie() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (config, stats) = counted_config(|b| b);
    let (mut client, mut server) = new_pair(&config, now);

    let ch = drain_outputs(&mut client);
    assert_eq!(ch.packets.len(), 1);
    assert_eq!(count_client_hellos(&ch.packets), 1);
    deliver_packets(&ch.packets, &mut server, now);
    assert_eq!(server.state(), HandshakeState::AwaitingFinished);

    // ServerHello and Finished travel in one datagram.
    let f4 = drain_outputs(&mut server);
    assert_eq!(f4.packets.len(), 1);
    let records = split_records(&f4.packets[0]);
    assert_eq!(records.len(), 2);
    assert_eq!(record_epoch(&records[0]), 0);
    assert_eq!(record_epoch(&records[1]), 1);

    deliver_packets(&f4.packets, &mut client, now);
    assert_eq!(client.state(), HandshakeState::Established);

    let f5 = drain_outputs(&mut client);
    assert!(f5.connected);
    assert_eq!(f5.packets.len(), 1);
    deliver_packets(&f5.packets, &mut server, now);
    assert_eq!(server.state(), HandshakeState::Established);
    assert!(drain_outputs(&mut server).connected);

    assert_eq!(client.epoch(), 1);
    assert_eq!(server.epoch(), 1);
    assert_eq!(stats.get(Stat::HandshakeCompleted), 2);
    assert_eq!(stats.get(Stat::Retransmission), 0);
}

#[test]
fn established_has_no_flight_timer() {
    let now = Instant::now();
    let config = config();
    let (mut client, mut server) = established_pair(&config, now);

    // Only the idle timer remains.
    let idle = now + config.idle_timeout();
    assert_eq!(client.timeout(), Some(idle));
    assert_eq!(server.timeout(), Some(idle));
    assert!(collect_packets(&mut client).is_empty());
    assert!(collect_packets(&mut server).is_empty());
}

#[test]
fn psk_mismatch_fails_finished() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let client_config = config_with(|b| b.psk(b"left"));
    let server_config = config_with(|b| b.psk(b"right"));

    let mut rng_c = dgtls::SeededRandom::new(1);
    let mut rng_s = dgtls::SeededRandom::new(2);
    let mut client =
        dgtls::Connection::new_client(client_config, server_addr(), now, &mut rng_c).unwrap();
    let mut server =
        dgtls::Connection::new_server(server_config, client_addr(), now, &mut rng_s).unwrap();

    deliver_packets(&collect_packets(&mut client), &mut server, now);
    let f4 = collect_packets(&mut server);

    let mut result = Ok(());
    for p in &f4 {
        result = client.handle_packet(p, now);
    }
    // Keys differ, so the server's Finished record never authenticates.
    assert!(result.is_ok());
    assert_eq!(client.state(), HandshakeState::AwaitingFinished);

    // The handshake runs out of time instead.
    let r = client.handle_timeout(now + Duration::from_secs(41));
    assert!(matches!(r, Err(Error::Timeout("handshake"))));
    assert_eq!(client.state(), HandshakeState::Failed);
}

#[test]
fn matching_psk_connects() {
    let now = Instant::now();
    let config = config_with(|b| b.psk(b"shared secret"));
    let (client, server) = established_pair(&config, now);
    assert_eq!(client.state(), HandshakeState::Established);
    assert_eq!(server.state(), HandshakeState::Established);
}

#[test]
fn engine_cookie_exchange_sends_two_client_hellos() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (config, stats) = counted_config(|b| b);
    let mut client = new_engine(&config, 1, now);
    let mut server = new_engine(&config, 2, now);

    client.start_connection(server_addr(), now).unwrap();

    let mut client_packets = Vec::new();
    for _ in 0..10 {
        client_packets.extend(client.io().sent.iter().map(|(_, p)| p.clone()));
        pump(&mut client, client_addr(), &mut server, now, &mut |_| true);
        pump(&mut server, server_addr(), &mut client, now, &mut |_| true);
    }

    assert_eq!(count_client_hellos(&client_packets), 2);
    assert_eq!(stats.get(Stat::CookieIssued), 1);
    assert_eq!(client.state(server_addr()), Some(HandshakeState::Established));
    assert_eq!(server.state(client_addr()), Some(HandshakeState::Established));

    assert!(matches!(
        client.poll_event(),
        Some(Event::Connected { peer }) if peer == server_addr()
    ));
    assert!(matches!(
        server.poll_event(),
        Some(Event::Connected { peer }) if peer == client_addr()
    ));
}

#[test]
fn engine_start_is_idempotent() {
    let now = Instant::now();
    let config = config();
    let mut client = new_engine(&config, 1, now);

    client.start_connection(server_addr(), now).unwrap();
    client.start_connection(server_addr(), now).unwrap();

    assert_eq!(client.connection_count(), 1);
    assert_eq!(client.io().sent.len(), 1);
}

#[test]
fn engine_without_cookie_accepts_directly() {
    let now = Instant::now();
    let (config, stats) = counted_config(|b| b.require_cookie(false));
    let mut client = new_engine(&config, 1, now);
    let mut server = new_engine(&config, 2, now);

    client.start_connection(server_addr(), now).unwrap();
    for _ in 0..5 {
        pump(&mut client, client_addr(), &mut server, now, &mut |_| true);
        pump(&mut server, server_addr(), &mut client, now, &mut |_| true);
    }

    assert_eq!(stats.get(Stat::CookieIssued), 0);
    assert_eq!(client.state(server_addr()), Some(HandshakeState::Established));
    assert_eq!(server.state(client_addr()), Some(HandshakeState::Established));
}
