//! Engine run-loop tests.

use std::net::SocketAddr;
use std::time::Instant;

use dgtls::{CloseReason, DropReason, Error, Event, HandshakeState, Stat};

use crate::common::*;

#[test]
fn handshake_with_every_third_packet_lost() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let config = config();
    let mut client = new_engine(&config, 1, now);
    let mut server = new_engine(&config, 2, now);

    client.start_connection(server_addr(), now).unwrap();

    let mut counter = 0;
    let mut every_third = |_: &[u8]| {
        counter += 1;
        counter % 3 != 0
    };

    for _ in 0..100 {
        let moved = pump(&mut client, client_addr(), &mut server, now, &mut every_third)
            + pump(&mut server, server_addr(), &mut client, now, &mut every_third);

        if client.state(server_addr()) == Some(HandshakeState::Established)
            && server.state(client_addr()) == Some(HandshakeState::Established)
        {
            break;
        }

        if moved == 0 {
            now = client.poll_timeout().min(server.poll_timeout());
            client.handle_timeout(now);
            server.handle_timeout(now);
        }
    }

    assert_eq!(client.state(server_addr()), Some(HandshakeState::Established));
    assert_eq!(server.state(client_addr()), Some(HandshakeState::Established));
    assert!(counter >= 3, "some packets were dropped");
}

#[test]
fn replayed_finished_is_dropped() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (config, stats) = counted_config(|b| b);
    let mut client = new_engine(&config, 1, now);
    let mut server = new_engine(&config, 2, now);

    client.start_connection(server_addr(), now).unwrap();

    let mut last_from_client = None;
    for _ in 0..5 {
        if let Some((_, p)) = client.io().sent.last() {
            last_from_client = Some(p.clone());
        }
        pump(&mut client, client_addr(), &mut server, now, &mut |_| true);
        pump(&mut server, server_addr(), &mut client, now, &mut |_| true);
    }
    assert_eq!(server.state(client_addr()), Some(HandshakeState::Established));

    let finished = last_from_client.unwrap();
    let epoch_before = server.connection(client_addr()).unwrap().peer_epoch();
    let drops_before = stats.get(Stat::RecordDropped(DropReason::BadAuthOrReplay));

    for _ in 0..100 {
        server.handle_datagram(now, client_addr(), &finished);
    }

    let conn = server.connection(client_addr()).unwrap();
    assert_eq!(conn.state(), HandshakeState::Established);
    assert_eq!(conn.peer_epoch(), epoch_before);
    assert_eq!(
        stats.get(Stat::RecordDropped(DropReason::BadAuthOrReplay)) - drops_before,
        100
    );
    assert!(server.io().sent.is_empty());
}

#[test]
fn garbage_from_unknown_peer_creates_nothing() {
    let now = Instant::now();
    let (config, stats) = counted_config(|b| b);
    let mut server = new_engine(&config, 2, now);

    server.handle_datagram(now, client_addr(), &[0xFF; 50]);
    server.handle_datagram(now, client_addr(), &[]);

    // A well formed record that is not a ClientHello.
    let alert = record(21, 0, 0, &[2, 40]);
    server.handle_datagram(now, client_addr(), &alert);

    assert_eq!(server.connection_count(), 0);
    assert!(server.io().sent.is_empty());
    assert_eq!(stats.get(Stat::RecordDropped(DropReason::Malformed)), 3);
}

#[test]
fn each_received_datagram_counted_once() {
    let now = Instant::now();
    let (server_config, stats) = counted_config(|b| b);
    let mut client = new_engine(&config(), 1, now);
    let mut server = new_engine(&server_config, 2, now);

    client.start_connection(server_addr(), now).unwrap();
    for _ in 0..5 {
        pump(&mut client, client_addr(), &mut server, now, &mut |_| true);
        pump(&mut server, server_addr(), &mut client, now, &mut |_| true);
    }
    assert_eq!(server.state(client_addr()), Some(HandshakeState::Established));

    // ClientHello, ClientHello with cookie, Finished.
    assert_eq!(stats.get(Stat::PacketReceived), 3);
}

#[test]
fn client_hello_without_cookie_gets_no_state() {
    let now = Instant::now();
    let (config, stats) = counted_config(|b| b);
    let mut client = new_engine(&config, 1, now);
    let mut server = new_engine(&config, 2, now);

    client.start_connection(server_addr(), now).unwrap();
    let hello = client.io().sent[0].1.clone();

    // A flood of first ClientHellos from many addresses.
    for port in 0..50u16 {
        let from = SocketAddr::from(([10, 0, 1, 1], 6000 + port));
        server.handle_datagram(now, from, &hello);
    }

    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.io().sent.len(), 50);
    assert_eq!(stats.get(Stat::CookieIssued), 50);
}

#[test]
fn cookie_for_other_address_is_rejected() {
    let now = Instant::now();
    let config = config();
    let mut client = new_engine(&config, 1, now);
    let mut server = new_engine(&config, 2, now);

    client.start_connection(server_addr(), now).unwrap();
    pump(&mut client, client_addr(), &mut server, now, &mut |_| true);
    pump(&mut server, server_addr(), &mut client, now, &mut |_| true);

    // The ClientHello carrying a valid cookie, replayed from elsewhere.
    let with_cookie = client.io().sent[0].1.clone();
    let elsewhere = SocketAddr::from(([10, 0, 9, 9], 7000));
    server.handle_datagram(now, elsewhere, &with_cookie);

    assert!(server.connection(elsewhere).is_none());
    assert_eq!(server.io().sent.len(), 1, "answered with a fresh cookie");
}

#[test]
fn half_open_limit() {
    let now = Instant::now();
    let (config, stats) = counted_config(|b| b.require_cookie(false).max_half_open(1));
    let mut client = new_engine(&config, 1, now);
    let mut server = new_engine(&config, 2, now);

    client.start_connection(server_addr(), now).unwrap();
    let hello = client.io().sent[0].1.clone();

    let first = SocketAddr::from(([10, 0, 1, 1], 6000));
    let second = SocketAddr::from(([10, 0, 1, 2], 6000));
    server.handle_datagram(now, first, &hello);
    server.handle_datagram(now, second, &hello);

    assert_eq!(server.connection_count(), 1);
    assert!(server.connection(second).is_none());
    assert_eq!(
        stats.get(Stat::RecordDropped(DropReason::ResourceLimit)),
        1
    );
}

#[test]
fn connection_limit() {
    let now = Instant::now();
    let config = config_with(|b| b.max_connections(1));
    let mut client = new_engine(&config, 1, now);

    client.start_connection(server_addr(), now).unwrap();
    let other = SocketAddr::from(([10, 0, 0, 3], 4433));
    let r = client.start_connection(other, now);
    assert!(matches!(r, Err(Error::ConnectionLimit)));
    assert_eq!(client.connection_count(), 1);
}

#[test]
fn application_data_events() {
    let now = Instant::now();
    let config = config();
    let mut client = new_engine(&config, 1, now);
    let mut server = new_engine(&config, 2, now);

    client.start_connection(server_addr(), now).unwrap();
    for _ in 0..5 {
        pump(&mut client, client_addr(), &mut server, now, &mut |_| true);
        pump(&mut server, server_addr(), &mut client, now, &mut |_| true);
    }
    while client.poll_event().is_some() {}
    while server.poll_event().is_some() {}

    client.send(server_addr(), b"ping").unwrap();
    pump(&mut client, client_addr(), &mut server, now, &mut |_| true);

    match server.poll_event() {
        Some(Event::Data { peer, data }) => {
            assert_eq!(peer, client_addr());
            assert_eq!(data, b"ping");
        }
        other => panic!("expected data, got {:?}", other),
    }

    server.send(client_addr(), b"pong").unwrap();
    pump(&mut server, server_addr(), &mut client, now, &mut |_| true);
    assert!(matches!(
        client.poll_event(),
        Some(Event::Data { data, .. }) if data == b"pong"
    ));

    let unknown = SocketAddr::from(([10, 0, 0, 3], 4433));
    assert!(matches!(
        client.send(unknown, b"x"),
        Err(Error::NotConnected)
    ));
}

#[test]
fn close_removes_both_connections() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let config = config();
    let mut client = new_engine(&config, 1, now);
    let mut server = new_engine(&config, 2, now);

    client.start_connection(server_addr(), now).unwrap();
    for _ in 0..5 {
        pump(&mut client, client_addr(), &mut server, now, &mut |_| true);
        pump(&mut server, server_addr(), &mut client, now, &mut |_| true);
    }
    while client.poll_event().is_some() {}
    while server.poll_event().is_some() {}

    client.close(server_addr(), now).unwrap();
    assert_eq!(client.state(server_addr()), Some(HandshakeState::Closing));

    pump(&mut client, client_addr(), &mut server, now, &mut |_| true);
    assert_eq!(server.connection_count(), 0);
    assert!(matches!(
        server.poll_event(),
        Some(Event::Closed { reason: CloseReason::PeerClosed, .. })
    ));

    pump(&mut server, server_addr(), &mut client, now, &mut |_| true);
    assert_eq!(client.connection_count(), 0);
    assert!(matches!(
        client.poll_event(),
        Some(Event::Closed { reason: CloseReason::Acknowledged, .. })
    ));
}

#[test]
fn unanswered_handshake_reports_failure() {
    let mut now = Instant::now();
    let config = config();
    let mut client = new_engine(&config, 1, now);

    client.start_connection(server_addr(), now).unwrap();

    for _ in 0..20 {
        if client.connection_count() == 0 {
            break;
        }
        now = client.poll_timeout();
        client.handle_timeout(now);
    }

    assert_eq!(client.connection_count(), 0);
    assert!(matches!(
        client.poll_event(),
        Some(Event::Failed { peer, error: Error::Timeout(_) }) if peer == server_addr()
    ));
    // First attempt plus four retries.
    assert_eq!(client.io().sent.len(), 5);
}

#[test]
fn run_once_handles_inbox_then_stops() {
    let now = Instant::now();
    let config = config_with(|b| b.require_cookie(false));
    let mut client = new_engine(&config, 1, now);
    let mut server = new_engine(&config, 2, now);

    client.start_connection(server_addr(), now).unwrap();
    let hello = client.io().sent[0].1.clone();

    server.io_mut().stop_when_empty = true;
    server.io_mut().inbox.push_back((client_addr(), hello));

    assert!(server.run_once().unwrap());
    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.io().sent.len(), 1);

    assert!(!server.run_once().unwrap());
    server.run().unwrap();
}
