//! Handshake fragmentation tests.

use std::time::{Duration, Instant};

use dgtls::{Connection, DropReason, HandshakeState, Stat};

use crate::common::*;

/// The handshake body of the client's first ClientHello.
fn client_hello_body(client: &mut Connection) -> Vec<u8> {
    let packets = collect_packets(client);
    let records = split_records(&packets[0]);
    // Record header, then the 12 byte handshake header.
    records[0][13 + 12..].to_vec()
}

fn fragments(body: &[u8], ranges: &[(usize, usize)]) -> Vec<Vec<u8>> {
    ranges
        .iter()
        .enumerate()
        .map(|(i, &(start, end))| {
            let fragment = handshake_fragment(1, body.len(), 0, start, &body[start..end]);
            record(22, 0, i as u64, &fragment)
        })
        .collect()
}

#[test]
fn client_hello_in_reverse_order() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let config = config();
    let (mut client, mut server) = new_pair(&config, now);

    let body = client_hello_body(&mut client);
    let third = body.len() / 3;
    let mut records = fragments(
        &body,
        &[(0, third), (third, 2 * third), (2 * third, body.len())],
    );
    records.reverse();

    for (i, r) in records.iter().enumerate() {
        server.handle_packet(r, now).unwrap();
        if i < 2 {
            assert_eq!(server.state(), HandshakeState::AwaitingClientHello);
        }
    }
    assert_eq!(server.state(), HandshakeState::AwaitingFinished);

    deliver_packets(&collect_packets(&mut server), &mut client, now);
    assert_eq!(client.state(), HandshakeState::Established);
    deliver_packets(&collect_packets(&mut client), &mut server, now);
    assert_eq!(server.state(), HandshakeState::Established);
}

#[test]
fn overlapping_and_duplicate_fragments() {
    let now = Instant::now();
    let config = config();
    let (mut client, mut server) = new_pair(&config, now);

    let body = client_hello_body(&mut client);
    let half = body.len() / 2;
    let records = fragments(
        &body,
        &[(0, half + 10), (0, 20), (half - 5, body.len())],
    );

    for r in &records {
        server.handle_packet(r, now).unwrap();
    }
    assert_eq!(server.state(), HandshakeState::AwaitingFinished);

    complete_handshake(&mut client, &mut server, now);
}

#[test]
fn all_fragments_in_one_datagram() {
    let now = Instant::now();
    let config = config();
    let (mut client, mut server) = new_pair(&config, now);

    let body = client_hello_body(&mut client);
    let records = fragments(&body, &[(40, body.len()), (0, 40)]);
    let datagram: Vec<u8> = records.concat();

    server.handle_packet(&datagram, now).unwrap();
    assert_eq!(server.state(), HandshakeState::AwaitingFinished);
}

#[test]
fn inconsistent_fragment_is_rejected() {
    let now = Instant::now();
    let (config, stats) = counted_config(|b| b);
    let (mut client, mut server) = new_pair(&config, now);

    let body = client_hello_body(&mut client);
    let first = record(22, 0, 0, &handshake_fragment(1, body.len(), 0, 0, &body[..30]));
    // Same message_seq, different total length.
    let liar = record(
        22,
        0,
        1,
        &handshake_fragment(1, body.len() + 1, 0, 30, &body[30..]),
    );

    server.handle_packet(&first, now).unwrap();
    server.handle_packet(&liar, now).unwrap();

    assert_eq!(server.state(), HandshakeState::AwaitingClientHello);
    assert_eq!(
        stats.get(Stat::RecordDropped(DropReason::ResourceLimit)),
        1
    );
}

#[test]
fn incomplete_message_expires() {
    let now = Instant::now();
    let config = config();
    let (mut client, mut server) = new_pair(&config, now);

    let body = client_hello_body(&mut client);
    let records = fragments(&body, &[(0, 30), (30, body.len())]);

    server.handle_packet(&records[0], now).unwrap();
    // The partial message keeps a timer of its own.
    assert_eq!(server.timeout(), Some(now + Duration::from_secs(1)));

    let later = now + Duration::from_secs(2);
    server.handle_timeout(later).unwrap();

    // The first half is gone, so the second alone cannot complete it.
    server.handle_packet(&records[1], later).unwrap();
    assert_eq!(server.state(), HandshakeState::AwaitingClientHello);
}

#[test]
fn small_mtu_still_connects() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let config = config_with(|b| b.mtu(dgtls::MIN_MTU));
    let (mut client, mut server) = established_pair(&config, now);

    let mut buf = vec![0u8; 2048];
    let max = dgtls::MIN_MTU - 13 - 16;
    client.send_application_data(&vec![7u8; max]).unwrap();
    loop {
        match client.poll_output(&mut buf) {
            dgtls::Output::Packet(p) => {
                assert!(p.len() <= dgtls::MIN_MTU);
                server.handle_packet(p, now).unwrap();
            }
            dgtls::Output::Timeout(_) => break,
            _ => {}
        }
    }
    assert_eq!(drain_outputs(&mut server).app_data, vec![vec![7u8; max]]);
}
