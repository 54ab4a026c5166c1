//! Retransmission tests.

use std::time::{Duration, Instant};

use dgtls::{Error, HandshakeState, Stat};

use crate::common::*;

#[test]
fn client_hello_backoff_doubles_and_is_identical() {
    let _ = env_logger::try_init();

    let start = Instant::now();
    let (config, stats) = counted_config(|b| b);
    let (mut client, _) = new_pair(&config, start);

    let first = collect_packets(&mut client);
    assert_eq!(first.len(), 1);
    let first_payload = split_records(&first[0])[0][13..].to_vec();

    let mut now = start;
    let mut intervals = Vec::new();
    for _ in 0..config.flight_retries() {
        let at = client.timeout().unwrap();
        intervals.push(at - now);
        now = at;
        client.handle_timeout(now).unwrap();

        let resent = collect_packets(&mut client);
        assert_eq!(resent.len(), 1);
        let record = &split_records(&resent[0])[0];
        // Fresh record sequence number, same handshake bytes.
        assert!(record_seq(record) > 0);
        assert_eq!(&record[13..], &first_payload[..]);
    }

    let secs: Vec<u64> = intervals.iter().map(|d| d.as_secs()).collect();
    assert_eq!(secs, vec![1, 2, 4, 8]);
    assert_eq!(stats.get(Stat::Retransmission), 4);

    // The retry budget is spent on the next expiry.
    let at = client.timeout().unwrap();
    assert_eq!(at - now, Duration::from_secs(16));
    let r = client.handle_timeout(at);
    assert!(matches!(r, Err(Error::Timeout("flight"))));
    assert_eq!(client.state(), HandshakeState::Failed);
    assert_eq!(stats.get(Stat::HandshakeFailed), 1);
}

#[test]
fn backoff_is_capped() {
    let start = Instant::now();
    let config = config_with(|b| {
        b.flight_start_rto(Duration::from_secs(2))
            .flight_max_rto(Duration::from_secs(5))
            .flight_retries(4)
    });
    let (mut client, _) = new_pair(&config, start);
    collect_packets(&mut client);

    let mut now = start;
    let mut intervals = Vec::new();
    for _ in 0..4 {
        let at = client.timeout().unwrap();
        intervals.push((at - now).as_secs());
        now = at;
        client.handle_timeout(now).unwrap();
        collect_packets(&mut client);
    }
    assert_eq!(intervals, vec![2, 4, 5, 5]);
}

#[test]
fn server_retransmits_lost_flight() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let config = config();
    let (mut client, mut server) = new_pair(&config, now);

    deliver_packets(&collect_packets(&mut client), &mut server, now);
    let lost = collect_packets(&mut server);
    assert_eq!(lost.len(), 1);

    trigger_timeout(&mut server, &mut now);
    let resent = collect_packets(&mut server);
    assert_eq!(resent.len(), 1);
    assert_eq!(split_records(&resent[0]).len(), 2);

    deliver_packets(&resent, &mut client, now);
    assert_eq!(client.state(), HandshakeState::Established);
    deliver_packets(&collect_packets(&mut client), &mut server, now);
    assert_eq!(server.state(), HandshakeState::Established);
}

#[test]
fn lost_final_flight_resent_on_duplicate() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let (config, stats) = counted_config(|b| b);
    let (mut client, mut server) = new_pair(&config, now);

    deliver_packets(&collect_packets(&mut client), &mut server, now);
    deliver_packets(&collect_packets(&mut server), &mut client, now);
    assert_eq!(client.state(), HandshakeState::Established);

    // The client's Finished is lost.
    let lost = collect_packets(&mut client);
    assert_eq!(lost.len(), 1);
    // The final flight has no timer of its own.
    assert_eq!(client.timeout(), Some(now + config.idle_timeout()));

    // The server retransmits, which makes the client resend its Finished.
    trigger_timeout(&mut server, &mut now);
    deliver_packets(&collect_packets(&mut server), &mut client, now);
    let resent = collect_packets(&mut client);
    assert_eq!(resent.len(), 1);

    deliver_packets(&resent, &mut server, now);
    assert_eq!(server.state(), HandshakeState::Established);
    assert!(stats.get(Stat::Retransmission) >= 2);
}

#[test]
fn answered_client_hello_is_not_resent() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let (config, stats) = counted_config(|b| b);
    let (mut client, mut server) = new_pair(&config, now);

    deliver_packets(&collect_packets(&mut client), &mut server, now);
    let f4 = collect_packets(&mut server);
    // Only the ServerHello arrives.
    client.handle_packet(&split_records(&f4[0])[0], now).unwrap();
    assert_eq!(client.state(), HandshakeState::AwaitingFinished);
    assert!(collect_packets(&mut client).is_empty());
    // No flight of ours is outstanding while waiting for Finished.
    assert_ne!(client.timeout(), Some(now + config.flight_start_rto()));

    // A retransmitted ServerHello does not bring back the ClientHello.
    trigger_timeout(&mut server, &mut now);
    let resent = collect_packets(&mut server);
    let records = split_records(&resent[0]);
    client.handle_packet(&records[0], now).unwrap();
    assert!(collect_packets(&mut client).is_empty());
    assert_eq!(stats.get(Stat::Retransmission), 1, "only the server resent");

    client.handle_packet(&records[1], now).unwrap();
    assert_eq!(client.state(), HandshakeState::Established);
    deliver_packets(&collect_packets(&mut client), &mut server, now);
    assert_eq!(server.state(), HandshakeState::Established);
}

#[test]
fn duplicate_resend_limited_per_datagram() {
    let mut now = Instant::now();
    let config = config();
    let (mut client, mut server) = new_pair(&config, now);

    deliver_packets(&collect_packets(&mut client), &mut server, now);
    deliver_packets(&collect_packets(&mut server), &mut client, now);
    collect_packets(&mut client);

    trigger_timeout(&mut server, &mut now);
    let resent = collect_packets(&mut server);
    // One datagram holding two duplicate messages gives one resend.
    assert_eq!(split_records(&resent[0]).len(), 2);
    deliver_packets(&resent, &mut client, now);
    assert_eq!(collect_packets(&mut client).len(), 1);
}

#[test]
fn handshake_completes_after_packet_loss() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let config = config();
    let (mut client, mut server) = new_pair(&config, now);

    // Drop the first ClientHello.
    collect_packets(&mut client);
    trigger_timeout(&mut client, &mut now);

    complete_handshake(&mut client, &mut server, now);
}
