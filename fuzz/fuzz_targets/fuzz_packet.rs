#![no_main]

//! Fuzz target for datagram handling of a connection.
//!
//! Feeds the input to a fresh server and a fresh client, each in the state
//! where it accepts the most message types.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use libfuzzer_sys::fuzz_target;

use dgtls::{Config, Connection, Output, SeededRandom};

fuzz_target!(|data: &[u8]| {
    let config = Arc::new(Config::default());
    let peer = SocketAddr::from(([127, 0, 0, 1], 4433));
    let now = Instant::now();
    let mut rng = SeededRandom::new(7);

    let mut buf = vec![0u8; 2048];

    if let Ok(mut server) = Connection::new_server(config.clone(), peer, now, &mut rng) {
        let _ = server.handle_packet(data, now);
        while !matches!(server.poll_output(&mut buf), Output::Timeout(_)) {}
    }

    if let Ok(mut client) = Connection::new_client(config, peer, now, &mut rng) {
        let _ = client.handle_packet(data, now);
        while !matches!(client.poll_output(&mut buf), Output::Timeout(_)) {}
    }
});
