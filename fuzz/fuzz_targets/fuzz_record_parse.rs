#![no_main]

//! Fuzz target for record and handshake parsing.
//!
//! Wraps the input in a plausible record header so the handshake parser
//! behind the record layer sees most of the inputs.
//!
//! Record format:
//! - ContentType: 1 byte
//! - ProtocolVersion: 2 bytes (0xFEFD)
//! - Epoch: 2 bytes
//! - Sequence Number: 6 bytes (u48)
//! - Length: 2 bytes
//! - Fragment: variable

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use libfuzzer_sys::fuzz_target;

use dgtls::{Config, Connection, RecordHeader, SeededRandom};

/// Largest fragment we wrap.
const MAX_FRAGMENT_SIZE: usize = 16384;

fuzz_target!(|data: &[u8]| {
    let _ = RecordHeader::parse(data);

    let config = Arc::new(Config::default());
    let peer = SocketAddr::from(([127, 0, 0, 1], 4433));
    let now = Instant::now();
    let mut rng = SeededRandom::new(7);

    let Ok(mut server) = Connection::new_server(config, peer, now, &mut rng) else {
        return;
    };

    if data.is_empty() {
        return;
    }

    let frag_len = data.len().min(MAX_FRAGMENT_SIZE);

    let mut record = Vec::with_capacity(RecordHeader::LEN + frag_len);
    record.push(22u8); // Handshake
    record.extend_from_slice(&[0xFE, 0xFD]);
    record.extend_from_slice(&[0, 0]); // epoch 0
    record.extend_from_slice(&[0, 0, 0, 0, 0, 1]); // sequence 1
    record.extend_from_slice(&(frag_len as u16).to_be_bytes());
    record.extend_from_slice(&data[..frag_len]);

    let _ = server.handle_packet(&record, now);
});
