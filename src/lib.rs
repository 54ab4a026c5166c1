//! dgtls is a datagram secure transport in the style of DTLS.
//!
//! It establishes authenticated, encrypted sessions over an unreliable,
//! connectionless medium. Packets may be lost, reordered, duplicated or
//! fragmented; handshakes are retransmitted under exponential backoff,
//! records carry an epoch and a 48-bit sequence number checked against a
//! sliding replay window, and servers only commit memory to a peer that
//! returned a stateless cookie.
//!
//! # Layers
//!
//! * [`Connection`] is the sans-IO core for one peer. Feed it datagrams with
//!   [`Connection::handle_packet`], time with [`Connection::handle_timeout`],
//!   and drain [`Connection::poll_output`] until it returns
//!   [`Output::Timeout`]. It never reads a clock or touches a socket.
//! * [`Engine`] is the single threaded run-loop that owns many connections
//!   over one [`DatagramIo`], answers cookie requests, multiplexes timers,
//!   and reports what happened as [`Event`]s.
//!
//! # Handshake
//!
//! ```text
//! Client                                         Server
//! ClientHello                     ----->
//!                                 <-----         HelloVerifyRequest (cookie)
//! ClientHello (cookie)            ----->
//!                                 <-----         ServerHello
//!                                                Finished (epoch 1)
//! Finished (epoch 1)              ----->
//! ```
//!
//! Keys come from an x25519 exchange, optionally salted with a pre-shared
//! key, expanded with HKDF-SHA256. Records of epoch 1 and above are
//! protected with AES-128-GCM. Either side may move to a new epoch at any
//! time with [`Connection::rekey`]; the receiver follows as soon as the
//! first record of the new epoch authenticates.
//!
//! # Example
//!
//! ```no_run
//! use std::net::UdpSocket;
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use dgtls::{Config, Engine, Event, OsRandom, UdpIo};
//!
//! let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
//! let io = UdpIo::new(socket).unwrap();
//! let config = Arc::new(Config::default());
//! let mut engine = Engine::new(config, io, Box::new(OsRandom::new()), Instant::now()).unwrap();
//!
//! let peer = "192.0.2.1:4433".parse().unwrap();
//! engine.start_connection(peer, Instant::now()).unwrap();
//!
//! while engine.run_once().unwrap() {
//!     while let Some(event) = engine.poll_event() {
//!         match event {
//!             Event::Connected { peer } => engine.send(peer, b"hello").unwrap(),
//!             Event::Data { data, .. } => println!("{} bytes", data.len()),
//!             _ => {}
//!         }
//!     }
//! }
//! ```
#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

use std::time::Instant;

mod buffer;
mod config;
mod connection;
mod cookie;
mod crypto;
mod engine;
mod error;
mod event;
mod flight;
mod io;
mod message;
mod queue;
mod record;
mod rng;
mod scheduler;
mod stats;
mod timer;
mod types;
mod util;
mod window;

pub use config::{Config, ConfigBuilder, MIN_MTU};
pub use connection::{CloseReason, Connection, HandshakeState, Role};
pub use cookie::{CookieManager, COOKIE_LEN};
pub use engine::{Engine, Event};
pub use error::Error;
pub use io::{DatagramIo, Received, UdpIo};
pub use record::RecordHeader;
pub use rng::{OsRandom, RandomSource, SeededRandom};
pub use scheduler::RetransmissionScheduler;
pub use stats::{CountingStats, DropReason, NoopStats, Stat, StatsSink};
pub use types::{ContentType, ProtocolVersion, Sequence};
pub use window::ReplayWindow;

/// Output of [`Connection::poll_output`].
#[derive(Debug, PartialEq, Eq)]
pub enum Output<'a> {
    /// A datagram to send to the peer.
    Packet(&'a [u8]),
    /// Nothing more to do until this instant.
    Timeout(Instant),
    /// The handshake completed.
    Connected,
    /// Application data received from the peer.
    ApplicationData(&'a [u8]),
    /// The connection is closed. Sent datagrams come first.
    Closed(CloseReason),
}
