//! Integration tests driving pairs of connections and engines in memory.

mod common;
mod engine;
mod fragmentation;
mod handshake;
mod retransmit;
