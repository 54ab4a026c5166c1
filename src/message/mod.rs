//! Handshake and alert message parsing and serialization.
//!
//! Every message has a nom `parse` and a `serialize(&mut Buf)`. Handshake
//! messages travel behind a [`Header`] that also carries the fragmentation
//! metadata used by the reassembler.

mod alert;
mod client_hello;
mod finished;
mod handshake;
mod hello_verify;
mod random;
mod server_hello;

pub use alert::{Alert, AlertLevel};
pub use client_hello::ClientHello;
pub use finished::{Finished, VERIFY_DATA_LEN};
pub use handshake::{append_transcript, Body, Header, MessageType, HANDSHAKE_HEADER_LEN};
pub use hello_verify::HelloVerifyRequest;
pub use random::{Cookie, KeyShare, Random};
pub use server_hello::ServerHello;
