//! Cryptographic building blocks: x25519 exchange, HKDF schedule and
//! AES-128-GCM record protection.

mod aead;
mod key_exchange;
mod key_schedule;

pub use aead::{TrafficKeys, AEAD_OVERHEAD};
pub use key_exchange::KeyExchange;
pub use key_schedule::{
    derive_traffic_secrets, finished_verify_data, verify_finished, TrafficSecrets,
};
