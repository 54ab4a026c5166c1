//! Random byte sources.
//!
//! Production code uses [`OsRandom`]. Tests substitute [`SeededRandom`] to get
//! a reproducible byte stream; nothing else changes, since every consumer
//! only sees `&mut dyn RandomSource`.

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng, TryRngCore};

use crate::Error;

/// A source of random bytes.
pub trait RandomSource {
    /// Fill `buf` completely with random bytes.
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), Error>;
}

/// Cryptographically secure randomness from the operating system.
#[derive(Debug, Default)]
pub struct OsRandom;

impl OsRandom {
    pub fn new() -> Self {
        OsRandom
    }
}

impl RandomSource for OsRandom {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| Error::RandomnessFailure(e.to_string()))
    }
}

/// A deterministic random source for testing.
///
/// Two instances created with the same seed produce the same byte stream.
pub struct SeededRandom {
    inner: StdRng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        SeededRandom {
            inner: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandom {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.inner.fill_bytes(buf);
        Ok(())
    }
}

impl std::fmt::Debug for SeededRandom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRandom").finish()
    }
}

/// Convenience to draw a fixed size array.
pub(crate) fn random_array<const N: usize>(rng: &mut dyn RandomSource) -> Result<[u8; N], Error> {
    let mut out = [0u8; N];
    rng.fill(&mut out)?;
    Ok(out)
}
