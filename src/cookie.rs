//! Stateless anti-DoS cookies.
//!
//! A cookie is `HMAC-SHA256(secret, peer address | extra)`. Nothing is stored
//! per peer: a returning ClientHello is validated by recomputing the MAC.
//! The secret rotates on a fixed interval and one previous secret is kept,
//! so a cookie stays valid for at least one full interval.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::message::Cookie;
use crate::rng::{random_array, RandomSource};
use crate::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of an issued cookie.
pub const COOKIE_LEN: usize = 32;

pub struct CookieManager {
    current: Zeroizing<[u8; 32]>,
    previous: Option<Zeroizing<[u8; 32]>>,
    interval: Duration,
    rotated_at: Instant,
    generation: u64,
}

impl CookieManager {
    /// Create the manager and draw the first secret.
    pub fn new(
        interval: Duration,
        rng: &mut dyn RandomSource,
        now: Instant,
    ) -> Result<Self, Error> {
        let current = Zeroizing::new(random_array::<32>(rng)?);
        debug!("Cookie secret initialised, rotation every {:?}", interval);
        Ok(CookieManager {
            current,
            previous: None,
            interval,
            rotated_at: now,
            generation: 0,
        })
    }

    /// The active secret.
    pub fn current_secret(&self) -> &[u8; 32] {
        &self.current
    }

    /// Number of rotations since creation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replace the secret, keeping the current one as previous.
    pub fn rotate(&mut self, rng: &mut dyn RandomSource, now: Instant) -> Result<(), Error> {
        let next = Zeroizing::new(random_array::<32>(rng)?);
        self.previous = Some(std::mem::replace(&mut self.current, next));
        self.rotated_at = now;
        self.generation += 1;
        debug!("Cookie secret rotated (generation {})", self.generation);
        Ok(())
    }

    /// Rotate if the interval elapsed. Returns whether it did.
    pub fn maybe_rotate(&mut self, now: Instant, rng: &mut dyn RandomSource) -> Result<bool, Error> {
        if now < self.next_rotation() {
            return Ok(false);
        }
        self.rotate(rng, now)?;
        Ok(true)
    }

    pub fn next_rotation(&self) -> Instant {
        self.rotated_at + self.interval
    }

    /// Cookie for `peer` under the current secret.
    ///
    /// `extra` binds the cookie to more than the address, the ClientHello
    /// random in practice.
    pub fn issue(&self, peer: SocketAddr, extra: &[u8]) -> Result<Cookie, Error> {
        let tag = compute(&self.current, peer, extra)?;
        Cookie::try_new(&tag)
            .ok_or_else(|| Error::CryptoError("Failed to build cookie from HMAC output".to_string()))
    }

    /// Whether `cookie` was issued to `peer` under the current or previous secret.
    pub fn validate(&self, peer: SocketAddr, extra: &[u8], cookie: &[u8]) -> bool {
        if cookie.len() != COOKIE_LEN {
            return false;
        }

        let secrets = std::iter::once(&self.current).chain(self.previous.as_ref());

        let mut ok = false;
        for secret in secrets {
            if let Ok(expected) = compute(secret, peer, extra) {
                ok |= bool::from(expected[..].ct_eq(cookie));
            }
        }
        ok
    }
}

fn compute(secret: &[u8; 32], peer: SocketAddr, extra: &[u8]) -> Result<[u8; COOKIE_LEN], Error> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| Error::CryptoError("Invalid HMAC key".to_string()))?;

    match peer {
        SocketAddr::V4(a) => {
            mac.update(&[4]);
            mac.update(&a.ip().octets());
        }
        SocketAddr::V6(a) => {
            mac.update(&[6]);
            mac.update(&a.ip().octets());
        }
    }
    mac.update(&peer.port().to_be_bytes());
    mac.update(extra);

    Ok(mac.finalize().into_bytes().into())
}

impl fmt::Debug for CookieManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieManager")
            .field("generation", &self.generation)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
