use std::fmt;

use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::message::KeyShare;
use crate::rng::{random_array, RandomSource};
use crate::Error;

/// Ephemeral x25519 key pair.
///
/// The secret is drawn from the connection's [`RandomSource`] so a seeded
/// source gives a fully reproducible handshake.
pub struct KeyExchange {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyExchange {
    pub fn new(rng: &mut dyn RandomSource) -> Result<Self, Error> {
        let bytes = Zeroizing::new(random_array::<32>(rng)?);
        let secret = StaticSecret::from(*bytes);
        let public = PublicKey::from(&secret);
        Ok(KeyExchange { secret, public })
    }

    pub fn key_share(&self) -> KeyShare {
        KeyShare::new(self.public.to_bytes())
    }

    /// Shared secret with the peer's key share.
    ///
    /// Fails for low order points that would yield an all zero secret.
    pub fn shared_secret(&self, peer: &KeyShare) -> Result<Zeroizing<[u8; 32]>, Error> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer.as_bytes()));
        if !shared.was_contributory() {
            return Err(Error::SecurityError(
                "Non-contributory key share".to_string(),
            ));
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

impl fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyExchange")
            .field("public", &self.key_share())
            .finish_non_exhaustive()
    }
}
