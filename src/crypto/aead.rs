//! AES-128-GCM record protection.

use std::fmt;

use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes128Gcm, KeyInit};
use arrayvec::ArrayVec;
use zeroize::Zeroizing;

use super::key_schedule::expand_label;
use crate::buffer::Buf;
use crate::types::{ContentType, ProtocolVersion, Sequence};
use crate::Error;

/// GCM authentication tag length, appended to the ciphertext.
pub const GCM_TAG_LEN: usize = 16;

/// Per record expansion of an encrypted record.
pub const AEAD_OVERHEAD: usize = GCM_TAG_LEN;

/// Full AEAD nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; 12]);

impl Nonce {
    /// The IV XOR the left padded 64-bit sequence number.
    pub fn xor(iv: &[u8; 12], seq: u64) -> Self {
        let mut nonce = *iv;
        let seq_bytes = seq.to_be_bytes();
        for i in 0..8 {
            nonce[4 + i] ^= seq_bytes[i];
        }
        Self(nonce)
    }
}

/// Additional authenticated data for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aad(pub ArrayVec<u8, 13>);

impl Aad {
    pub fn new(content_type: ContentType, sequence: Sequence, plaintext_len: u16) -> Self {
        let mut aad = ArrayVec::new();
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&sequence.sequence_number.to_be_bytes());
        // Epoch takes the top two bytes of the 64 bit sequence.
        seq[..2].copy_from_slice(&sequence.epoch.to_be_bytes());
        aad.extend(seq);
        aad.push(content_type.as_u8());
        aad.extend(ProtocolVersion::V1.to_bytes());
        aad.extend(plaintext_len.to_be_bytes());
        Aad(aad)
    }
}

/// Keys for one direction of one epoch.
pub struct TrafficKeys {
    secret: Zeroizing<[u8; 32]>,
    iv: Zeroizing<[u8; 12]>,
    cipher: Aes128Gcm,
}

impl TrafficKeys {
    pub fn from_secret(secret: Zeroizing<[u8; 32]>) -> Result<Self, Error> {
        let key = expand_label::<16>(&secret[..], b"key", &[])?;
        let iv = expand_label::<12>(&secret[..], b"iv", &[])?;
        let cipher = Aes128Gcm::new_from_slice(&key[..])
            .map_err(|_| Error::CryptoError("Invalid AES-128 key length".to_string()))?;

        Ok(TrafficKeys { secret, iv, cipher })
    }

    /// Keys for the following epoch.
    pub fn next(&self) -> Result<Self, Error> {
        let secret = expand_label::<32>(&self.secret[..], b"traffic upd", &[])?;
        Self::from_secret(secret)
    }

    #[cfg(test)]
    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    /// Encrypt `data` in place, appending the tag.
    pub fn seal(
        &self,
        content_type: ContentType,
        sequence: Sequence,
        data: &mut Buf,
    ) -> Result<(), Error> {
        let aad = Aad::new(content_type, sequence, data.len() as u16);
        let nonce = Nonce::xor(&self.iv, sequence.sequence_number);
        self.cipher
            .encrypt_in_place(aes_gcm::Nonce::from_slice(&nonce.0), &aad.0, data)
            .map_err(|_| Error::CryptoError("AES-GCM encryption failed".to_string()))
    }

    /// Decrypt `data` in place, removing the tag.
    pub fn open(
        &self,
        content_type: ContentType,
        sequence: Sequence,
        data: &mut Buf,
    ) -> Result<(), Error> {
        let Some(plaintext_len) = data.len().checked_sub(GCM_TAG_LEN) else {
            return Err(Error::CryptoError(format!(
                "Ciphertext too short: {}",
                data.len()
            )));
        };
        let aad = Aad::new(content_type, sequence, plaintext_len as u16);
        let nonce = Nonce::xor(&self.iv, sequence.sequence_number);
        self.cipher
            .decrypt_in_place(aes_gcm::Nonce::from_slice(&nonce.0), &aad.0, data)
            .map_err(|_| Error::CryptoError("AES-GCM decryption failed".to_string()))
    }
}

impl fmt::Debug for TrafficKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrafficKeys").finish_non_exhaustive()
    }
}
