//! HKDF key schedule and Finished computation.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::message::VERIFY_DATA_LEN;
use crate::Error;

const LABEL_PREFIX: &[u8] = b"dgtls ";

/// HKDF-Expand-Label with the `"dgtls "` prefix.
///
/// `info = u16 length | u8 label_len | "dgtls " label | u8 ctx_len | ctx`
pub fn expand_label<const N: usize>(
    secret: &[u8],
    label: &[u8],
    context: &[u8],
) -> Result<Zeroizing<[u8; N]>, Error> {
    let full_label_len = LABEL_PREFIX.len() + label.len();

    if full_label_len > 255 {
        return Err(Error::CryptoError(
            "Label too long for HKDF-Expand-Label".to_string(),
        ));
    }
    if context.len() > 255 {
        return Err(Error::CryptoError(
            "Context too long for HKDF-Expand-Label".to_string(),
        ));
    }

    let mut info = Vec::with_capacity(2 + 1 + full_label_len + 1 + context.len());
    info.extend_from_slice(&(N as u16).to_be_bytes());
    info.push(full_label_len as u8);
    info.extend_from_slice(LABEL_PREFIX);
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    let hk = Hkdf::<Sha256>::from_prk(secret)
        .map_err(|e| Error::CryptoError(format!("Invalid PRK: {:?}", e)))?;

    let mut out = Zeroizing::new([0u8; N]);
    hk.expand(&info, &mut out[..])
        .map_err(|e| Error::CryptoError(format!("HKDF expand failed: {:?}", e)))?;

    Ok(out)
}

/// Traffic secrets of both directions for epoch 1.
pub struct TrafficSecrets {
    pub client: Zeroizing<[u8; 32]>,
    pub server: Zeroizing<[u8; 32]>,
}

/// Derive the epoch 1 traffic secrets.
///
/// The optional PSK is the extract salt so both sides must hold the same
/// key for the Finished exchange to verify.
pub fn derive_traffic_secrets(
    psk: Option<&[u8]>,
    shared_secret: &[u8; 32],
    transcript: &[u8],
) -> Result<TrafficSecrets, Error> {
    let (master, _) = Hkdf::<Sha256>::extract(psk, shared_secret);
    let master: Zeroizing<[u8; 32]> = Zeroizing::new(master.into());
    let hash = Sha256::digest(transcript);

    Ok(TrafficSecrets {
        client: expand_label(&master[..], b"c traffic", &hash)?,
        server: expand_label(&master[..], b"s traffic", &hash)?,
    })
}

/// `HMAC(finished_key, SHA-256(transcript))`.
pub fn finished_verify_data(
    traffic_secret: &[u8; 32],
    transcript: &[u8],
) -> Result<[u8; VERIFY_DATA_LEN], Error> {
    let finished_key = expand_label::<32>(traffic_secret, b"finished", &[])?;
    let hash = Sha256::digest(transcript);

    let mut mac = Hmac::<Sha256>::new_from_slice(&finished_key[..])
        .map_err(|_| Error::CryptoError("Invalid HMAC key length".to_string()))?;
    mac.update(&hash);

    Ok(mac.finalize().into_bytes().into())
}

/// Constant time comparison of verify data.
pub fn verify_finished(expected: &[u8; VERIFY_DATA_LEN], received: &[u8; VERIFY_DATA_LEN]) -> bool {
    expected[..].ct_eq(&received[..]).into()
}
