//! Public key sealing for small secrets: X25519 agreement with a fresh ephemeral key,
//! SHA-256 key derivation, then the ChaCha20 payload format.
//!
//! Layout: `ephemeral public key (32 bytes) || nonce (12 bytes) || ciphertext`.

use sealed_common::{KEY_LEN, NONCE_LEN, SealedPayload, random_bytes, random_nonce};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use super::coprocessor::CoprocessorError;

pub const X25519_KEY_LEN: usize = 32;
pub const ENVELOPE_OVERHEAD: usize = X25519_KEY_LEN + NONCE_LEN;

const ENVELOPE_TAG: &[u8] = b"sealed-reports:envelope:v1";

/// Encrypt `plaintext` so only the holder of the secret behind `recipient` can read it.
pub fn seal_to(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CoprocessorError> {
    let ephemeral = StaticSecret::from(random_bytes::<X25519_KEY_LEN>());
    let ephemeral_public = PublicKey::from(&ephemeral);
    let key = envelope_key(&ephemeral, recipient, &ephemeral_public, recipient)?;

    let sealed = SealedPayload::seal(&key, &random_nonce(), plaintext)
        .map_err(|e| CoprocessorError::MalformedInput(e.to_string()))?;
    let mut out = Vec::with_capacity(X25519_KEY_LEN + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub fn open_with(secret: &StaticSecret, envelope: &[u8]) -> Result<Vec<u8>, CoprocessorError> {
    if envelope.len() < ENVELOPE_OVERHEAD {
        return Err(CoprocessorError::MalformedInput(format!(
            "envelope of {} bytes is shorter than its header",
            envelope.len()
        )));
    }
    let (header, sealed) = envelope.split_at(X25519_KEY_LEN);
    let mut ephemeral = [0u8; X25519_KEY_LEN];
    ephemeral.copy_from_slice(header);
    let ephemeral = PublicKey::from(ephemeral);
    let key = envelope_key(secret, &ephemeral, &ephemeral, &PublicKey::from(secret))?;

    SealedPayload::from_bytes(sealed)
        .and_then(|payload| payload.open(&key))
        .map_err(|e| CoprocessorError::MalformedInput(e.to_string()))
}

fn envelope_key(
    secret: &StaticSecret,
    peer: &PublicKey,
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<[u8; KEY_LEN], CoprocessorError> {
    let shared = secret.diffie_hellman(peer);
    if !shared.was_contributory() {
        return Err(CoprocessorError::MalformedInput(
            "low order ephemeral key".into(),
        ));
    }
    let mut hasher = Sha256::new();
    hasher.update(ENVELOPE_TAG);
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    hasher.update(shared.as_bytes());
    Ok(hasher.finalize().into())
}
