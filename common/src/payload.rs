//! `encrypted_data` wire format: `nonce (12 bytes) || ciphertext (N bytes)`.

use core::fmt;

use sha2::{Digest, Sha256};

use crate::{CipherError, KEY_LEN, NONCE_LEN, keystream};

pub struct SealedPayload<'a> {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: &'a [u8],
}

impl<'a> SealedPayload<'a> {
    /// Split a stored blob at byte offset 12.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, CipherError> {
        if data.len() < NONCE_LEN {
            return Err(CipherError::PayloadTooShort(data.len()));
        }
        let (header, ciphertext) = data.split_at(NONCE_LEN);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(header);

        Ok(SealedPayload { nonce, ciphertext })
    }

    /// Encrypt `plaintext` and lay it out behind `nonce`.
    pub fn seal(
        key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(plaintext);
        keystream::apply_keystream(key, nonce, &mut out[NONCE_LEN..])?;
        Ok(out)
    }

    /// Stream cipher is decrypted by running it again over the ciphertext.
    pub fn open(&self, key: &[u8; KEY_LEN]) -> Result<Vec<u8>, CipherError> {
        let mut plaintext = self.ciphertext.to_vec();
        keystream::apply_keystream(key, &self.nonce, &mut plaintext)?;
        Ok(plaintext)
    }
}

impl fmt::Debug for SealedPayload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ciphertext_hash = Sha256::digest(self.ciphertext);
        f.debug_struct("SealedPayload")
            .field("nonce", &hex::encode(self.nonce))
            .field("ciphertext_len", &self.ciphertext.len())
            .field("ciphertext_sha256", &hex::encode(ciphertext_hash))
            .finish()
    }
}
