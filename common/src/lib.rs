//! Shared primitives for sealed reports: the ChaCha20 keystream, password based key
//! derivation, the principal [Address] type and the `nonce || ciphertext` wire format.
//!
//! Everything in here is pure and deterministic so that a reporter encrypting in one
//! process and decrypting in another always agree on the bytes.

mod address;
mod error;
pub mod keystream;
pub mod payload;

pub use address::Address;
pub use error::CipherError;
pub use keystream::{apply_keystream, keystream_block, stream_apply};
pub use payload::SealedPayload;

use sha2::{Digest, Sha256};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const BLOCK_LEN: usize = 64;
pub const ADDRESS_LEN: usize = 20;

/// Derive the 32 byte stream key from a one-time password.
///
/// The password is rendered as lowercase `0x`-prefixed hex before hashing, so
/// `0xAbCd..` and `0xabcd..` yield the same key.
pub fn derive_key(password: &Address) -> [u8; KEY_LEN] {
    let digest = Sha256::digest(password.to_lowercase_hex().as_bytes());
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&digest[..KEY_LEN]);
    key
}

/// Same as [derive_key], accepting the password in any hex letter case.
pub fn derive_key_from_str(password: &str) -> Result<[u8; KEY_LEN], CipherError> {
    let address: Address = password.parse()?;
    Ok(derive_key(&address))
}

#[cfg(feature = "std")]
pub mod std_only {
    use super::*;
    use rand::{TryRngCore, rngs::OsRng};

    /// Helper to get a OsRng nonce of correct length
    pub fn random_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.try_fill_bytes(&mut nonce).expect("Rng->buffer");
        nonce
    }

    /// `N` bytes from the OS RNG, for secret keys and seeds.
    pub fn random_bytes<const N: usize>() -> [u8; N] {
        let mut bytes = [0u8; N];
        OsRng.try_fill_bytes(&mut bytes).expect("Rng->buffer");
        bytes
    }

    /// A fresh one-time password, shaped like an address.
    pub fn random_password() -> Address {
        let mut bytes = [0u8; ADDRESS_LEN];
        OsRng.try_fill_bytes(&mut bytes).expect("Rng->buffer");
        Address::from(bytes)
    }

    /// Encrypt `plaintext` under the key derived from `password` with a fresh nonce,
    /// returning the `nonce || ciphertext` blob that gets stored on the ledger.
    pub fn seal(password: &Address, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let key = derive_key(password);
        SealedPayload::seal(&key, &random_nonce(), plaintext)
    }
}

#[cfg(feature = "std")]
pub use std_only::{random_bytes, random_nonce, random_password, seal};

/// Decrypt a `nonce || ciphertext` blob with the key derived from `password`.
pub fn open(password: &Address, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
    let key = derive_key(password);
    SealedPayload::from_bytes(sealed)?.open(&key)
}
