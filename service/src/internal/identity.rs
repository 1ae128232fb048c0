//! Principals are ed25519 keys. The [Address] of a principal is the last 20 bytes of the
//! SHA-256 of its verifying key, and an [Authorization] shows that principal signed a
//! request digest.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sealed_common::{ADDRESS_LEN, Address};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("malformed authorization: {0}")]
    Malformed(String),

    #[error("signing key does not belong to {0}")]
    WrongPrincipal(Address),

    #[error("signature does not verify")]
    BadSignature,
}

pub fn address_of(key: &VerifyingKey) -> Address {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&digest[digest.len() - ADDRESS_LEN..]);
    Address::from(bytes)
}

/// A principal's signature over a 32 byte request digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    #[serde(with = "hex")]
    pub public_key: [u8; PUBLIC_KEY_LEN],
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
}

impl Authorization {
    pub fn sign(signer: &SigningKey, digest: &[u8; 32]) -> Self {
        Authorization {
            public_key: signer.verifying_key().to_bytes(),
            signature: signer.sign(digest).to_bytes().to_vec(),
        }
    }

    /// `public key (32 bytes) || signature (64 bytes)`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_KEY_LEN + self.signature.len());
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AuthError> {
        if bytes.len() != PUBLIC_KEY_LEN + SIGNATURE_LEN {
            return Err(AuthError::Malformed(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LEN + SIGNATURE_LEN,
                bytes.len()
            )));
        }
        let (key, signature) = bytes.split_at(PUBLIC_KEY_LEN);
        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        public_key.copy_from_slice(key);
        Ok(Authorization {
            public_key,
            signature: signature.to_vec(),
        })
    }

    /// Succeeds only if the key hashes to `principal` and signed `digest`.
    pub fn verify(&self, principal: &Address, digest: &[u8; 32]) -> Result<(), AuthError> {
        let key = VerifyingKey::from_bytes(&self.public_key)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        if address_of(&key) != *principal {
            return Err(AuthError::WrongPrincipal(*principal));
        }
        let signature =
            Signature::from_slice(&self.signature).map_err(|e| AuthError::Malformed(e.to_string()))?;
        key.verify_strict(digest, &signature)
            .map_err(|_| AuthError::BadSignature)
    }
}
