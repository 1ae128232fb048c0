use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// Key or nonce of the wrong size was handed to the keystream.
    #[error("invalid key material: key={key_len}B (want 32), nonce={nonce_len}B (want 12)")]
    InvalidKeyMaterial { key_len: usize, nonce_len: usize },

    /// The 32 bit block counter would wrap before the data is covered.
    #[error("stream of {0} bytes exceeds the keystream length")]
    StreamTooLong(usize),

    #[error("sealed payload of {0} bytes is shorter than its nonce")]
    PayloadTooShort(usize),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
