//! The ChaCha20 keystream (RFC 8439 block function, 96 bit nonce, 32 bit counter).
//!
//! ## Important Notice
//!
//! This is the bare stream cipher, no Poly1305 tag. Integrity of the stored ciphertext is
//! the ledger's job; confidentiality rests entirely on never reusing a (key, nonce) pair.

use crate::{BLOCK_LEN, CipherError, KEY_LEN, NONCE_LEN};

/// "expand 32-byte k" as little-endian words.
const CONSTANTS: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

/// Number of blocks a single (key, nonce) pair can cover.
const MAX_BLOCKS: u64 = 1 << 32;

#[inline(always)]
fn quarter_round(state: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    state[a] = state[a].wrapping_add(state[b]);
    state[d] = (state[d] ^ state[a]).rotate_left(16);

    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_left(12);

    state[a] = state[a].wrapping_add(state[b]);
    state[d] = (state[d] ^ state[a]).rotate_left(8);

    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_left(7);
}

fn double_round(state: &mut [u32; 16]) {
    // columns
    quarter_round(state, 0, 4, 8, 12);
    quarter_round(state, 1, 5, 9, 13);
    quarter_round(state, 2, 6, 10, 14);
    quarter_round(state, 3, 7, 11, 15);
    // diagonals
    quarter_round(state, 0, 5, 10, 15);
    quarter_round(state, 1, 6, 11, 12);
    quarter_round(state, 2, 7, 8, 13);
    quarter_round(state, 3, 4, 9, 14);
}

fn load_le(bytes: &[u8], words: &mut [u32]) {
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

/// Produce the 64 byte keystream block for `counter`.
pub fn keystream_block(
    key: &[u8; KEY_LEN],
    counter: u32,
    nonce: &[u8; NONCE_LEN],
) -> [u8; BLOCK_LEN] {
    let mut initial = [0u32; 16];
    initial[..4].copy_from_slice(&CONSTANTS);
    load_le(key, &mut initial[4..12]);
    initial[12] = counter;
    load_le(nonce, &mut initial[13..16]);

    let mut state = initial;
    for _ in 0..10 {
        double_round(&mut state);
    }

    let mut out = [0u8; BLOCK_LEN];
    for ((chunk, word), init) in out.chunks_exact_mut(4).zip(&state).zip(&initial) {
        chunk.copy_from_slice(&word.wrapping_add(*init).to_le_bytes());
    }
    out
}

/// Encrypt or decrypt a buffer in place, starting at block counter 0.
///
/// Applying it twice with the same key and nonce restores the input.
pub fn apply_keystream(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    buffer: &mut [u8],
) -> Result<(), CipherError> {
    if buffer.len().div_ceil(BLOCK_LEN) as u64 > MAX_BLOCKS {
        return Err(CipherError::StreamTooLong(buffer.len()));
    }
    for (counter, chunk) in buffer.chunks_mut(BLOCK_LEN).enumerate() {
        let block = keystream_block(key, counter as u32, nonce);
        for (byte, ks) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= ks;
        }
    }
    Ok(())
}

/// Slice based entry point for callers that hold key material of unchecked length.
///
/// Fails with [CipherError::InvalidKeyMaterial] unless `key` is 32 bytes and `nonce` 12.
pub fn stream_apply(key: &[u8], nonce: &[u8], data: &[u8]) -> Result<Vec<u8>, CipherError> {
    let invalid = || CipherError::InvalidKeyMaterial {
        key_len: key.len(),
        nonce_len: nonce.len(),
    };
    let key: &[u8; KEY_LEN] = key.try_into().map_err(|_| invalid())?;
    let nonce: &[u8; NONCE_LEN] = nonce.try_into().map_err(|_| invalid())?;

    let mut out = data.to_vec();
    apply_keystream(key, nonce, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chacha20::ChaCha20;
    use chacha20::cipher::{KeyIvInit, StreamCipher};

    fn sequential_key() -> [u8; KEY_LEN] {
        core::array::from_fn(|i| i as u8)
    }

    fn hex_block(s: &str) -> [u8; BLOCK_LEN] {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    #[test]
    fn zero_key_block_matches_rfc8439() {
        let block = keystream_block(&[0u8; KEY_LEN], 0, &[0u8; NONCE_LEN]);
        let expected = hex_block(
            "76b8e0ada0f13d90405d6ae55386bd28bdd219b8a08ded1aa836efcc8b770dc7\
             da41597c5157488d7724e03fb8d84a376a43b8f41518a11cc387b669b2ee6586",
        );
        assert_eq!(block, expected);
    }

    #[test]
    fn block_function_matches_rfc8439_section_2_3_2() {
        let nonce: [u8; NONCE_LEN] = [0, 0, 0, 0x09, 0, 0, 0, 0x4a, 0, 0, 0, 0];
        let block = keystream_block(&sequential_key(), 1, &nonce);
        let expected = hex_block(
            "10f1e7e4d13b5915500fdd1fa32071c4c7d1f4c733c068030422aa9ac3d46c4e\
             d2826446079faa0914c2d705d98b02a2b5129cd1de164eb9cbd083e8a2503c4e",
        );
        assert_eq!(block, expected);
    }

    #[test]
    fn round_trip_across_block_boundaries() {
        let key = sequential_key();
        let nonce = [7u8; NONCE_LEN];
        for len in [0usize, 1, 63, 64, 65, 1000] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let ciphertext = stream_apply(&key, &nonce, &plaintext).unwrap();
            assert_eq!(ciphertext.len(), len);
            let recovered = stream_apply(&key, &nonce, &ciphertext).unwrap();
            assert_eq!(recovered, plaintext, "len={len}");
        }
    }

    #[test]
    fn deterministic_output() {
        let key = [0x42u8; KEY_LEN];
        let nonce = [0x24u8; NONCE_LEN];
        let a = stream_apply(&key, &nonce, b"same input every time").unwrap();
        let b = stream_apply(&key, &nonce, b"same input every time").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.as_slice(), b"same input every time");
    }

    #[test]
    fn agrees_with_rustcrypto_chacha20() {
        let key = [0x5au8; KEY_LEN];
        let nonce: [u8; NONCE_LEN] = core::array::from_fn(|i| (i * 17) as u8);
        let plaintext: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();

        let mut reference = plaintext.clone();
        let mut cipher = ChaCha20::new((&key).into(), (&nonce).into());
        cipher.apply_keystream(&mut reference);

        assert_eq!(stream_apply(&key, &nonce, &plaintext).unwrap(), reference);
    }

    #[test]
    fn rejects_wrong_key_material() {
        let err = stream_apply(&[0u8; 31], &[0u8; NONCE_LEN], b"x").unwrap_err();
        assert_eq!(
            err,
            CipherError::InvalidKeyMaterial {
                key_len: 31,
                nonce_len: 12
            }
        );
        let err = stream_apply(&[0u8; KEY_LEN], &[0u8; 8], b"x").unwrap_err();
        assert!(matches!(err, CipherError::InvalidKeyMaterial { nonce_len: 8, .. }));
    }
}
