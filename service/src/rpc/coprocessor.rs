//! Client facing half of [LocalCoprocessor]: its public key and user decryption.
//!
//! Only meaningful for the development backend. A deployment backed by a real protected
//! computation network serves these through that network's own relayer instead.
//! Passwords never travel in the clear: clients seal them to [NetworkKey] with
//! [crate::encrypt_input] and receive disclosures sealed to their own reply key.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use x25519_dalek::PublicKey;

use super::HexBytes;
use crate::{DecryptRequest, LocalCoprocessor, ProtectedHandle};

/// X25519 public key that report passwords are sealed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkKey(#[serde(with = "hex")] pub [u8; 32]);

impl From<NetworkKey> for PublicKey {
    fn from(key: NetworkKey) -> Self {
        PublicKey::from(key.0)
    }
}

#[rpc(server, client)]
pub trait Coprocessor {
    /// PublicKey returns the key inputs must be sealed to.
    #[method(name = "coprocessor.PublicKey")]
    async fn coprocessor_public_key(&self) -> Result<NetworkKey, ErrorObjectOwned>;

    /// UserDecrypt re-seals the value behind `handle` to the reply key of a request
    /// signed by a principal that was granted access.
    #[method(name = "coprocessor.UserDecrypt")]
    async fn coprocessor_user_decrypt(
        &self,
        handle: ProtectedHandle,
        request: DecryptRequest,
    ) -> Result<HexBytes, ErrorObjectOwned>;
}

pub struct CoprocessorServerImpl {
    coprocessor: Arc<LocalCoprocessor>,
}

impl CoprocessorServerImpl {
    pub fn new(coprocessor: Arc<LocalCoprocessor>) -> Self {
        Self { coprocessor }
    }
}

#[async_trait]
impl CoprocessorServer for CoprocessorServerImpl {
    async fn coprocessor_public_key(&self) -> Result<NetworkKey, ErrorObjectOwned> {
        Ok(NetworkKey(self.coprocessor.public_key().to_bytes()))
    }

    async fn coprocessor_user_decrypt(
        &self,
        handle: ProtectedHandle,
        request: DecryptRequest,
    ) -> Result<HexBytes, ErrorObjectOwned> {
        Ok(HexBytes(self.coprocessor.user_decrypt(&handle, &request)?))
    }
}
