//! The seam to the protected computation service that keeps each report's one-time
//! password encrypted, plus [LocalCoprocessor], a single node backend for development
//! and tests.
//!
//! The ledger never sees a password. Clients seal it to the service's X25519 key and
//! sign the result for a (contract, submitter) pair; only principals on the ACL can get it
//! back, re-sealed to a key of their choosing.

use core::fmt;

use ed25519_dalek::SigningKey;
use jsonrpsee::core::async_trait;
use log::{debug, warn};
use sealed_common::{ADDRESS_LEN, Address, NONCE_LEN, random_bytes};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use sled::Tree as SledTree;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

use super::envelope::{X25519_KEY_LEN, open_with, seal_to};
use super::identity::{Authorization, address_of};

pub const HANDLE_LEN: usize = 32;
/// Ephemeral key, nonce and a sealed 20 byte password.
pub const INPUT_LEN: usize = X25519_KEY_LEN + NONCE_LEN + ADDRESS_LEN;

const PROOF_TAG: &[u8] = b"sealed-reports:input-proof:v1";
const HANDLE_TAG: &[u8] = b"sealed-reports:handle:v1";
const DISCLOSURE_TAG: &[u8] = b"sealed-reports:disclosure:v1";

/// Opaque reference to a value held by the protected computation service.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtectedHandle(pub [u8; HANDLE_LEN]);

impl fmt::Display for ProtectedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ProtectedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtectedHandle({self})")
    }
}

// `0x` hex text for JSON, raw bytes for bincode.
impl Serialize for ProtectedHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for ProtectedHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            struct HexVisitor;

            impl Visitor<'_> for HexVisitor {
                type Value = ProtectedHandle;

                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("a 0x-prefixed 32 byte hex string")
                }

                fn visit_str<E: de::Error>(self, v: &str) -> Result<ProtectedHandle, E> {
                    let digits = v.strip_prefix("0x").unwrap_or(v);
                    let mut bytes = [0u8; HANDLE_LEN];
                    hex::decode_to_slice(digits, &mut bytes).map_err(E::custom)?;
                    Ok(ProtectedHandle(bytes))
                }
            }

            deserializer.deserialize_str(HexVisitor)
        } else {
            <[u8; HANDLE_LEN]>::deserialize(deserializer).map(ProtectedHandle)
        }
    }
}

/// A password sealed by a client to the service's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalInput(#[serde(with = "hex")] pub Vec<u8>);

/// The submitter's [Authorization] over `(contract, submitter, input)`, in byte form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputProof(#[serde(with = "hex")] pub Vec<u8>);

/// A signed request to have a protected value re-sealed to `reply_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptRequest {
    pub principal: Address,
    #[serde(with = "hex")]
    pub reply_key: [u8; X25519_KEY_LEN],
    pub authorization: Authorization,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoprocessorError {
    #[error("input proof does not verify")]
    InvalidProof,

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("input already ingested as {0}")]
    Replayed(ProtectedHandle),

    #[error("unknown handle {0}")]
    UnknownHandle(ProtectedHandle),

    #[error("request not signed by {principal}: {reason}")]
    Unauthorized { principal: Address, reason: String },

    #[error("{principal} may not decrypt {handle}")]
    AccessDenied {
        handle: ProtectedHandle,
        principal: Address,
    },

    #[error("storage: {0}")]
    Storage(String),
}

fn storage_err(e: impl fmt::Display) -> CoprocessorError {
    CoprocessorError::Storage(e.to_string())
}

/// What the report ledger needs from the protected computation service.
#[async_trait]
pub trait ProtectedCompute: Send + Sync {
    /// Verify `proof` against `input` and take the value into the service's custody.
    ///
    /// Nothing may be granted on the returned handle until this succeeds. An input is
    /// accepted once.
    async fn ingest(
        &self,
        input: &ExternalInput,
        proof: &InputProof,
        contract: &Address,
        submitter: &Address,
    ) -> Result<ProtectedHandle, CoprocessorError>;

    /// Allow `principal` to request decryption of `handle` later. Idempotent.
    async fn grant_access(
        &self,
        handle: &ProtectedHandle,
        principal: &Address,
    ) -> Result<(), CoprocessorError>;

    async fn is_allowed(
        &self,
        handle: &ProtectedHandle,
        principal: &Address,
    ) -> Result<bool, CoprocessorError>;

    /// Drop `handle` and every grant on it. Used to undo a submission that failed after
    /// ingestion. Idempotent.
    async fn discard(&self, handle: &ProtectedHandle) -> Result<(), CoprocessorError>;
}

/// In-process protected computation backend.
///
/// Values are stored as received, sealed to the network key. The ACL is a sled tree
/// keyed by `handle || principal`.
pub struct LocalCoprocessor {
    network_secret: StaticSecret,
    values: SledTree,
    acl: SledTree,
}

impl LocalCoprocessor {
    pub fn open(db: &sled::Db, network_secret: [u8; X25519_KEY_LEN]) -> Result<Self, CoprocessorError> {
        Ok(Self {
            network_secret: StaticSecret::from(network_secret),
            values: db.open_tree("coprocessor_values").map_err(storage_err)?,
            acl: db.open_tree("coprocessor_acl").map_err(storage_err)?,
        })
    }

    /// The key clients seal passwords to.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.network_secret)
    }

    /// Disclosure to an authorized principal: the value re-sealed to `request.reply_key`.
    pub fn user_decrypt(
        &self,
        handle: &ProtectedHandle,
        request: &DecryptRequest,
    ) -> Result<Vec<u8>, CoprocessorError> {
        let principal = request.principal;
        let digest = disclosure_digest(handle, &principal, &request.reply_key);
        request
            .authorization
            .verify(&principal, &digest)
            .map_err(|e| {
                warn!("{handle} - unsigned decryption request for {principal}: {e}");
                CoprocessorError::Unauthorized {
                    principal,
                    reason: e.to_string(),
                }
            })?;
        if !self.acl_contains(handle, &principal)? {
            warn!("{handle} - decryption refused for {principal}");
            return Err(CoprocessorError::AccessDenied {
                handle: *handle,
                principal,
            });
        }

        let stored = self
            .values
            .get(handle.0)
            .map_err(storage_err)?
            .ok_or(CoprocessorError::UnknownHandle(*handle))?;
        let password = open_with(&self.network_secret, &stored)?;
        debug!("{handle} - disclosed to {principal}");
        seal_to(&PublicKey::from(request.reply_key), &password)
    }

    fn acl_contains(
        &self,
        handle: &ProtectedHandle,
        principal: &Address,
    ) -> Result<bool, CoprocessorError> {
        self.acl
            .contains_key(acl_key(handle, principal))
            .map_err(storage_err)
    }
}

#[async_trait]
impl ProtectedCompute for LocalCoprocessor {
    async fn ingest(
        &self,
        input: &ExternalInput,
        proof: &InputProof,
        contract: &Address,
        submitter: &Address,
    ) -> Result<ProtectedHandle, CoprocessorError> {
        if input.0.len() != INPUT_LEN {
            return Err(CoprocessorError::MalformedInput(format!(
                "expected {INPUT_LEN} byte input, got {}",
                input.0.len()
            )));
        }
        let authorization =
            Authorization::from_bytes(&proof.0).map_err(|_| CoprocessorError::InvalidProof)?;
        authorization
            .verify(submitter, &proof_digest(contract, submitter, &input.0))
            .map_err(|_| CoprocessorError::InvalidProof)?;

        let mut hasher = Sha256::new();
        hasher.update(HANDLE_TAG);
        hasher.update(contract);
        hasher.update(submitter);
        hasher.update(&input.0);
        let handle = ProtectedHandle(hasher.finalize().into());

        self.values
            .compare_and_swap(handle.0, None::<&[u8]>, Some(input.0.as_slice()))
            .map_err(storage_err)?
            .map_err(|_| CoprocessorError::Replayed(handle))?;
        debug!("{handle} - ingested input from {submitter}");
        Ok(handle)
    }

    async fn grant_access(
        &self,
        handle: &ProtectedHandle,
        principal: &Address,
    ) -> Result<(), CoprocessorError> {
        if !self.values.contains_key(handle.0).map_err(storage_err)? {
            return Err(CoprocessorError::UnknownHandle(*handle));
        }
        self.acl
            .insert(acl_key(handle, principal), &b""[..])
            .map_err(storage_err)?;
        debug!("{handle} - access granted to {principal}");
        Ok(())
    }

    async fn is_allowed(
        &self,
        handle: &ProtectedHandle,
        principal: &Address,
    ) -> Result<bool, CoprocessorError> {
        self.acl_contains(handle, principal)
    }

    async fn discard(&self, handle: &ProtectedHandle) -> Result<(), CoprocessorError> {
        for key in self.acl.scan_prefix(handle.0).keys() {
            self.acl.remove(key.map_err(storage_err)?).map_err(storage_err)?;
        }
        self.values.remove(handle.0).map_err(storage_err)?;
        debug!("{handle} - discarded");
        Ok(())
    }
}

/// Client side of ingestion: seal `password` to `network_key` and sign it for
/// `contract` as the principal behind `signer`.
pub fn encrypt_input(
    network_key: &PublicKey,
    contract: &Address,
    signer: &SigningKey,
    password: &Address,
) -> Result<(ExternalInput, InputProof), CoprocessorError> {
    let submitter = address_of(&signer.verifying_key());
    let input = seal_to(network_key, password.as_bytes())?;
    let proof = Authorization::sign(signer, &proof_digest(contract, &submitter, &input));
    Ok((ExternalInput(input), InputProof(proof.to_bytes())))
}

/// Client side of disclosure: a request for `handle` signed by `signer`, and the secret
/// that opens the reply.
pub fn request_disclosure(
    signer: &SigningKey,
    handle: &ProtectedHandle,
) -> (DecryptRequest, StaticSecret) {
    let reply_secret = StaticSecret::from(random_bytes::<X25519_KEY_LEN>());
    let reply_key = PublicKey::from(&reply_secret).to_bytes();
    let principal = address_of(&signer.verifying_key());
    let authorization = Authorization::sign(
        signer,
        &disclosure_digest(handle, &principal, &reply_key),
    );
    let request = DecryptRequest {
        principal,
        reply_key,
        authorization,
    };
    (request, reply_secret)
}

/// Open the reply to a [DecryptRequest].
pub fn open_disclosure(
    reply_secret: &StaticSecret,
    sealed: &[u8],
) -> Result<Address, CoprocessorError> {
    let password = open_with(reply_secret, sealed)?;
    Address::from_slice(&password).map_err(|e| CoprocessorError::MalformedInput(e.to_string()))
}

fn proof_digest(contract: &Address, submitter: &Address, input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(PROOF_TAG);
    hasher.update(contract);
    hasher.update(submitter);
    hasher.update(input);
    hasher.finalize().into()
}

fn disclosure_digest(
    handle: &ProtectedHandle,
    principal: &Address,
    reply_key: &[u8; X25519_KEY_LEN],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DISCLOSURE_TAG);
    hasher.update(handle.0);
    hasher.update(principal);
    hasher.update(reply_key);
    hasher.finalize().into()
}

fn acl_key(handle: &ProtectedHandle, principal: &Address) -> [u8; HANDLE_LEN + ADDRESS_LEN] {
    let mut key = [0u8; HANDLE_LEN + ADDRESS_LEN];
    key[..HANDLE_LEN].copy_from_slice(&handle.0);
    key[HANDLE_LEN..].copy_from_slice(principal.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealed_common::random_password;

    const CONTRACT: Address = Address::new([0xc0; ADDRESS_LEN]);

    fn principal(seed: u8) -> (SigningKey, Address) {
        let key = SigningKey::from_bytes(&[seed; 32]);
        let address = address_of(&key.verifying_key());
        (key, address)
    }

    fn coprocessor() -> LocalCoprocessor {
        let db = sled::Config::new().temporary(true).open().unwrap();
        LocalCoprocessor::open(&db, [7u8; X25519_KEY_LEN]).unwrap()
    }

    #[tokio::test]
    async fn ingest_grant_and_decrypt() {
        let cop = coprocessor();
        let (alice_key, alice) = principal(0xa1);
        let (bob_key, bob) = principal(0xb0);
        let password = random_password();
        let (input, proof) =
            encrypt_input(&cop.public_key(), &CONTRACT, &alice_key, &password).unwrap();
        assert_eq!(input.0.len(), INPUT_LEN);
        assert!(!input.0.windows(ADDRESS_LEN).any(|w| w == password.as_bytes()));

        let handle = cop.ingest(&input, &proof, &CONTRACT, &alice).await.unwrap();
        assert!(!cop.is_allowed(&handle, &alice).await.unwrap());

        cop.grant_access(&handle, &alice).await.unwrap();
        cop.grant_access(&handle, &alice).await.unwrap();
        assert!(cop.is_allowed(&handle, &alice).await.unwrap());

        let (request, reply_secret) = request_disclosure(&alice_key, &handle);
        let reply = cop.user_decrypt(&handle, &request).unwrap();
        assert_eq!(open_disclosure(&reply_secret, &reply).unwrap(), password);

        let (request, _) = request_disclosure(&bob_key, &handle);
        let err = cop.user_decrypt(&handle, &request).unwrap_err();
        assert_eq!(
            err,
            CoprocessorError::AccessDenied {
                handle,
                principal: bob
            }
        );
    }

    #[tokio::test]
    async fn disclosure_needs_the_principals_signature() {
        let cop = coprocessor();
        let (alice_key, alice) = principal(0xa1);
        let (eve_key, _) = principal(0xee);
        let (input, proof) =
            encrypt_input(&cop.public_key(), &CONTRACT, &alice_key, &random_password()).unwrap();
        let handle = cop.ingest(&input, &proof, &CONTRACT, &alice).await.unwrap();
        cop.grant_access(&handle, &alice).await.unwrap();

        // Eve names Alice but signs with her own key.
        let (mut request, _) = request_disclosure(&eve_key, &handle);
        request.principal = alice;
        let err = cop.user_decrypt(&handle, &request).unwrap_err();
        assert!(matches!(err, CoprocessorError::Unauthorized { .. }));

        // Alice's signature does not carry over to Eve's reply key.
        let (mut request, _) = request_disclosure(&alice_key, &handle);
        let (eve_request, _) = request_disclosure(&eve_key, &handle);
        request.reply_key = eve_request.reply_key;
        let err = cop.user_decrypt(&handle, &request).unwrap_err();
        assert!(matches!(err, CoprocessorError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn proof_is_bound_to_submitter_and_contract() {
        let cop = coprocessor();
        let (alice_key, _) = principal(0xa1);
        let (_, bob) = principal(0xb0);
        let (input, proof) =
            encrypt_input(&cop.public_key(), &CONTRACT, &alice_key, &random_password()).unwrap();
        let err = cop.ingest(&input, &proof, &CONTRACT, &bob).await.unwrap_err();
        assert_eq!(err, CoprocessorError::InvalidProof);

        let (_, alice) = principal(0xa1);
        let other = Address::new([0xc1; ADDRESS_LEN]);
        let err = cop.ingest(&input, &proof, &other, &alice).await.unwrap_err();
        assert_eq!(err, CoprocessorError::InvalidProof);
    }

    #[tokio::test]
    async fn tampered_or_replayed_input_is_rejected() {
        let cop = coprocessor();
        let (alice_key, alice) = principal(0xa1);
        let (mut input, proof) =
            encrypt_input(&cop.public_key(), &CONTRACT, &alice_key, &random_password()).unwrap();
        input.0[X25519_KEY_LEN + NONCE_LEN] ^= 1;
        let err = cop.ingest(&input, &proof, &CONTRACT, &alice).await.unwrap_err();
        assert_eq!(err, CoprocessorError::InvalidProof);
        input.0[X25519_KEY_LEN + NONCE_LEN] ^= 1;

        let short = ExternalInput(vec![0u8; 4]);
        let err = cop.ingest(&short, &proof, &CONTRACT, &alice).await.unwrap_err();
        assert!(matches!(err, CoprocessorError::MalformedInput(_)));

        let handle = cop.ingest(&input, &proof, &CONTRACT, &alice).await.unwrap();
        let err = cop.ingest(&input, &proof, &CONTRACT, &alice).await.unwrap_err();
        assert_eq!(err, CoprocessorError::Replayed(handle));
    }

    #[tokio::test]
    async fn discard_drops_value_and_grants() {
        let cop = coprocessor();
        let (alice_key, alice) = principal(0xa1);
        let (input, proof) =
            encrypt_input(&cop.public_key(), &CONTRACT, &alice_key, &random_password()).unwrap();
        let handle = cop.ingest(&input, &proof, &CONTRACT, &alice).await.unwrap();
        cop.grant_access(&handle, &CONTRACT).await.unwrap();
        cop.grant_access(&handle, &alice).await.unwrap();

        cop.discard(&handle).await.unwrap();
        cop.discard(&handle).await.unwrap();
        assert!(!cop.is_allowed(&handle, &CONTRACT).await.unwrap());
        assert!(!cop.is_allowed(&handle, &alice).await.unwrap());
        assert_eq!(
            cop.grant_access(&handle, &alice).await.unwrap_err(),
            CoprocessorError::UnknownHandle(handle)
        );
    }

    #[tokio::test]
    async fn grant_on_unknown_handle_fails() {
        let cop = coprocessor();
        let (_, alice) = principal(0xa1);
        let handle = ProtectedHandle([1u8; HANDLE_LEN]);
        let err = cop.grant_access(&handle, &alice).await.unwrap_err();
        assert_eq!(err, CoprocessorError::UnknownHandle(handle));
    }

    #[test]
    fn handle_json_is_prefixed_hex() {
        let handle = ProtectedHandle([0xab; HANDLE_LEN]);
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(HANDLE_LEN)));
        assert_eq!(json.trim_matches('"'), handle.to_string());
        assert_eq!(serde_json::from_str::<ProtectedHandle>(&json).unwrap(), handle);
        let bare = format!("\"{}\"", "ab".repeat(HANDLE_LEN));
        assert_eq!(serde_json::from_str::<ProtectedHandle>(&bare).unwrap(), handle);
    }

    #[test]
    fn handle_bincode_is_raw() {
        let handle = ProtectedHandle([0xab; HANDLE_LEN]);
        let bytes = bincode::serialize(&handle).unwrap();
        assert_eq!(bytes, vec![0xab; HANDLE_LEN]);
        assert_eq!(bincode::deserialize::<ProtectedHandle>(&bytes).unwrap(), handle);
    }
}
