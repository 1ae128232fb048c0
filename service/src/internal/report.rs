use core::fmt;
use core::str::FromStr;

use sealed_common::Address;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::coprocessor::{ExternalInput, InputProof, ProtectedHandle};

/// Zero based, dense, never reused.
pub type ReportId = u64;

/// A stored report. Everything but `status` is fixed at creation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Report {
    pub id: ReportId,
    pub reporter: Address,
    pub title: String,
    /// `nonce (12 bytes) || ciphertext`
    pub encrypted_data: Vec<u8>,
    /// The one-time password, held by the protected computation service.
    pub encrypted_key: ProtectedHandle,
    /// Unix seconds, strictly positive.
    pub created_at: u64,
    pub status: ReportStatus,
}

impl Report {
    pub fn meta(&self) -> ReportMeta {
        ReportMeta {
            reporter: self.reporter,
            title: self.title.clone(),
            created_at: self.created_at,
            status: self.status,
        }
    }
}

/// Lifecycle of a [Report].
///
/// Transitions are not ordered: the reporter may set any value at any time,
/// including moving a resolved report back to pending.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Pending,
    Reviewed,
    Resolved,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Reviewed => "reviewed",
            ReportStatus::Resolved => "resolved",
        };
        f.write_str(s)
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ReportStatus::Pending),
            "reviewed" => Ok(ReportStatus::Reviewed),
            "resolved" => Ok(ReportStatus::Resolved),
            other => Err(format!("unknown report status {other:?}")),
        }
    }
}

const STATUS_TAG: &[u8] = b"sealed-reports:status:v1";

/// What a reporter signs to set `status` on report `id` of the ledger `contract`.
pub fn status_update_digest(contract: &Address, id: ReportId, status: ReportStatus) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(STATUS_TAG);
    hasher.update(contract);
    hasher.update(id.to_be_bytes());
    hasher.update(status.to_string());
    hasher.finalize().into()
}

/// Public metadata of a report; never includes ciphertext or the key handle.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ReportMeta {
    pub reporter: Address,
    pub title: String,
    pub created_at: u64,
    pub status: ReportStatus,
}

/// Everything a reporter sends to create a report.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubmitReport {
    pub title: String,
    #[serde(with = "hex")]
    pub encrypted_data: Vec<u8>,
    /// The password, encrypted for the protected computation service.
    pub input: ExternalInput,
    pub proof: InputProof,
}

/// Notifications for external observers and indexers.
///
/// Published only after the change is committed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    ReportCreated {
        id: ReportId,
        reporter: Address,
        title: String,
        created_at: u64,
    },
    StatusChanged {
        id: ReportId,
        status: ReportStatus,
    },
}
