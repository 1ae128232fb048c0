use core::fmt;

use sealed_common::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::coprocessor::CoprocessorError;

#[derive(Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ReportError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid proof: {0}")]
    InvalidProof(String),

    #[error("Report {0} not found")]
    NotFound(u64),

    #[error("Permission denied: {caller} does not own report {id}")]
    PermissionDenied { id: u64, caller: Address },

    #[error("Protected computation: {0}")]
    Coprocessor(String),

    #[error("Storage: {0}")]
    Storage(String),
}

impl ReportError {
    pub(crate) fn storage(e: impl fmt::Display) -> Self {
        ReportError::Storage(e.to_string())
    }
}

impl From<CoprocessorError> for ReportError {
    fn from(e: CoprocessorError) -> Self {
        match e {
            CoprocessorError::InvalidProof
            | CoprocessorError::MalformedInput(_)
            | CoprocessorError::Replayed(_) => {
                ReportError::InvalidProof(e.to_string())
            }
            other => ReportError::Coprocessor(other.to_string()),
        }
    }
}

// This removes a layer of escape chars for json formatting
impl fmt::Debug for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::InvalidInput(s) => write!(f, "InvalidInput({s})"),
            ReportError::InvalidProof(s) => write!(f, "InvalidProof({s})"),
            ReportError::NotFound(id) => write!(f, "NotFound({id})"),
            ReportError::PermissionDenied { id, caller } => {
                write!(f, "PermissionDenied({id}, {caller})")
            }
            ReportError::Coprocessor(s) => write!(f, "Coprocessor({s})"),
            ReportError::Storage(s) => write!(f, "Storage({s})"),
        }
    }
}
