//! JSON-RPC surface of the report ledger.

pub mod coprocessor;
pub mod reports;

use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::{ErrorObject, ErrorObjectOwned};
use serde::{Deserialize, Serialize};

use crate::{CoprocessorError, LocalCoprocessor, ReportError, ReportLedger};
use coprocessor::{CoprocessorServer, CoprocessorServerImpl};
use reports::{ReportEventsServer, ReportsServer, ReportsServerImpl};

pub const STORAGE_ERROR_CODE: i32 = -32000;
pub const INVALID_INPUT_CODE: i32 = -32001;
pub const INVALID_PROOF_CODE: i32 = -32002;
pub const PERMISSION_DENIED_CODE: i32 = -32003;
pub const NOT_FOUND_CODE: i32 = -32004;
pub const COPROCESSOR_ERROR_CODE: i32 = -32010;

/// Raw bytes carried as a hex string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HexBytes(#[serde(with = "hex")] pub Vec<u8>);

impl From<ReportError> for ErrorObjectOwned {
    fn from(e: ReportError) -> Self {
        let code = match &e {
            ReportError::InvalidInput(_) => INVALID_INPUT_CODE,
            ReportError::InvalidProof(_) => INVALID_PROOF_CODE,
            ReportError::NotFound(_) => NOT_FOUND_CODE,
            ReportError::PermissionDenied { .. } => PERMISSION_DENIED_CODE,
            ReportError::Coprocessor(_) => COPROCESSOR_ERROR_CODE,
            ReportError::Storage(_) => STORAGE_ERROR_CODE,
        };
        ErrorObject::owned(code, e.to_string(), None::<()>)
    }
}

impl From<CoprocessorError> for ErrorObjectOwned {
    fn from(e: CoprocessorError) -> Self {
        let code = match &e {
            CoprocessorError::InvalidProof
            | CoprocessorError::MalformedInput(_)
            | CoprocessorError::Replayed(_) => INVALID_PROOF_CODE,
            CoprocessorError::Unauthorized { .. } | CoprocessorError::AccessDenied { .. } => {
                PERMISSION_DENIED_CODE
            }
            CoprocessorError::UnknownHandle(_) => NOT_FOUND_CODE,
            CoprocessorError::Storage(_) => COPROCESSOR_ERROR_CODE,
        };
        ErrorObject::owned(code, e.to_string(), None::<()>)
    }
}

/// Bind `addr` and serve the ledger, its event stream and the local coprocessor.
///
/// Returns the bound address (useful with port 0) and a handle to stop the server.
pub async fn start_server(
    addr: SocketAddr,
    ledger: Arc<ReportLedger>,
    coprocessor: Arc<LocalCoprocessor>,
) -> anyhow::Result<(SocketAddr, ServerHandle)> {
    let server = Server::builder().build(addr).await?;
    let addr = server.local_addr()?;

    let reports = ReportsServerImpl::new(ledger);
    let mut module = ReportsServer::into_rpc(reports.clone());
    module.merge(ReportEventsServer::into_rpc(reports))?;
    module.merge(CoprocessorServer::into_rpc(CoprocessorServerImpl::new(
        coprocessor,
    )))?;

    let handle = server.start(module);
    Ok((addr, handle))
}
