//! Encrypted report ledger: stores reporter-encrypted reports and hands the one-time
//! password of each report to a protected computation service, readable only by the
//! ledger and the reporter.

mod internal;
pub mod rpc;

pub use internal::config::{ConfigError, ServiceConfig};
pub use internal::coprocessor::{
    CoprocessorError, DecryptRequest, ExternalInput, HANDLE_LEN, INPUT_LEN, InputProof,
    LocalCoprocessor, ProtectedCompute, ProtectedHandle, encrypt_input, open_disclosure,
    request_disclosure,
};
pub use internal::envelope::X25519_KEY_LEN;
pub use internal::error::ReportError;
pub use internal::identity::{AuthError, Authorization, address_of};
pub use internal::ledger::ReportLedger;
pub use internal::report::{
    LedgerEvent, Report, ReportId, ReportMeta, ReportStatus, SubmitReport, status_update_digest,
};
