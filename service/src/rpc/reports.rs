use std::sync::Arc;

use jsonrpsee::core::{StringError, async_trait};
use jsonrpsee::{PendingSubscriptionSink, SubscriptionMessage};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use log::{debug, warn};
use sealed_common::Address;
use tokio::sync::broadcast::error::RecvError;

use super::HexBytes;
use crate::{
    Authorization, ProtectedHandle, ReportError, ReportId, ReportLedger, ReportMeta, ReportStatus,
    SubmitReport, status_update_digest,
};

/// Result type for [`ReportEventsServer::reports_subscribe`].
pub type SubcriptionResult = Result<(), StringError>;

#[rpc(server, client)]
pub trait Reports {
    /// Submit stores a new report for `caller` and returns its id.
    ///
    /// `caller` is proven by the input proof inside `report`, which only the holder of
    /// the caller's signing key can produce.
    #[method(name = "reports.Submit")]
    async fn reports_submit(
        &self,
        caller: Address,
        report: SubmitReport,
    ) -> Result<ReportId, ErrorObjectOwned>;

    /// Count returns the number of reports ever created.
    #[method(name = "reports.Count")]
    async fn reports_count(&self) -> Result<u64, ErrorObjectOwned>;

    /// CountByReporter returns how many reports `reporter` has submitted.
    #[method(name = "reports.CountByReporter")]
    async fn reports_count_by_reporter(&self, reporter: Address) -> Result<u64, ErrorObjectOwned>;

    /// IdsByReporter returns the ids `reporter` has submitted, oldest first.
    #[method(name = "reports.IdsByReporter")]
    async fn reports_ids_by_reporter(
        &self,
        reporter: Address,
    ) -> Result<Vec<ReportId>, ErrorObjectOwned>;

    /// Meta returns reporter, title, creation time and status of a report.
    #[method(name = "reports.Meta")]
    async fn reports_meta(&self, id: ReportId) -> Result<ReportMeta, ErrorObjectOwned>;

    /// Data returns the `nonce || ciphertext` blob of a report.
    #[method(name = "reports.Data")]
    async fn reports_data(&self, id: ReportId) -> Result<HexBytes, ErrorObjectOwned>;

    /// EncryptedKey returns the protected handle of a report's one-time password.
    #[method(name = "reports.EncryptedKey")]
    async fn reports_encrypted_key(
        &self,
        id: ReportId,
    ) -> Result<ProtectedHandle, ErrorObjectOwned>;

    /// UpdateStatus sets the status of a report; only its reporter may call it.
    ///
    /// `authorization` is the caller's signature over [status_update_digest]. A signed
    /// update can be replayed, which only re-applies a status the reporter chose.
    #[method(name = "reports.UpdateStatus")]
    async fn reports_update_status(
        &self,
        caller: Address,
        id: ReportId,
        status: ReportStatus,
        authorization: Authorization,
    ) -> Result<(), ErrorObjectOwned>;

    /// Contract returns the address this ledger signs requests under.
    #[method(name = "reports.Contract")]
    async fn reports_contract(&self) -> Result<Address, ErrorObjectOwned>;
}

#[rpc(server)]
pub trait ReportEvents {
    /// Subscribe streams [LedgerEvent]s committed after the subscription starts.
    #[subscription(name = "reports.Subscribe", unsubscribe = "reports.Unsubscribe", item = crate::LedgerEvent)]
    async fn reports_subscribe(&self) -> SubcriptionResult;
}

#[derive(Clone)]
pub struct ReportsServerImpl {
    ledger: Arc<ReportLedger>,
}

impl ReportsServerImpl {
    pub fn new(ledger: Arc<ReportLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ReportsServer for ReportsServerImpl {
    async fn reports_submit(
        &self,
        caller: Address,
        report: SubmitReport,
    ) -> Result<ReportId, ErrorObjectOwned> {
        Ok(self.ledger.submit_report(caller, report).await?)
    }

    async fn reports_count(&self) -> Result<u64, ErrorObjectOwned> {
        Ok(self.ledger.report_count()?)
    }

    async fn reports_count_by_reporter(&self, reporter: Address) -> Result<u64, ErrorObjectOwned> {
        Ok(self.ledger.report_count_by_reporter(&reporter)?)
    }

    async fn reports_ids_by_reporter(
        &self,
        reporter: Address,
    ) -> Result<Vec<ReportId>, ErrorObjectOwned> {
        Ok(self.ledger.report_ids_by_reporter(&reporter)?)
    }

    async fn reports_meta(&self, id: ReportId) -> Result<ReportMeta, ErrorObjectOwned> {
        Ok(self.ledger.report_meta(id)?)
    }

    async fn reports_data(&self, id: ReportId) -> Result<HexBytes, ErrorObjectOwned> {
        Ok(HexBytes(self.ledger.report_data(id)?))
    }

    async fn reports_encrypted_key(
        &self,
        id: ReportId,
    ) -> Result<ProtectedHandle, ErrorObjectOwned> {
        Ok(self.ledger.encrypted_key(id)?)
    }

    async fn reports_update_status(
        &self,
        caller: Address,
        id: ReportId,
        status: ReportStatus,
        authorization: Authorization,
    ) -> Result<(), ErrorObjectOwned> {
        let digest = status_update_digest(&self.ledger.contract(), id, status);
        if let Err(e) = authorization.verify(&caller, &digest) {
            warn!("#{id} - Unsigned status update for {caller}: {e}");
            return Err(ReportError::PermissionDenied { id, caller }.into());
        }
        Ok(self.ledger.update_report_status(caller, id, status).await?)
    }

    async fn reports_contract(&self) -> Result<Address, ErrorObjectOwned> {
        Ok(self.ledger.contract())
    }
}

#[async_trait]
impl ReportEventsServer for ReportsServerImpl {
    async fn reports_subscribe(&self, pending: PendingSubscriptionSink) -> SubcriptionResult {
        let mut events = self.ledger.subscribe();
        let sink = pending.accept().await?;
        debug!("Event subscriber attached");

        loop {
            tokio::select! {
                _ = sink.closed() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        let msg = SubscriptionMessage::from_json(&event)?;
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Event subscriber lagging, {missed} event(s) dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        debug!("Event subscriber detached");
        Ok(())
    }
}
