use crate::{
    LedgerEvent, ProtectedCompute, ProtectedHandle, Report, ReportError, ReportId, ReportMeta,
    ReportStatus, SubmitReport,
};

use log::{debug, error, info, warn};
use sealed_common::{ADDRESS_LEN, Address};
use sled::transaction::ConflictableTransactionError;
use sled::{IVec, Transactional, Tree as SledTree};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, broadcast};

const REPORT_COUNT_KEY: &[u8] = b"report_count";

type TxError = ConflictableTransactionError<ReportError>;

/// The report store: an append-only sequence of [Report]s addressed by id, plus a
/// reporter -> ids index.
///
/// Submissions and status updates are serialized behind one writer lock and land as a
/// single sled transaction, so readers never see a half written report.
pub struct ReportLedger {
    /// Identity of this ledger towards the protected computation service.
    contract: Address,
    coprocessor: Arc<dyn ProtectedCompute>,
    reports_db: SledTree,
    /// Keys are `reporter (20 bytes) || id (8 bytes, big endian)`, values empty.
    index_db: SledTree,
    meta_db: SledTree,
    write_gate: Mutex<()>,
    events: broadcast::Sender<LedgerEvent>,
}

impl ReportLedger {
    pub fn open(
        db: &sled::Db,
        contract: Address,
        coprocessor: Arc<dyn ProtectedCompute>,
        event_capacity: usize,
    ) -> Result<Self, ReportError> {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let ledger = ReportLedger {
            contract,
            coprocessor,
            reports_db: db.open_tree("reports").map_err(ReportError::storage)?,
            index_db: db.open_tree("reporter_index").map_err(ReportError::storage)?,
            meta_db: db.open_tree("ledger_meta").map_err(ReportError::storage)?,
            write_gate: Mutex::new(()),
            events,
        };
        info!(
            "Report ledger for {contract} opened with {} report(s)",
            ledger.report_count()?
        );
        Ok(ledger)
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Store a new report for `caller` and return its id.
    ///
    /// The encrypted password is ingested and access is granted to this ledger and to
    /// `caller` before anything is written. Any later failure discards the ingested value
    /// again, leaving neither the store nor the coprocessor changed.
    pub async fn submit_report(
        &self,
        caller: Address,
        request: SubmitReport,
    ) -> Result<ReportId, ReportError> {
        if request.title.is_empty() {
            return Err(ReportError::InvalidInput("title empty".into()));
        }
        if request.encrypted_data.is_empty() {
            return Err(ReportError::InvalidInput("data empty".into()));
        }

        let _writer = self.write_gate.lock().await;
        debug!("{caller} - Ingesting encrypted password");

        let handle = self
            .coprocessor
            .ingest(&request.input, &request.proof, &self.contract, &caller)
            .await
            .map_err(|e| {
                warn!("{caller} - Rejected submission: {e}");
                ReportError::from(e)
            })?;
        let stored = self.store_report(caller, handle, &request).await;
        let (id, created_at) = match stored {
            Ok(stored) => stored,
            Err(e) => {
                if let Err(discard) = self.coprocessor.discard(&handle).await {
                    error!("{handle} - Could not discard after failed submission: {discard}");
                }
                warn!("{caller} - Submission rolled back: {e}");
                return Err(e);
            }
        };
        let SubmitReport { title, .. } = request;

        info!("#{id} - Report stored for {caller}");
        self.publish(LedgerEvent::ReportCreated {
            id,
            reporter: caller,
            title,
            created_at,
        });
        Ok(id)
    }

    /// Everything after ingestion: access grants and the store transaction.
    async fn store_report(
        &self,
        caller: Address,
        handle: ProtectedHandle,
        request: &SubmitReport,
    ) -> Result<(ReportId, u64), ReportError> {
        self.coprocessor
            .grant_access(&handle, &self.contract)
            .await?;
        self.coprocessor.grant_access(&handle, &caller).await?;

        let created_at = unix_timestamp()?;
        let id = (&self.reports_db, &self.index_db, &self.meta_db)
            .transaction(|(reports_tx, index_tx, meta_tx)| {
                let id = decode_count(meta_tx.get(REPORT_COUNT_KEY)?).map_err(TxError::Abort)?;
                let report = Report {
                    id,
                    reporter: caller,
                    title: request.title.clone(),
                    encrypted_data: request.encrypted_data.clone(),
                    encrypted_key: handle,
                    created_at,
                    status: ReportStatus::Pending,
                };
                reports_tx.insert(&id.to_be_bytes()[..], encode(&report).map_err(TxError::Abort)?)?;
                index_tx.insert(&index_key(&caller, id)[..], &b""[..])?;
                meta_tx.insert(REPORT_COUNT_KEY, &(id + 1).to_be_bytes()[..])?;
                Ok::<ReportId, TxError>(id)
            })
            .map_err(tx_error)?;
        Ok((id, created_at))
    }

    /// Set the status of report `id`. Only its reporter may do this; any status may
    /// follow any other.
    pub async fn update_report_status(
        &self,
        caller: Address,
        id: ReportId,
        status: ReportStatus,
    ) -> Result<(), ReportError> {
        let _writer = self.write_gate.lock().await;

        self.reports_db
            .transaction(|reports_tx| {
                let raw = reports_tx
                    .get(id.to_be_bytes())?
                    .ok_or(TxError::Abort(ReportError::NotFound(id)))?;
                let mut report = decode(&raw).map_err(TxError::Abort)?;
                if report.reporter != caller {
                    return Err(TxError::Abort(ReportError::PermissionDenied { id, caller }));
                }
                report.status = status;
                reports_tx.insert(&id.to_be_bytes()[..], encode(&report).map_err(TxError::Abort)?)?;
                Ok::<(), TxError>(())
            })
            .map_err(|e| {
                let e = tx_error(e);
                warn!("#{id} - Status update by {caller} refused: {e}");
                e
            })?;

        info!("#{id} - Status set to {status}");
        self.publish(LedgerEvent::StatusChanged { id, status });
        Ok(())
    }

    /// Total reports ever created.
    pub fn report_count(&self) -> Result<u64, ReportError> {
        decode_count(
            self.meta_db
                .get(REPORT_COUNT_KEY)
                .map_err(ReportError::storage)?,
        )
    }

    pub fn report_count_by_reporter(&self, reporter: &Address) -> Result<u64, ReportError> {
        self.index_db
            .scan_prefix(reporter.as_bytes())
            .keys()
            .try_fold(0u64, |count, key| {
                key.map(|_| count + 1).map_err(ReportError::storage)
            })
    }

    /// Ids authored by `reporter`, in submission order.
    pub fn report_ids_by_reporter(&self, reporter: &Address) -> Result<Vec<ReportId>, ReportError> {
        self.index_db
            .scan_prefix(reporter.as_bytes())
            .keys()
            .map(|key| -> Result<ReportId, ReportError> {
                let key = key.map_err(ReportError::storage)?;
                let id_bytes: [u8; 8] = key[ADDRESS_LEN..].try_into().map_err(|_| {
                    ReportError::Storage(format!("corrupt reporter index key of {} bytes", key.len()))
                })?;
                Ok(u64::from_be_bytes(id_bytes))
            })
            .collect()
    }

    pub fn report_meta(&self, id: ReportId) -> Result<ReportMeta, ReportError> {
        Ok(self.report(id)?.meta())
    }

    pub fn report_data(&self, id: ReportId) -> Result<Vec<u8>, ReportError> {
        Ok(self.report(id)?.encrypted_data)
    }

    pub fn encrypted_key(&self, id: ReportId) -> Result<ProtectedHandle, ReportError> {
        Ok(self.report(id)?.encrypted_key)
    }

    pub fn report(&self, id: ReportId) -> Result<Report, ReportError> {
        let raw = self
            .reports_db
            .get(id.to_be_bytes())
            .map_err(ReportError::storage)?
            .ok_or(ReportError::NotFound(id))?;
        decode(&raw)
    }

    /// Events published from now on; earlier ones are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    pub async fn flush(&self) -> Result<(), ReportError> {
        let _writer = self.write_gate.lock().await;
        for tree in [&self.reports_db, &self.index_db, &self.meta_db] {
            tree.flush_async().await.map_err(ReportError::storage)?;
        }
        Ok(())
    }

    fn publish(&self, event: LedgerEvent) {
        // No subscribers is fine, nobody is listening yet.
        if self.events.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

fn index_key(reporter: &Address, id: ReportId) -> [u8; ADDRESS_LEN + 8] {
    let mut key = [0u8; ADDRESS_LEN + 8];
    key[..ADDRESS_LEN].copy_from_slice(reporter.as_bytes());
    key[ADDRESS_LEN..].copy_from_slice(&id.to_be_bytes());
    key
}

fn decode_count(raw: Option<IVec>) -> Result<u64, ReportError> {
    match raw {
        None => Ok(0),
        Some(bytes) => {
            let bytes: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                error!("PLEASE REPORT! Report counter is in invalid state");
                ReportError::Storage("corrupt report counter".into())
            })?;
            Ok(u64::from_be_bytes(bytes))
        }
    }
}

fn encode(report: &Report) -> Result<Vec<u8>, ReportError> {
    bincode::serialize(report).map_err(ReportError::storage)
}

fn decode(raw: &[u8]) -> Result<Report, ReportError> {
    bincode::deserialize(raw).map_err(ReportError::storage)
}

fn tx_error(e: sled::transaction::TransactionError<ReportError>) -> ReportError {
    match e {
        sled::transaction::TransactionError::Abort(e) => e,
        sled::transaction::TransactionError::Storage(e) => ReportError::storage(e),
    }
}

fn unix_timestamp() -> Result<u64, ReportError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(ReportError::storage)?
        .as_secs();
    if now == 0 {
        return Err(ReportError::Storage("system clock reads the unix epoch".into()));
    }
    Ok(now)
}
