//! Session Ledger service: per-worker ledgers cached in memory and written
//! through to one compact JSON document per worker.

use std::collections::HashMap;
use std::path::PathBuf;

use hbmon_core::{Figures, LedgerRow, WorkerId, WorkerLedger};

use crate::error::{LoadWarning, StoreError};
use crate::layout::{Encoding, StoreLayout, list_documents, read_document, write_document};

pub struct SessionLedger {
    layout: StoreLayout,
    cache: HashMap<WorkerId, WorkerLedger>,
}

impl SessionLedger {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            cache: HashMap::new(),
        }
    }

    /// Load every persisted ledger into the cache. Corrupt documents are
    /// skipped and returned as warnings; only a failure to list the store
    /// directory is an error.
    pub fn load_all(&mut self) -> Result<Vec<LoadWarning>, StoreError> {
        let (ledgers, warnings) = self.read_persisted()?;
        for (worker_id, ledger) in ledgers {
            self.cache.insert(worker_id, ledger);
        }
        for warning in &warnings {
            tracing::warn!(path = %warning.path.display(), "skipping ledger: {}", warning.error);
        }
        Ok(warnings)
    }

    /// Decode every persisted ledger straight from disk, bypassing the cache.
    pub fn read_persisted(
        &self,
    ) -> Result<(Vec<(WorkerId, WorkerLedger)>, Vec<LoadWarning>), StoreError> {
        let mut ledgers = Vec::new();
        let mut warnings = Vec::new();
        for (worker_id, path) in list_documents(&self.layout.telemetry_dir())? {
            match read_document::<WorkerLedger>(&path) {
                Ok(Some(ledger)) => ledgers.push((worker_id, ledger)),
                Ok(None) => {}
                Err(error) => warnings.push(LoadWarning { path, error }),
            }
        }
        Ok((ledgers, warnings))
    }

    /// The worker's ledger, loading it from disk on first use. `None` when
    /// the worker has neither a cached ledger nor a document.
    pub fn ledger(&mut self, worker_id: &WorkerId) -> Result<Option<&WorkerLedger>, StoreError> {
        if !self.cache.contains_key(worker_id) {
            let path = self.layout.telemetry_path(worker_id);
            match read_document::<WorkerLedger>(&path)? {
                Some(ledger) => {
                    self.cache.insert(worker_id.clone(), ledger);
                }
                None => return Ok(None),
            }
        }
        Ok(self.cache.get(worker_id))
    }

    /// Like [`SessionLedger::ledger`], creating an empty ledger for unseen workers.
    fn load_or_create(&mut self, worker_id: &WorkerId) -> Result<&mut WorkerLedger, StoreError> {
        if !self.cache.contains_key(worker_id) {
            let path = self.layout.telemetry_path(worker_id);
            let ledger = read_document::<WorkerLedger>(&path)?.unwrap_or_default();
            self.cache.insert(worker_id.clone(), ledger);
        }
        Ok(self.cache.entry(worker_id.clone()).or_default())
    }

    /// Append a row for `counters` and persist the worker's whole ledger.
    ///
    /// The cached ledger is left untouched if the write fails.
    pub fn record(
        &mut self,
        worker_id: &WorkerId,
        counters: Vec<u64>,
        now_secs: u64,
    ) -> Result<LedgerRow, StoreError> {
        let path = self.layout.telemetry_path(worker_id);
        let ledger = self.load_or_create(worker_id)?;
        let len = ledger.len();
        let row = ledger.record(counters, now_secs).clone();
        if let Err(e) = write_document(&path, &*ledger, Encoding::Compact) {
            ledger.truncate(len);
            return Err(e);
        }
        Ok(row)
    }

    pub fn current(&mut self, worker_id: &WorkerId) -> Result<Option<Figures<u64>>, StoreError> {
        Ok(self.ledger(worker_id)?.and_then(WorkerLedger::current))
    }

    pub fn lifetime(&mut self, worker_id: &WorkerId) -> Result<Option<Figures<i64>>, StoreError> {
        Ok(self.ledger(worker_id)?.and_then(WorkerLedger::lifetime))
    }

    pub fn max_session_elapsed(&mut self, worker_id: &WorkerId) -> Result<Option<u64>, StoreError> {
        Ok(self.ledger(worker_id)?.and_then(WorkerLedger::max_session_elapsed))
    }

    pub fn max_session_acquired(&mut self, worker_id: &WorkerId) -> Result<Option<u64>, StoreError> {
        Ok(self.ledger(worker_id)?.and_then(WorkerLedger::max_session_acquired))
    }

    /// Cached ledger without touching disk.
    pub fn cached(&self, worker_id: &WorkerId) -> Option<&WorkerLedger> {
        self.cache.get(worker_id)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop a worker from the cache; its document is not touched.
    pub fn evict(&mut self, worker_id: &WorkerId) -> Option<WorkerLedger> {
        self.cache.remove(worker_id)
    }

    pub fn document_path(&self, worker_id: &WorkerId) -> PathBuf {
        self.layout.telemetry_path(worker_id)
    }
}
