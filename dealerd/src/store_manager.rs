use std::net::IpAddr;
use std::thread;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::types::{
    AddressFamily, CompletionOutcome, ServerList, TableType, WorkGrant, WorkResult,
};
use crate::config::MirrorConfig;
use crate::listing::{build_server_list, hash};
use crate::mirror::db::MirrorDb;
use crate::store::model::{NewRecord, Record};
use crate::store::{NewImport, Store, StoreCounts};

/// What a worker may be dealt, in preference order.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub afs: Vec<AddressFamily>,
    pub tables: Vec<TableType>,
    pub now: i64,
    pub monitor_frequency: i64,
}

/// Service groups found by an import probe.
#[derive(Debug, Clone)]
pub struct ServiceBatch {
    pub groups: Vec<(AddressFamily, Vec<NewRecord>)>,
    /// Import status to complete once the groups are in
    pub import_status: Option<u64>,
    pub now: i64,
}

/// Commands sent to the store thread
pub enum StoreCommand {
    Allocate(WorkRequest, oneshot::Sender<Result<Option<WorkGrant>>>),
    Complete(Vec<WorkResult>, i64, oneshot::Sender<Vec<CompletionOutcome>>),
    InsertServices(ServiceBatch, oneshot::Sender<Result<Vec<u64>>>),
    InsertImport(NewImport, i64, oneshot::Sender<Result<Record>>),
    ResolveAlias {
        alias_id: u64,
        ip: IpAddr,
        now: i64,
        reply: oneshot::Sender<Result<usize>>,
    },
    Counts(oneshot::Sender<StoreCounts>),
    Refresh(DateTime<Utc>, oneshot::Sender<Result<()>>),
    Persist(oneshot::Sender<Result<()>>),
    Shutdown,
}

/// Owns the store and its mirror on one thread. Commands are applied one
/// at a time, so each is atomic with respect to every other caller.
struct StoreWorker {
    store: Store,
    mirror: MirrorDb,
    list_tx: watch::Sender<ServerList>,
    hash_tx: watch::Sender<String>,
    /// Mutated since the last successful persist
    dirty: bool,
}

impl StoreWorker {
    fn allocate(&mut self, req: WorkRequest) -> Result<Option<WorkGrant>> {
        let Some(group) = self
            .store
            .allocate(&req.afs, &req.tables, req.now, req.monitor_frequency)?
        else {
            return Ok(None);
        };
        self.dirty = true;
        Ok(Some(self.store.work_grant(&group)?))
    }

    fn complete(&mut self, results: Vec<WorkResult>, now: i64) -> Vec<CompletionOutcome> {
        results
            .into_iter()
            .map(|result| {
                let at_time = result.t.unwrap_or(now);
                match self.store.complete(result.is_success, result.status_id, at_time) {
                    Ok(()) => {
                        self.dirty = true;
                        CompletionOutcome {
                            status_id: result.status_id,
                            ok: true,
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(status_id = result.status_id, "Rejected completion: {}", e);
                        CompletionOutcome {
                            status_id: result.status_id,
                            ok: false,
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .collect()
    }

    /// Groups that collide with known services are skipped; the rest go in.
    fn insert_services(&mut self, batch: ServiceBatch) -> Result<Vec<u64>> {
        let mut group_ids = Vec::new();
        for (af, members) in batch.groups {
            match self.store.insert_service_group(af, members, batch.now) {
                Ok(group_id) => {
                    self.dirty = true;
                    group_ids.push(group_id);
                }
                Err(e) => tracing::warn!("Skipped service group: {}", e),
            }
        }

        if let Some(status_id) = batch.import_status {
            self.store
                .complete(!group_ids.is_empty(), status_id, batch.now)
                .with_context(|| format!("Failed to complete import status {}", status_id))?;
            self.dirty = true;
        }
        Ok(group_ids)
    }

    fn refresh(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.store.refresh_scores();
        let list = build_server_list(&self.store, now);
        let new_hash = hash::compute_hash(&list)?;
        if *self.hash_tx.borrow() != new_hash {
            tracing::debug!("Server list changed: {}", new_hash);
            self.hash_tx.send_replace(new_hash);
        }
        self.list_tx.send_replace(list);
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.mirror.replace_snapshot(&self.store.snapshot())?;
        self.dirty = false;
        tracing::debug!("Mirrored store to disk");
        Ok(())
    }
}

/// Handle to interact with the store thread
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn the store thread, which takes ownership of `store` and `mirror`
    pub fn spawn(
        store: Store,
        mirror: MirrorDb,
        list_tx: watch::Sender<ServerList>,
        hash_tx: watch::Sender<String>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);
        let mut worker = StoreWorker {
            store,
            mirror,
            list_tx,
            hash_tx,
            dirty: false,
        };

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::Allocate(req, reply) => {
                        let _ = reply.send(worker.allocate(req));
                    }
                    StoreCommand::Complete(results, now, reply) => {
                        let _ = reply.send(worker.complete(results, now));
                    }
                    StoreCommand::InsertServices(batch, reply) => {
                        let _ = reply.send(worker.insert_services(batch));
                    }
                    StoreCommand::InsertImport(import, now, reply) => {
                        let result: Result<Record> = worker.store.insert_import(import, now).map_err(Into::into);
                        if result.is_ok() {
                            worker.dirty = true;
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::ResolveAlias { alias_id, ip, now, reply } => {
                        let result: Result<usize> = worker.store.resolve_alias(alias_id, ip, now).map_err(Into::into);
                        if result.is_ok() {
                            worker.dirty = true;
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::Counts(reply) => {
                        let _ = reply.send(worker.store.counts());
                    }
                    StoreCommand::Refresh(now, reply) => {
                        let _ = reply.send(worker.refresh(now));
                    }
                    StoreCommand::Persist(reply) => {
                        let _ = reply.send(worker.persist());
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Deal the next due group, if any
    pub async fn allocate(&self, req: WorkRequest) -> Result<Option<WorkGrant>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Allocate(req, reply)).await?;
        rx.await?
    }

    /// Apply check results; each one succeeds or fails on its own
    pub async fn complete(&self, results: Vec<WorkResult>, now: i64) -> Result<Vec<CompletionOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Complete(results, now, reply)).await?;
        Ok(rx.await?)
    }

    pub async fn insert_services(&self, batch: ServiceBatch) -> Result<Vec<u64>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::InsertServices(batch, reply)).await?;
        rx.await?
    }

    pub async fn insert_import(&self, import: NewImport, now: i64) -> Result<Record> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::InsertImport(import, now, reply)).await?;
        rx.await?
    }

    /// Returns how many records took the new IP
    pub async fn resolve_alias(&self, alias_id: u64, ip: IpAddr, now: i64) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::ResolveAlias { alias_id, ip, now, reply })
            .await?;
        rx.await?
    }

    pub async fn counts(&self) -> Result<StoreCounts> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Counts(reply)).await?;
        Ok(rx.await?)
    }

    /// Rescore and republish the ranked listing and its hash
    pub async fn refresh(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Refresh(Utc::now(), reply)).await?;
        rx.await?
    }

    /// Mirror the store to SQLite if anything changed since the last persist
    pub async fn persist(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Persist(reply)).await?;
        rx.await?
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(StoreCommand::Shutdown).await?;
        Ok(())
    }
}

/// Periodic listing refresh and mirroring, until cancelled.
pub async fn run(store: StoreHandle, config: MirrorConfig, cancel: CancellationToken) -> Result<()> {
    let mut refresh_interval = tokio::time::interval(
        std::time::Duration::from_secs(config.refresh_interval_secs)
    );

    loop {
        tokio::select! {
            _ = refresh_interval.tick() => {
                if let Err(e) = store.refresh().await {
                    tracing::error!("Failed to refresh server list: {:#}", e);
                }
                if let Err(e) = store.persist().await {
                    tracing::error!("Failed to mirror store: {:#}", e);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Store manager shutting down");
                break;
            }
        }
    }

    Ok(())
}
