//! Debounced persistence of a grid to the remote API with local fallback.
//!
//! Writes go to the remote tier first. When that fails for any reason the full
//! serialized rows land in the local tier picked by the page's scope. Reads go
//! the same way round: remote, local, mirror, then caller-provided recovery rows.
//!
//! Debouncing is cancel-and-respawn: every `schedule` aborts the pending task
//! and starts a new one, so only the last state within the window is written.
//! Writes take a gate one at a time. A remote call that is already running
//! keeps the gate until it returns, even when its task was aborted, so a newer
//! state always lands after an older one.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{RemoteError, RemoteTier};
use crate::record::{RowRecord, rows_from_json};
use crate::schema::{RowVariant, StorageScope};
use crate::storage::{LocalTiers, StorageError};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);
pub const MIRROR_KEY: &str = "crossPageDataSync";
pub const SESSION_MARKER_KEY: &str = "dashboardSessionData";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("session expired, please log in again")]
    Unauthorized,
    #[error("local store failed: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to serialize rows: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Per-page persistence settings.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    pub debounce: Duration,
    /// Which local tier receives the fallback copy.
    pub scope: StorageScope,
    /// Extra key written on every save and read when the page's own key is empty.
    pub mirror_key: Option<String>,
    /// Session-tier key set on every save; when configured, loads return
    /// nothing unless it is present.
    pub session_marker: Option<String>,
    /// Whether caller-supplied recovery rows are used as the last read fallback.
    pub recovery: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            debounce: DEFAULT_DEBOUNCE,
            scope: StorageScope::Persistent,
            mirror_key: None,
            session_marker: None,
            recovery: false,
        }
    }
}

impl SyncConfig {
    /// The settings each dashboard page runs with.
    pub fn for_variant(variant: RowVariant) -> Self {
        match variant {
            RowVariant::ContractorList => SyncConfig {
                mirror_key: Some(MIRROR_KEY.to_string()),
                session_marker: Some(SESSION_MARKER_KEY.to_string()),
                recovery: true,
                ..SyncConfig::default()
            },
            RowVariant::BillTracker | RowVariant::Epbg => SyncConfig::default(),
        }
    }

    pub fn with_scope(mut self, scope: StorageScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteTarget {
    Remote,
    Local(StorageScope),
}

#[derive(Clone, Debug, PartialEq)]
pub struct WriteOutcome {
    pub target: WriteTarget,
    /// Why the remote tier was skipped, when it was.
    pub fallback_reason: Option<String>,
    pub rows: usize,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Pending,
    Saved(WriteTarget),
    Failed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    Local,
    Mirror,
    Recovery,
    Empty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoadOutcome {
    pub rows: Vec<RowRecord>,
    pub source: LoadSource,
}

struct SyncInner {
    variant: RowVariant,
    remote: Option<Arc<dyn RemoteTier>>,
    local: LocalTiers,
    config: SyncConfig,
    status: watch::Sender<SyncStatus>,
    write_gate: Arc<AsyncMutex<()>>,
    /// Bumped by every `schedule` and `flush`; a debounced write only goes out
    /// if nothing newer was requested while it waited.
    generation: AtomicU64,
}

pub struct PersistenceSynchronizer {
    inner: Arc<SyncInner>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceSynchronizer {
    pub fn new(
        variant: RowVariant,
        remote: Option<Arc<dyn RemoteTier>>,
        local: LocalTiers,
        config: SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        PersistenceSynchronizer {
            inner: Arc::new(SyncInner {
                variant,
                remote,
                local,
                config,
                status,
                write_gate: Arc::new(AsyncMutex::new(())),
                generation: AtomicU64::new(0),
            }),
            pending: Mutex::new(None),
        }
    }

    pub fn variant(&self) -> RowVariant {
        self.inner.variant
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn local(&self) -> &LocalTiers {
        &self.inner.local
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// True while a debounced write is waiting or running.
    pub fn is_pending(&self) -> bool {
        self.pending_slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Queue a write of `rows` after the debounce window. A later call before
    /// the window elapses replaces this one. Must run inside a tokio runtime.
    pub fn schedule(&self, rows: Vec<RowRecord>) {
        let mut pending = self.pending_slot();
        if let Some(handle) = pending.take() {
            handle.abort();
        }

        self.inner.status.send_replace(SyncStatus::Pending);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.config.debounce).await;
            let gate = inner.acquire_gate().await;
            if inner.generation.load(Ordering::SeqCst) != generation {
                debug!(variant = %inner.variant, "debounced save superseded");
                return;
            }
            if let Err(err) = inner.write(rows, gate).await {
                warn!(variant = %inner.variant, error = %err, "debounced save failed");
            }
        }));
    }

    /// Write now, dropping any pending debounced write. Waits for a write
    /// already in flight so `rows` is the last state to land.
    pub async fn flush(&self, rows: Vec<RowRecord>) -> Result<WriteOutcome, SyncError> {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.pending_slot().take() {
            handle.abort();
        }
        let gate = self.inner.acquire_gate().await;
        self.inner.write(rows, gate).await
    }

    /// Read the page's rows, falling back remote → local → mirror → recovery.
    pub async fn load(&self, recovery: Vec<RowRecord>) -> Result<LoadOutcome, SyncError> {
        self.inner.load(recovery).await
    }

    fn pending_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SyncInner {
    async fn acquire_gate(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.write_gate).lock_owned().await
    }

    /// Callers hold `gate` for the whole write. It travels into the blocking
    /// remote call and comes back out, so aborting the caller mid-call cannot
    /// release it early.
    async fn write(&self, rows: Vec<RowRecord>, gate: OwnedMutexGuard<()>) -> Result<WriteOutcome, SyncError> {
        let records: Vec<Value> = rows.iter().map(RowRecord::to_json).collect();
        let payload = serde_json::to_string(&records)?;
        let count = records.len();

        let (remote_result, _gate) = match &self.remote {
            Some(remote) => {
                let remote = Arc::clone(remote);
                let variant = self.variant;
                let (result, gate) = tokio::task::spawn_blocking(move || {
                    let result = remote.save(variant, &records);
                    (result, gate)
                })
                .await?;
                (Some(result), gate)
            }
            None => (None, gate),
        };

        let outcome = match remote_result {
            Some(Ok(())) => {
                debug!(variant = %self.variant, rows = count, "saved to remote");
                WriteOutcome {
                    target: WriteTarget::Remote,
                    fallback_reason: None,
                    rows: count,
                }
            }
            Some(Err(err)) => {
                warn!(variant = %self.variant, error = %err, "remote save failed, keeping a local copy");
                if let Err(local_err) = self.write_local(&payload) {
                    self.status.send_replace(SyncStatus::Failed(local_err.to_string()));
                    return Err(local_err);
                }
                if err == RemoteError::Unauthorized {
                    self.status.send_replace(SyncStatus::Failed(err.to_string()));
                    return Err(SyncError::Unauthorized);
                }
                WriteOutcome {
                    target: WriteTarget::Local(self.config.scope),
                    fallback_reason: Some(err.to_string()),
                    rows: count,
                }
            }
            None => {
                if let Err(local_err) = self.write_local(&payload) {
                    self.status.send_replace(SyncStatus::Failed(local_err.to_string()));
                    return Err(local_err);
                }
                WriteOutcome {
                    target: WriteTarget::Local(self.config.scope),
                    fallback_reason: Some("no remote tier configured".to_string()),
                    rows: count,
                }
            }
        };

        self.write_markers(&payload)?;
        self.status.send_replace(SyncStatus::Saved(outcome.target));
        Ok(outcome)
    }

    fn write_local(&self, payload: &str) -> Result<(), SyncError> {
        let store = self.local.for_scope(self.config.scope);
        store.set(self.variant.schema().storage_key, payload)?;
        Ok(())
    }

    fn write_markers(&self, payload: &str) -> Result<(), SyncError> {
        if let Some(marker) = &self.config.session_marker {
            self.local.session.set(marker, "true")?;
        }
        if let Some(mirror) = &self.config.mirror_key {
            self.local.persistent.set(mirror, payload)?;
        }
        Ok(())
    }

    async fn load(&self, recovery: Vec<RowRecord>) -> Result<LoadOutcome, SyncError> {
        if let Some(marker) = &self.config.session_marker {
            if self.local.session.get(marker)?.is_none() {
                info!(variant = %self.variant, "no data saved in this session, starting fresh");
                return Ok(LoadOutcome {
                    rows: Vec::new(),
                    source: LoadSource::Empty,
                });
            }
        }

        if let Some(remote) = &self.remote {
            let remote = Arc::clone(remote);
            let variant = self.variant;
            match tokio::task::spawn_blocking(move || remote.load(variant)).await? {
                Ok(items) if !items.is_empty() => {
                    let rows = rows_from_json(self.variant, &Value::Array(items));
                    info!(variant = %self.variant, rows = rows.len(), "loaded from remote");
                    return Ok(LoadOutcome {
                        rows,
                        source: LoadSource::Remote,
                    });
                }
                Ok(_) => debug!(variant = %self.variant, "remote returned no rows"),
                Err(RemoteError::Unauthorized) => return Err(SyncError::Unauthorized),
                Err(err) => warn!(variant = %self.variant, error = %err, "remote load failed, trying local copy"),
            }
        }

        let store = self.local.for_scope(self.config.scope);
        let rows = self.read_rows(store.get(self.variant.schema().storage_key)?);
        if !rows.is_empty() {
            info!(variant = %self.variant, rows = rows.len(), "loaded local copy");
            return Ok(LoadOutcome {
                rows,
                source: LoadSource::Local,
            });
        }

        if let Some(mirror) = &self.config.mirror_key {
            let rows = self.read_rows(self.local.persistent.get(mirror)?);
            if !rows.is_empty() {
                info!(variant = %self.variant, rows = rows.len(), "adopted rows from cross-page mirror");
                return Ok(LoadOutcome {
                    rows,
                    source: LoadSource::Mirror,
                });
            }
        }

        if self.config.recovery && !recovery.is_empty() {
            warn!(variant = %self.variant, rows = recovery.len(), "falling back to recovery rows");
            return Ok(LoadOutcome {
                rows: recovery,
                source: LoadSource::Recovery,
            });
        }

        Ok(LoadOutcome {
            rows: Vec::new(),
            source: LoadSource::Empty,
        })
    }

    fn read_rows(&self, raw: Option<String>) -> Vec<RowRecord> {
        let Some(raw) = raw else {
            return Vec::new();
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => rows_from_json(self.variant, &value),
            Err(err) => {
                warn!(variant = %self.variant, error = %err, "ignoring unreadable local copy");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_configs() {
        let contractors = SyncConfig::for_variant(RowVariant::ContractorList);
        assert_eq!(contractors.debounce, Duration::from_millis(1000));
        assert_eq!(contractors.mirror_key.as_deref(), Some("crossPageDataSync"));
        assert!(contractors.recovery);

        let bills = SyncConfig::for_variant(RowVariant::BillTracker).with_scope(StorageScope::Session);
        assert_eq!(bills.scope, StorageScope::Session);
        assert_eq!(bills.session_marker, None);
        assert!(!bills.recovery);
    }

    #[tokio::test]
    async fn without_remote_writes_land_locally() {
        let local = LocalTiers::in_memory();
        let sync = PersistenceSynchronizer::new(
            RowVariant::Epbg,
            None,
            local.clone(),
            SyncConfig::default(),
        );

        let row = RowRecord::from_pairs(RowVariant::Epbg, [("contractor", "Acme")]);
        let outcome = sync.flush(vec![row]).await.unwrap();
        assert_eq!(outcome.target, WriteTarget::Local(StorageScope::Persistent));
        assert_eq!(sync.status(), SyncStatus::Saved(outcome.target));
        assert!(local.persistent.get("epbgData").unwrap().is_some());

        let loaded = sync.load(Vec::new()).await.unwrap();
        assert_eq!(loaded.source, LoadSource::Local);
        assert_eq!(loaded.rows[0].get("contractor"), "Acme");
    }
}
