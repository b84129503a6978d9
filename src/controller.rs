use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::grid::{GridError, GridStore};
use crate::history::{HistoryError, SnapshotHistory};
use crate::metrics::{Expiry, ExpiryTier, TierThresholds, duration_label};
use crate::record::{RecordError, RowRecord};
use crate::schema::RowVariant;
use crate::sync::{LoadSource, PersistenceSynchronizer, SyncError, WriteOutcome};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// A row as the page renders it: the stored fields plus metrics derived at `now`.
#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct RowView {
    pub record: RowRecord,
    pub expiry: Option<Expiry>,
}

impl RowView {
    pub fn tier(&self) -> Option<ExpiryTier> {
        self.expiry.as_ref().map(|e| e.tier)
    }
}

/// One editable table page: the grid, its undo history and its persistence.
///
/// Edits mutate the grid and schedule a debounced save. Snapshots are taken
/// at commit boundaries: `commit` after a field edit, and implicitly by row
/// insertion, deletion and attachment changes. Edits not yet committed are
/// committed before undo or redo, so stepping back never loses them. Undo and
/// redo swap the whole grid and schedule a save.
pub struct GridController {
    store: GridStore,
    history: SnapshotHistory<Vec<RowRecord>>,
    sync: PersistenceSynchronizer,
    thresholds: TierThresholds,
    /// Set by `edit` until the next snapshot.
    dirty: bool,
}

impl GridController {
    pub fn new(sync: PersistenceSynchronizer) -> Self {
        GridController {
            store: GridStore::new(sync.variant()),
            history: SnapshotHistory::new(),
            sync,
            thresholds: TierThresholds::default(),
            dirty: false,
        }
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history = SnapshotHistory::with_capacity(capacity);
        self
    }

    pub fn with_thresholds(mut self, thresholds: TierThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn variant(&self) -> RowVariant {
        self.store.variant()
    }

    pub fn store(&self) -> &GridStore {
        &self.store
    }

    pub fn history(&self) -> &SnapshotHistory<Vec<RowRecord>> {
        &self.history
    }

    pub fn synchronizer(&self) -> &PersistenceSynchronizer {
        &self.sync
    }

    /// Replace the grid with whatever the synchronizer finds and start a fresh
    /// history from it.
    pub async fn load(&mut self, recovery: Vec<RowRecord>) -> Result<LoadSource, ControllerError> {
        let outcome = self.sync.load(recovery).await?;
        self.store.replace(outcome.rows);
        self.history.clear();
        self.history.record(&self.store.all().to_vec())?;
        self.dirty = false;
        debug!(variant = %self.variant(), rows = self.store.len(), source = ?outcome.source, "grid loaded");
        Ok(outcome.source)
    }

    /// Insert an empty row at `at` (or append).
    pub fn add_row(&mut self, at: Option<usize>) -> Result<usize, ControllerError> {
        self.insert_row(RowRecord::blank(self.variant()), at)
    }

    pub fn insert_row(&mut self, record: RowRecord, at: Option<usize>) -> Result<usize, ControllerError> {
        let index = self.store.insert(record, at)?;
        self.checkpoint()?;
        Ok(index)
    }

    /// Change one cell. Persistence is scheduled; no snapshot is taken until `commit`.
    pub fn edit(&mut self, index: usize, field: &str, value: &str) -> Result<(), ControllerError> {
        self.store.update(index, [(field, value)])?;
        self.dirty = true;
        self.schedule_save();
        Ok(())
    }

    /// Field-commit boundary (blur / Enter): record the current grid.
    pub fn commit(&mut self) -> Result<(), ControllerError> {
        self.history.record(&self.store.all().to_vec())?;
        self.dirty = false;
        Ok(())
    }

    pub fn delete_row(&mut self, index: usize) -> Result<RowRecord, ControllerError> {
        let removed = self.store.remove(index)?;
        self.checkpoint()?;
        Ok(removed)
    }

    /// Bulk delete of a selection. Returns how many rows went.
    pub fn delete_rows(&mut self, indices: &[usize]) -> Result<usize, ControllerError> {
        let removed = self.store.remove_many(indices);
        if removed > 0 {
            self.checkpoint()?;
        }
        Ok(removed)
    }

    /// Embed a file into a row's attachment slot. Files over the size cap are
    /// rejected before the row is touched.
    pub fn attach(
        &mut self,
        index: usize,
        slot: &str,
        name: &str,
        mime: &str,
        bytes: &[u8],
    ) -> Result<(), ControllerError> {
        let variant = self.variant();
        self.store.get_mut(index)?.attach(variant, slot, name, mime, bytes)?;
        self.checkpoint()
    }

    pub fn detach(&mut self, index: usize, slot: &str) -> Result<(), ControllerError> {
        let variant = self.variant();
        self.store.get_mut(index)?.detach(variant, slot)?;
        self.checkpoint()
    }

    /// Step back one snapshot. Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, ControllerError> {
        self.commit_pending()?;
        match self.history.undo()? {
            Some(rows) => {
                self.store.replace(rows);
                self.schedule_save();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// A pending edit is committed first, which drops the redo branch.
    pub fn redo(&mut self) -> Result<bool, ControllerError> {
        self.commit_pending()?;
        match self.history.redo()? {
            Some(rows) => {
                self.store.replace(rows);
                self.schedule_save();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Explicit save: write now and report where the rows went.
    pub async fn save(&self) -> Result<WriteOutcome, ControllerError> {
        Ok(self.sync.flush(self.persisted_rows()).await?)
    }

    /// Project the grid for display, deriving expiry metrics at `now`.
    pub fn rows_view(&self, now: NaiveDateTime) -> Vec<RowView> {
        let schema = self.variant().schema();
        self.store
            .all()
            .iter()
            .map(|row| {
                let mut record = row.clone();
                if self.variant() == RowVariant::ContractorList {
                    let start = schema.start_field.and_then(|f| row.date(f));
                    let end = schema.expiry_field.and_then(|f| row.date(f));
                    record.set("duration", duration_label(start, end, now));
                }
                let expiry = schema
                    .expiry_field
                    .and_then(|f| row.date(f))
                    .map(|end| Expiry::compute(end, now, &self.thresholds));
                RowView { record, expiry }
            })
            .collect()
    }

    /// Rows still running but inside the warning window (the notification badge).
    pub fn expiring_count(&self, now: NaiveDateTime) -> usize {
        self.rows_view(now)
            .iter()
            .filter(|view| {
                view.expiry
                    .as_ref()
                    .is_some_and(|e| (0..=self.thresholds.warning_days).contains(&e.days))
            })
            .count()
    }

    fn checkpoint(&mut self) -> Result<(), ControllerError> {
        self.history.record(&self.store.all().to_vec())?;
        self.dirty = false;
        self.schedule_save();
        Ok(())
    }

    fn commit_pending(&mut self) -> Result<(), ControllerError> {
        if self.dirty {
            self.commit()?;
        }
        Ok(())
    }

    fn schedule_save(&self) {
        self.sync.schedule(self.persisted_rows());
    }

    fn persisted_rows(&self) -> Vec<RowRecord> {
        let now = chrono::Local::now().naive_local();
        self.rows_view(now).into_iter().map(|view| view.record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalTiers;
    use crate::sync::SyncConfig;

    fn controller(variant: RowVariant) -> GridController {
        let sync = PersistenceSynchronizer::new(
            variant,
            None,
            LocalTiers::in_memory(),
            SyncConfig::for_variant(variant),
        );
        GridController::new(sync)
    }

    #[tokio::test]
    async fn edits_snapshot_only_on_commit() {
        let mut page = controller(RowVariant::BillTracker);
        page.load(Vec::new()).await.unwrap();
        assert_eq!(page.history().len(), 1);

        page.add_row(None).unwrap();
        page.edit(0, "contractor", "A").unwrap();
        page.edit(0, "contractor", "Ac").unwrap();
        page.edit(0, "contractor", "Acme").unwrap();
        assert_eq!(page.history().len(), 2);
        page.commit().unwrap();
        assert_eq!(page.history().len(), 3);

        assert!(page.undo().unwrap());
        assert_eq!(page.store().get(0).unwrap().get("contractor"), "");
        assert!(page.redo().unwrap());
        assert_eq!(page.store().get(0).unwrap().get("contractor"), "Acme");
        assert!(!page.redo().unwrap());
    }

    #[tokio::test]
    async fn undo_keeps_an_uncommitted_edit_for_redo() {
        println!("\n====== Testing undo of pending edits ======");
        let mut page = controller(RowVariant::ContractorList);
        page.load(Vec::new()).await.unwrap();
        page.add_row(None).unwrap();
        page.edit(0, "contractor", "Acme").unwrap();

        assert!(page.undo().unwrap());
        assert_eq!(page.store().get(0).unwrap().get("contractor"), "");
        assert!(page.redo().unwrap());
        assert_eq!(page.store().get(0).unwrap().get("contractor"), "Acme");
        println!("✓ An edit made without a commit comes back on redo");

        page.edit(0, "contractor", "Bolt").unwrap();
        assert!(!page.redo().unwrap());
        assert_eq!(page.store().get(0).unwrap().get("contractor"), "Bolt");
        assert!(page.undo().unwrap());
        assert_eq!(page.store().get(0).unwrap().get("contractor"), "Acme");
        println!("✓ Redo after a fresh edit keeps the edit");
    }

    #[tokio::test]
    async fn duration_is_derived_for_contractors() {
        let mut page = controller(RowVariant::ContractorList);
        page.add_row(None).unwrap();
        page.edit(0, "startDate", "2024-01-01").unwrap();
        page.edit(0, "endDate", "2024-03-31").unwrap();

        let now = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let views = page.rows_view(now);
        assert_eq!(views[0].record.get("duration"), "30 days left");
        assert_eq!(views[0].tier(), Some(ExpiryTier::Warning));
        assert_eq!(page.expiring_count(now), 1);
    }

    #[tokio::test]
    async fn oversized_attachment_leaves_history_alone() {
        let mut page = controller(RowVariant::Epbg);
        page.add_row(None).unwrap();
        let before = page.history().len();
        let big = vec![0u8; crate::record::MAX_ATTACHMENT_BYTES + 1];
        assert!(matches!(
            page.attach(0, "file", "bg.pdf", "application/pdf", &big),
            Err(ControllerError::Record(RecordError::AttachmentTooLarge { .. }))
        ));
        assert_eq!(page.history().len(), before);
    }
}
