use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::marker::PhantomData;
use thiserror::Error;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to restore snapshot: {0}")]
    Restore(#[source] serde_json::Error),
}

/// Where the cursor sits relative to the recorded snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryPhase {
    Empty,
    AtTip,
    Mid,
}

/// Bounded linear undo/redo over serialized snapshots of `T`.
///
/// Every `record` appends unconditionally; recording while the cursor is
/// behind the tip drops the redo future first. When capacity is exceeded the
/// oldest snapshot is evicted and the cursor stays on the newest one.
#[derive(Debug, Clone)]
pub struct SnapshotHistory<T> {
    snapshots: VecDeque<String>,
    cursor: usize,
    capacity: usize,
    _state: PhantomData<fn() -> T>,
}

impl<T> Default for SnapshotHistory<T>
where
    T: Serialize + DeserializeOwned,
{
    fn default() -> Self {
        SnapshotHistory::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl<T> SnapshotHistory<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SnapshotHistory {
            snapshots: VecDeque::with_capacity(capacity),
            cursor: 0,
            capacity,
            _state: PhantomData,
        }
    }

    pub fn record(&mut self, state: &T) -> Result<(), HistoryError> {
        let snapshot = serde_json::to_string(state).map_err(HistoryError::Serialize)?;

        if !self.snapshots.is_empty() {
            self.snapshots.truncate(self.cursor + 1);
        }
        self.snapshots.push_back(snapshot);
        if self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
        self.cursor = self.snapshots.len() - 1;
        Ok(())
    }

    pub fn undo(&mut self) -> Result<Option<T>, HistoryError> {
        if !self.can_undo() {
            return Ok(None);
        }
        self.cursor -= 1;
        self.current().map(Some)
    }

    pub fn redo(&mut self) -> Result<Option<T>, HistoryError> {
        if !self.can_redo() {
            return Ok(None);
        }
        self.cursor += 1;
        self.current().map(Some)
    }

    pub fn can_undo(&self) -> bool {
        !self.snapshots.is_empty() && self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        !self.snapshots.is_empty() && self.cursor + 1 < self.snapshots.len()
    }

    /// `None` until the first snapshot is recorded.
    pub fn cursor(&self) -> Option<usize> {
        if self.snapshots.is_empty() {
            None
        } else {
            Some(self.cursor)
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn phase(&self) -> HistoryPhase {
        if self.snapshots.is_empty() {
            HistoryPhase::Empty
        } else if self.cursor + 1 == self.snapshots.len() {
            HistoryPhase::AtTip
        } else {
            HistoryPhase::Mid
        }
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.cursor = 0;
    }

    /// The serialized snapshots, oldest first.
    pub fn snapshots(&self) -> impl Iterator<Item = &str> {
        self.snapshots.iter().map(String::as_str)
    }

    fn current(&self) -> Result<T, HistoryError> {
        let raw = &self.snapshots[self.cursor];
        serde_json::from_str(raw).map_err(HistoryError::Restore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_is_inert() {
        let mut history: SnapshotHistory<Vec<u32>> = SnapshotHistory::new();
        assert_eq!(history.phase(), HistoryPhase::Empty);
        assert_eq!(history.cursor(), None);
        assert!(history.undo().unwrap().is_none());
        assert!(history.redo().unwrap().is_none());
    }

    #[test]
    fn phases_follow_the_cursor() {
        let mut history = SnapshotHistory::new();
        history.record(&vec![1]).unwrap();
        assert_eq!(history.phase(), HistoryPhase::AtTip);
        assert!(history.undo().unwrap().is_none());

        history.record(&vec![1, 2]).unwrap();
        assert_eq!(history.undo().unwrap(), Some(vec![1]));
        assert_eq!(history.phase(), HistoryPhase::Mid);
        assert_eq!(history.redo().unwrap(), Some(vec![1, 2]));
        assert_eq!(history.phase(), HistoryPhase::AtTip);
        assert!(history.redo().unwrap().is_none());
    }

    #[test]
    fn zero_capacity_keeps_one_snapshot() {
        let mut history: SnapshotHistory<String> = SnapshotHistory::with_capacity(0);
        history.record(&"a".to_string()).unwrap();
        history.record(&"b".to_string()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.capacity(), 1);
    }
}
