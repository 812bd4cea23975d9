//! Item store
//!
//! Holds every ingested comment together with its display status. Pending
//! items are additionally indexed by `(scheduled_ms, insertion_seq)` so the
//! activation loop can query a time window without scanning the whole set.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use super::error::ValidationError;
use super::types::{CommentId, CommentItem, DisplayStatus, seconds_to_ms};

#[derive(Debug, Clone)]
struct StoreEntry {
    item: CommentItem,
    status: DisplayStatus,
    seq: u64,
}

impl StoreEntry {
    fn key(&self) -> (u64, u64) {
        (self.item.scheduled_ms(), self.seq)
    }
}

/// Number of items in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub active: usize,
    pub done: usize,
    pub filtered: usize,
}

/// All loaded comments and their display status
#[derive(Debug, Default)]
pub struct ItemStore {
    entries: HashMap<CommentId, StoreEntry>,
    pending: BTreeMap<(u64, u64), CommentId>,
    next_seq: u64,
    /// Items whose window elapsed before they could be admitted
    dropped: usize,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: CommentId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: CommentId) -> Option<&CommentItem> {
        self.entries.get(&id).map(|e| &e.item)
    }

    pub fn status(&self, id: CommentId) -> Option<DisplayStatus> {
        self.entries.get(&id).map(|e| e.status)
    }

    /// Iterate items with their status, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&CommentItem, DisplayStatus)> {
        self.entries.values().map(|e| (&e.item, e.status))
    }

    /// Insert a validated item with its initial status (Pending or Filtered)
    pub fn insert(
        &mut self,
        item: CommentItem,
        status: DisplayStatus,
    ) -> Result<(), ValidationError> {
        if self.entries.contains_key(&item.id) {
            return Err(ValidationError::DuplicateId(item.id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        let entry = StoreEntry { item, status, seq };
        if status == DisplayStatus::Pending {
            self.pending.insert(entry.key(), entry.item.id);
        }
        self.entries.insert(entry.item.id, entry);
        Ok(())
    }

    /// Change an item's status, keeping the pending index in sync.
    /// Filtered is terminal; requests to leave it are ignored.
    pub fn set_status(&mut self, id: CommentId, status: DisplayStatus) -> Option<DisplayStatus> {
        let entry = self.entries.get_mut(&id)?;
        let old = entry.status;
        if old == status || old.is_terminal() {
            return Some(old);
        }
        if old == DisplayStatus::Pending {
            self.pending.remove(&entry.key());
        }
        if status == DisplayStatus::Pending {
            self.pending.insert(entry.key(), id);
        }
        entry.status = status;
        Some(old)
    }

    /// Pending items whose scheduled time lies in `[now - epsilon, now + epsilon]`
    ///
    /// Ordered by priority (highest first), then scheduled time, then
    /// insertion order.
    pub fn due(&self, now: f64, epsilon: f64) -> Vec<CommentId> {
        let lower = seconds_to_ms(now - epsilon);
        let upper = seconds_to_ms(now + epsilon);
        if upper < lower || (now + epsilon) < 0.0 {
            return Vec::new();
        }

        let mut due: Vec<(i32, CommentId)> = self
            .pending
            .range((lower, 0)..=(upper, u64::MAX))
            .filter_map(|(_, id)| self.entries.get(id).map(|e| (e.item.priority, *id)))
            .collect();
        // Stable sort keeps time/insertion order within a priority
        due.sort_by_key(|(priority, _)| Reverse(*priority));
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Mark pending items scheduled before `cutoff` as Done without display
    pub fn expire_before(&mut self, cutoff: f64) -> Vec<CommentId> {
        if cutoff <= 0.0 {
            return Vec::new();
        }
        let cutoff_ms = seconds_to_ms(cutoff);
        let rest = self.pending.split_off(&(cutoff_ms, 0));
        let expired = std::mem::replace(&mut self.pending, rest);

        let mut ids = Vec::with_capacity(expired.len());
        for id in expired.into_values() {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.status = DisplayStatus::Done;
                ids.push(id);
            }
        }
        self.dropped += ids.len();
        ids
    }

    /// Recompute every non-filtered status from a playback position
    ///
    /// Items whose window already closed become Done, all others Pending.
    /// The result depends only on `now`, so repeated seeks are reproducible.
    pub fn reclassify(&mut self, now: f64, epsilon: f64) {
        let cutoff = now - epsilon;
        let cutoff_ms = if cutoff > 0.0 { seconds_to_ms(cutoff) } else { 0 };

        self.pending.clear();
        for (id, entry) in self.entries.iter_mut() {
            if entry.status.is_terminal() {
                continue;
            }
            if entry.item.scheduled_ms() < cutoff_ms {
                entry.status = DisplayStatus::Done;
            } else {
                entry.status = DisplayStatus::Pending;
                self.pending.insert((entry.item.scheduled_ms(), entry.seq), *id);
            }
        }
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
        self.dropped = 0;
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.entries.values() {
            match entry.status {
                DisplayStatus::Pending => counts.pending += 1,
                DisplayStatus::Active => counts.active += 1,
                DisplayStatus::Done => counts.done += 1,
                DisplayStatus::Filtered => counts.filtered += 1,
            }
        }
        counts
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
