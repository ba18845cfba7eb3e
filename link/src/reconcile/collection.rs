//! Optimistic/confirmed merge state for one logical collection.
//!
//! Entries keep insertion order. A local submit appends a `pending` entry
//! under a temporary id (`temp-<n>`); the write confirmation or the feed's
//! INSERT, whichever comes first, turns it into the confirmed record in
//! place. The other one is then recognized as a duplicate.
//!
//! UPDATE/DELETE for an id the collection has not seen yet are staged: an
//! update is kept (latest wins) and applied when the INSERT or write
//! confirmation for that id shows up; a delete leaves a tombstone so the
//! record is never resurrected by a late INSERT or replay.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Duration;

use super::records::Reconcilable;
use crate::error::{LinkError, Result};
use crate::models::{ChangeEvent, ChangeType};

const TEMP_PREFIX: &str = "temp-";

/// Tuning for a [`ReconciledCollection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Max distance between an optimistic entry's and an event's
    /// `created_at` for the two to be treated as the same record.
    pub correlation_window: Duration,
    /// Max number of early updates kept; the oldest is evicted beyond this.
    pub max_staged: usize,
    /// Max number of remembered deleted ids.
    pub max_tombstones: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            correlation_window: Duration::seconds(60),
            max_staged: 256,
            max_tombstones: 4096,
        }
    }
}

/// One item of the collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    /// Server id once confirmed, `temp-<n>` while pending.
    pub id: String,
    pub record: T,
    pub pending: bool,
}

/// What an operation did to the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A new confirmed entry was appended.
    Inserted,
    /// A pending entry was replaced in place by the confirmed record.
    Confirmed,
    /// The record was already present; nothing changed.
    Duplicate,
    Updated,
    Removed,
    /// Early UPDATE/DELETE for an unknown id, kept for later.
    Staged,
    /// The id is tombstoned or the operation had no target.
    Ignored,
}

impl Applied {
    /// Whether visible state changed.
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            Applied::Inserted | Applied::Confirmed | Applied::Updated | Applied::Removed
        )
    }
}

/// Merge state for one collection (one conversation, community, or
/// content item).
#[derive(Debug, Clone)]
pub struct ReconciledCollection<T: Reconcilable> {
    /// The local actor; only their INSERTs can correlate with pending entries.
    actor_id: String,
    config: ReconcileConfig,
    entries: Vec<Entry<T>>,
    next_temp: u64,
    /// temp id -> server id, for entries confirmed by the feed before the
    /// write returned.
    aliases: HashMap<String, String>,
    staged: HashMap<String, T>,
    staged_order: VecDeque<String>,
    tombstones: HashSet<String>,
    tombstone_order: VecDeque<String>,
}

impl<T: Reconcilable> ReconciledCollection<T> {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self::with_config(actor_id, ReconcileConfig::default())
    }

    pub fn with_config(actor_id: impl Into<String>, config: ReconcileConfig) -> Self {
        Self {
            actor_id: actor_id.into(),
            config,
            entries: Vec::new(),
            next_temp: 1,
            aliases: HashMap::new(),
            staged: HashMap::new(),
            staged_order: VecDeque::new(),
            tombstones: HashSet::new(),
            tombstone_order: VecDeque::new(),
        }
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    pub fn entries(&self) -> &[Entry<T>] {
        &self.entries
    }

    pub fn records(&self) -> Vec<T> {
        self.entries.iter().map(|e| e.record.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Entry<T>> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.pending).count()
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.contains(id)
    }

    /// Append an optimistic entry. Returns its temporary id.
    pub fn submit(&mut self, draft: T) -> String {
        let temp_id = format!("{}{}", TEMP_PREFIX, self.next_temp);
        self.next_temp += 1;
        self.entries.push(Entry {
            id: temp_id.clone(),
            record: draft,
            pending: true,
        });
        temp_id
    }

    /// Apply the write confirmation for `temp_id`.
    ///
    /// Replaces the pending entry in place unless the feed already
    /// delivered the record, in which case the pending entry is dropped.
    pub fn confirm(&mut self, temp_id: &str, confirmed: T) -> Applied {
        let id = confirmed.id().to_string();
        let temp_pos = self.position(temp_id);
        self.aliases.remove(temp_id);

        if self.tombstones.contains(&id) {
            if let Some(pos) = temp_pos {
                self.entries.remove(pos);
            }
            return Applied::Removed;
        }

        if self.contains(&id) {
            // Feed got there first.
            if let Some(pos) = temp_pos {
                self.entries.remove(pos);
            }
            return Applied::Duplicate;
        }

        match temp_pos {
            Some(pos) => {
                self.entries[pos] = Entry {
                    id: id.clone(),
                    record: confirmed,
                    pending: false,
                };
                self.apply_staged(pos);
                Applied::Confirmed
            },
            None => {
                // Pending entry is gone (e.g. replaced by a refetch); treat
                // as a plain idempotent insert.
                self.entries.push(Entry {
                    id,
                    record: confirmed,
                    pending: false,
                });
                let pos = self.entries.len() - 1;
                self.apply_staged(pos);
                Applied::Inserted
            },
        }
    }

    /// Roll back a failed write. Returns the draft.
    ///
    /// A write the feed already confirmed stays; only its alias goes.
    pub fn fail(&mut self, temp_id: &str) -> Option<T> {
        self.aliases.remove(temp_id);
        let pos = self.entries.iter().position(|e| e.pending && e.id == temp_id)?;
        Some(self.entries.remove(pos).record)
    }

    /// Merge a confirmed change event from the feed.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> Result<Applied> {
        match event.event_type {
            ChangeType::Insert => Ok(self.apply_insert(event.decode()?)),
            ChangeType::Update => Ok(self.apply_update(event.decode()?)),
            ChangeType::Delete => {
                let id = event.record_id().ok_or_else(|| {
                    LinkError::SerializationError(format!(
                        "DELETE on '{}' carries no id",
                        event.table
                    ))
                })?;
                Ok(self.apply_delete(&id))
            },
        }
    }

    pub fn apply_insert(&mut self, record: T) -> Applied {
        let id = record.id().to_string();
        if self.tombstones.contains(&id) {
            return Applied::Ignored;
        }
        if self.contains(&id) {
            return Applied::Duplicate;
        }

        if record.actor_id() == self.actor_id {
            if let Some(pos) = self.correlate(&record) {
                let temp_id = std::mem::replace(&mut self.entries[pos].id, id.clone());
                self.entries[pos].record = record;
                self.entries[pos].pending = false;
                self.aliases.insert(temp_id, id);
                self.apply_staged(pos);
                return Applied::Confirmed;
            }
        }

        self.entries.push(Entry {
            id,
            record,
            pending: false,
        });
        let pos = self.entries.len() - 1;
        self.apply_staged(pos);
        Applied::Inserted
    }

    pub fn apply_update(&mut self, record: T) -> Applied {
        let id = record.id().to_string();
        if self.tombstones.contains(&id) {
            return Applied::Ignored;
        }
        match self.position(&id) {
            Some(pos) => {
                self.entries[pos].record = record;
                Applied::Updated
            },
            None => {
                self.stage(id, record);
                Applied::Staged
            },
        }
    }

    pub fn apply_delete(&mut self, id: &str) -> Applied {
        self.unstage(id);
        self.tombstone(id.to_string());
        match self.position(id) {
            Some(pos) => {
                self.entries.remove(pos);
                Applied::Removed
            },
            None => Applied::Staged,
        }
    }

    /// Replace confirmed state with a full refetch.
    ///
    /// Pending entries survive (appended after the snapshot); staged
    /// updates and tombstones are cleared since the snapshot supersedes them.
    pub fn replace_all(&mut self, snapshot: Vec<T>) {
        let pending: Vec<Entry<T>> = self.entries.drain(..).filter(|e| e.pending).collect();
        let mut seen = HashSet::new();
        for record in snapshot {
            let id = record.id().to_string();
            if seen.insert(id.clone()) {
                self.entries.push(Entry {
                    id,
                    record,
                    pending: false,
                });
            }
        }
        self.entries.extend(pending);
        self.staged.clear();
        self.staged_order.clear();
        self.tombstones.clear();
        self.tombstone_order.clear();
    }

    /// Resolve a temp id to the server id it was confirmed as, if any.
    pub fn resolve_alias(&self, temp_id: &str) -> Option<&str> {
        self.aliases.get(temp_id).map(String::as_str)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Oldest pending entry with the same actor and content, created within
    /// the correlation window. Missing timestamps match on actor + content.
    fn correlate(&self, record: &T) -> Option<usize> {
        self.entries.iter().position(|e| {
            e.pending
                && e.record.actor_id() == record.actor_id()
                && e.record.content() == record.content()
                && match (e.record.created_at(), record.created_at()) {
                    (Some(a), Some(b)) => {
                        let window = self.config.correlation_window;
                        a - b <= window && b - a <= window
                    },
                    _ => true,
                }
        })
    }

    fn apply_staged(&mut self, pos: usize) {
        let id = self.entries[pos].id.clone();
        if let Some(update) = self.unstage(&id) {
            log::debug!("[realtime-link] Applying staged update for '{}'", id);
            self.entries[pos].record = update;
        }
    }

    fn stage(&mut self, id: String, record: T) {
        if self.staged.insert(id.clone(), record).is_none() {
            self.staged_order.push_back(id);
        }
        while self.staged.len() > self.config.max_staged {
            match self.staged_order.pop_front() {
                Some(oldest) => {
                    self.staged.remove(&oldest);
                },
                None => break,
            }
        }
    }

    fn unstage(&mut self, id: &str) -> Option<T> {
        let record = self.staged.remove(id)?;
        self.staged_order.retain(|staged| staged != id);
        Some(record)
    }

    fn tombstone(&mut self, id: String) {
        if self.tombstones.insert(id.clone()) {
            self.tombstone_order.push_back(id);
        }
        while self.tombstones.len() > self.config.max_tombstones {
            match self.tombstone_order.pop_front() {
                Some(oldest) => {
                    self.tombstones.remove(&oldest);
                },
                None => break,
            }
        }
    }
}
