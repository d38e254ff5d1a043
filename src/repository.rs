use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use crate::error::{DanError, Result};
use crate::types::{Entry, Outcome};
use crate::utils::{format_day, next_timestamp, now_micros};

/// Precondition for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertGuard {
    /// Last write wins.
    Always,
    /// Write only if the stored entry still carries this `updated_at`.
    UnchangedSince(DateTime<Utc>),
}

/// What a backend must do to apply one upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertPlan {
    /// Blank content over an existing entry: nothing changes.
    Unchanged(Entry),
    Insert(Entry),
    Update(Entry),
}

/// Upsert rules shared by every backend. Backends call this while holding
/// their per-key serialization, so the rules hold at the storage boundary:
///
/// - blank `raw_text` never replaces stored content, and never creates an entry;
/// - `resolved_numbers` and `label` are recomputed from the groups;
/// - every number must belong to the entry's width;
/// - a guarded write fails with `Conflict` when the stored entry moved on;
/// - `updated_at` strictly increases.
pub fn plan_upsert(existing: Option<Entry>, mut incoming: Entry, guard: UpsertGuard) -> Result<UpsertPlan> {
    incoming.owner_name = incoming.owner_name.trim().to_string();

    if let UpsertGuard::UnchangedSince(expected) = guard {
        match &existing {
            None => {
                return Err(DanError::Conflict(format!(
                    "entry {} / {} no longer exists",
                    incoming.owner_name,
                    format_day(incoming.day)
                )));
            }
            Some(stored) if stored.updated_at != expected => {
                return Err(DanError::Conflict(format!(
                    "entry {} / {} changed since {}",
                    incoming.owner_name,
                    format_day(incoming.day),
                    expected
                )));
            }
            Some(_) => {}
        }
    }

    if !incoming.has_content() {
        return match existing {
            Some(stored) => Ok(UpsertPlan::Unchanged(stored)),
            None => Err(DanError::Validation(format!(
                "cannot create entry {} / {} without content",
                incoming.owner_name,
                format_day(incoming.day)
            ))),
        };
    }

    incoming.refresh();
    incoming.validate()?;

    match existing {
        Some(stored) => {
            incoming.id = stored.id;
            incoming.created_at = stored.created_at;
            incoming.updated_at = next_timestamp(stored.updated_at);
            Ok(UpsertPlan::Update(incoming))
        }
        None => {
            let now = now_micros();
            incoming.created_at = now;
            incoming.updated_at = now;
            Ok(UpsertPlan::Insert(incoming))
        }
    }
}

/// Storage of entries keyed by (owner, calendar day).
pub trait EntryRepository: Send + Sync {
    fn upsert(&self, entry: Entry, guard: UpsertGuard) -> Result<Entry>;

    /// Apply several writes. The outer error means nothing was written;
    /// inner errors reject single entries (conflicts, validation).
    fn upsert_batch(&self, writes: Vec<(Entry, UpsertGuard)>) -> Result<Vec<Result<Entry>>> {
        Ok(writes
            .into_iter()
            .map(|(entry, guard)| self.upsert(entry, guard))
            .collect())
    }

    fn get(&self, owner_name: &str, day: NaiveDate) -> Result<Option<Entry>>;

    /// Entries of one day, ordered by owner.
    fn list_by_day(&self, day: NaiveDate) -> Result<Vec<Entry>>;

    /// Newest day first.
    fn list_by_owner(&self, owner_name: &str, limit: usize, offset: usize) -> Result<Vec<Entry>>;

    /// Newest day first, then owner.
    fn list_recent(&self, limit: usize, offset: usize) -> Result<Vec<Entry>>;

    fn list_owners(&self) -> Result<BTreeSet<String>>;

    /// Days holding at least one entry with numbers and no outcome yet.
    fn pending_days(&self) -> Result<Vec<NaiveDate>>;
}

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<(String, NaiveDate), Entry>,
    next_id: i64,
}

/// Repository kept entirely in memory. All access goes through one mutex.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| DanError::TransientIo("in-memory repository lock poisoned".to_string()))
    }

    fn apply(state: &mut MemoryState, entry: Entry, guard: UpsertGuard) -> Result<Entry> {
        let key = (entry.owner_name.trim().to_string(), entry.day);
        let existing = state.entries.get(&key).cloned();

        let stored = match plan_upsert(existing, entry, guard)? {
            UpsertPlan::Unchanged(stored) => return Ok(stored),
            UpsertPlan::Insert(mut entry) => {
                state.next_id += 1;
                entry.id = Some(state.next_id);
                entry
            }
            UpsertPlan::Update(entry) => entry,
        };
        state.entries.insert(key, stored.clone());
        Ok(stored)
    }
}

fn page<I: Iterator<Item = Entry>>(iter: I, limit: usize, offset: usize) -> Vec<Entry> {
    iter.skip(offset).take(limit).collect()
}

impl EntryRepository for InMemoryRepository {
    fn upsert(&self, entry: Entry, guard: UpsertGuard) -> Result<Entry> {
        let mut state = self.lock()?;
        Self::apply(&mut state, entry, guard)
    }

    fn upsert_batch(&self, writes: Vec<(Entry, UpsertGuard)>) -> Result<Vec<Result<Entry>>> {
        let mut state = self.lock()?;
        Ok(writes
            .into_iter()
            .map(|(entry, guard)| Self::apply(&mut state, entry, guard))
            .collect())
    }

    fn get(&self, owner_name: &str, day: NaiveDate) -> Result<Option<Entry>> {
        let state = self.lock()?;
        Ok(state.entries.get(&(owner_name.trim().to_string(), day)).cloned())
    }

    fn list_by_day(&self, day: NaiveDate) -> Result<Vec<Entry>> {
        let state = self.lock()?;
        Ok(state
            .entries
            .values()
            .filter(|e| e.day == day)
            .cloned()
            .collect())
    }

    fn list_by_owner(&self, owner_name: &str, limit: usize, offset: usize) -> Result<Vec<Entry>> {
        let state = self.lock()?;
        let owner_name = owner_name.trim();
        let mut entries: Vec<Entry> = state
            .entries
            .values()
            .filter(|e| e.owner_name == owner_name)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.day.cmp(&a.day));
        Ok(page(entries.into_iter(), limit, offset))
    }

    fn list_recent(&self, limit: usize, offset: usize) -> Result<Vec<Entry>> {
        let state = self.lock()?;
        let mut entries: Vec<Entry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| b.day.cmp(&a.day).then_with(|| a.owner_name.cmp(&b.owner_name)));
        Ok(page(entries.into_iter(), limit, offset))
    }

    fn list_owners(&self) -> Result<BTreeSet<String>> {
        let state = self.lock()?;
        Ok(state.entries.keys().map(|(owner, _)| owner.clone()).collect())
    }

    fn pending_days(&self) -> Result<Vec<NaiveDate>> {
        let state = self.lock()?;
        let days: BTreeSet<NaiveDate> = state
            .entries
            .values()
            .filter(|e| e.outcome == Outcome::Pending && !e.resolved_numbers.is_empty())
            .map(|e| e.day)
            .collect();
        Ok(days.into_iter().collect())
    }
}
