use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{DanError, Result};
use crate::repository::{EntryRepository, UpsertGuard, UpsertPlan, plan_upsert};
use crate::types::{Entry, Group, Outcome, Width};
use crate::utils::{format_day, parse_day};

pub fn ensure_parent_dir(database_path: &str) -> Result<()> {
    if let Some(parent) = Path::new(database_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Open (creating if needed) the database file and its tables.
pub fn conn(database_path: &str) -> Result<Connection> {
    ensure_parent_dir(database_path)?;
    let conn = Connection::open(database_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    create_tables(&conn)?;
    Ok(conn)
}

pub fn in_memory_conn() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    create_tables(&conn)?;
    Ok(conn)
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS dan_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_name TEXT NOT NULL,
            day TEXT NOT NULL,
            width INTEGER NOT NULL,
            raw_text TEXT NOT NULL,
            groups_json TEXT NOT NULL,
            resolved_json TEXT NOT NULL,
            number_count INTEGER NOT NULL,
            label TEXT NOT NULL,
            outcome TEXT NOT NULL,
            matched_json TEXT NOT NULL,
            note TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (owner_name, day)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_dan_entries_day ON dan_entries (day)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS draw_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            draw_date TEXT NOT NULL UNIQUE,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS prize_numbers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            draw_id INTEGER NOT NULL,
            tier TEXT NOT NULL,
            number_value TEXT NOT NULL,
            round_number INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (draw_id, tier, number_value),
            FOREIGN KEY (draw_id) REFERENCES draw_results (id)
        )",
        [],
    )?;

    Ok(())
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DanError::TransientIo(format!("corrupt timestamp '{}': {}", value, e)))
}

fn decode<T: serde::de::DeserializeOwned>(column: &str, value: &str) -> Result<T> {
    serde_json::from_str(value)
        .map_err(|e| DanError::TransientIo(format!("corrupt {} column: {}", column, e)))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| DanError::TransientIo(format!("encode failed: {}", e)))
}

/// One `dan_entries` row as stored.
#[derive(Debug)]
struct EntryRow {
    id: i64,
    owner_name: String,
    day: String,
    width: u8,
    raw_text: String,
    groups_json: String,
    resolved_json: String,
    label: String,
    outcome: String,
    matched_json: String,
    note: String,
    created_at: String,
    updated_at: String,
}

const ENTRY_COLUMNS: &str = "id, owner_name, day, width, raw_text, groups_json, resolved_json, \
     label, outcome, matched_json, note, created_at, updated_at";

impl EntryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(EntryRow {
            id: row.get(0)?,
            owner_name: row.get(1)?,
            day: row.get(2)?,
            width: row.get(3)?,
            raw_text: row.get(4)?,
            groups_json: row.get(5)?,
            resolved_json: row.get(6)?,
            label: row.get(7)?,
            outcome: row.get(8)?,
            matched_json: row.get(9)?,
            note: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_entry(self) -> Result<Entry> {
        let day: NaiveDate = parse_day(&self.day)
            .map_err(|e| DanError::TransientIo(format!("corrupt day column: {}", e)))?;
        let width = Width::new(self.width)
            .map_err(|e| DanError::TransientIo(format!("corrupt width column: {}", e)))?;
        let outcome: Outcome = self
            .outcome
            .parse()
            .map_err(|e| DanError::TransientIo(format!("corrupt outcome column: {}", e)))?;

        Ok(Entry {
            id: Some(self.id),
            owner_name: self.owner_name,
            day,
            width,
            raw_text: self.raw_text,
            groups: decode::<Vec<Group>>("groups_json", &self.groups_json)?,
            resolved_numbers: decode::<BTreeSet<String>>("resolved_json", &self.resolved_json)?,
            label: self.label,
            outcome,
            matched_numbers: decode::<BTreeSet<String>>("matched_json", &self.matched_json)?,
            note: self.note,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn collect_entries(rows: Vec<EntryRow>) -> Result<Vec<Entry>> {
    rows.into_iter().map(EntryRow::into_entry).collect()
}

pub fn get_entry(conn: &Connection, owner_name: &str, day: NaiveDate) -> Result<Option<Entry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM dan_entries WHERE owner_name = ?1 AND day = ?2",
        ENTRY_COLUMNS
    ))?;
    let row = stmt
        .query_row(params![owner_name.trim(), format_day(day)], EntryRow::from_row)
        .optional()?;
    row.map(EntryRow::into_entry).transpose()
}

fn insert_entry(conn: &Connection, entry: &Entry) -> Result<i64> {
    conn.execute(
        "INSERT INTO dan_entries (
            owner_name, day, width, raw_text, groups_json, resolved_json, number_count,
            label, outcome, matched_json, note, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            entry.owner_name,
            format_day(entry.day),
            u8::from(entry.width),
            entry.raw_text,
            encode(&entry.groups)?,
            encode(&entry.resolved_numbers)?,
            entry.resolved_numbers.len() as i64,
            entry.label,
            entry.outcome.as_str(),
            encode(&entry.matched_numbers)?,
            entry.note,
            format_timestamp(entry.created_at),
            format_timestamp(entry.updated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn update_entry(conn: &Connection, id: i64, entry: &Entry) -> Result<()> {
    conn.execute(
        "UPDATE dan_entries SET
            width = ?2, raw_text = ?3, groups_json = ?4, resolved_json = ?5, number_count = ?6,
            label = ?7, outcome = ?8, matched_json = ?9, note = ?10, updated_at = ?11
         WHERE id = ?1",
        params![
            id,
            u8::from(entry.width),
            entry.raw_text,
            encode(&entry.groups)?,
            encode(&entry.resolved_numbers)?,
            entry.resolved_numbers.len() as i64,
            entry.label,
            entry.outcome.as_str(),
            encode(&entry.matched_numbers)?,
            entry.note,
            format_timestamp(entry.updated_at),
        ],
    )?;
    Ok(())
}

/// Read-modify-write of one key. Callers run this inside a transaction.
fn write_entry(conn: &Connection, entry: Entry, guard: UpsertGuard) -> Result<Entry> {
    let existing = get_entry(conn, &entry.owner_name, entry.day)?;

    match plan_upsert(existing, entry, guard)? {
        UpsertPlan::Unchanged(stored) => Ok(stored),
        UpsertPlan::Insert(mut entry) => {
            entry.id = Some(insert_entry(conn, &entry)?);
            Ok(entry)
        }
        UpsertPlan::Update(entry) => {
            let id = entry
                .id
                .ok_or_else(|| DanError::TransientIo("stored entry has no id".to_string()))?;
            update_entry(conn, id, &entry)?;
            Ok(entry)
        }
    }
}

fn query_entries(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Entry>> {
    let mut stmt = conn.prepare(sql)?;
    let entry_iter = stmt.query_map(params, EntryRow::from_row)?;

    let mut rows = Vec::new();
    for row in entry_iter {
        rows.push(row?);
    }
    collect_entries(rows)
}

/// SQLite-backed repository. One connection behind a mutex; every write is
/// an IMMEDIATE transaction so concurrent processes on the same file are
/// serialized too.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(database_path: &str) -> Result<Self> {
        Ok(Self::new(conn(database_path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(in_memory_conn()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DanError::TransientIo("database connection lock poisoned".to_string()))
    }
}

impl EntryRepository for SqliteRepository {
    fn upsert(&self, entry: Entry, guard: UpsertGuard) -> Result<Entry> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = write_entry(&tx, entry, guard)?;
        tx.commit()?;
        Ok(stored)
    }

    fn upsert_batch(&self, writes: Vec<(Entry, UpsertGuard)>) -> Result<Vec<Result<Entry>>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut results = Vec::with_capacity(writes.len());
        for (entry, guard) in writes {
            match write_entry(&tx, entry, guard) {
                Err(e @ DanError::TransientIo(_)) => return Err(e),
                other => results.push(other),
            }
        }

        tx.commit()?;
        Ok(results)
    }

    fn get(&self, owner_name: &str, day: NaiveDate) -> Result<Option<Entry>> {
        let conn = self.lock()?;
        get_entry(&conn, owner_name, day)
    }

    fn list_by_day(&self, day: NaiveDate) -> Result<Vec<Entry>> {
        let conn = self.lock()?;
        query_entries(
            &conn,
            &format!(
                "SELECT {} FROM dan_entries WHERE day = ?1 ORDER BY owner_name",
                ENTRY_COLUMNS
            ),
            params![format_day(day)],
        )
    }

    fn list_by_owner(&self, owner_name: &str, limit: usize, offset: usize) -> Result<Vec<Entry>> {
        let conn = self.lock()?;
        query_entries(
            &conn,
            &format!(
                "SELECT {} FROM dan_entries WHERE owner_name = ?1
                 ORDER BY day DESC LIMIT ?2 OFFSET ?3",
                ENTRY_COLUMNS
            ),
            params![owner_name.trim(), limit as i64, offset as i64],
        )
    }

    fn list_recent(&self, limit: usize, offset: usize) -> Result<Vec<Entry>> {
        let conn = self.lock()?;
        query_entries(
            &conn,
            &format!(
                "SELECT {} FROM dan_entries ORDER BY day DESC, owner_name LIMIT ?1 OFFSET ?2",
                ENTRY_COLUMNS
            ),
            params![limit as i64, offset as i64],
        )
    }

    fn list_owners(&self) -> Result<BTreeSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT owner_name FROM dan_entries")?;
        let owner_iter = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut owners = BTreeSet::new();
        for owner in owner_iter {
            owners.insert(owner?);
        }
        Ok(owners)
    }

    fn pending_days(&self) -> Result<Vec<NaiveDate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT day FROM dan_entries
             WHERE outcome = 'pending' AND number_count > 0
             ORDER BY day",
        )?;
        let day_iter = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut days = Vec::new();
        for day in day_iter {
            days.push(parse_day(&day?)?);
        }
        Ok(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble_entry;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn entry(owner: &str, d: u32, text: &str) -> Entry {
        assemble_entry(owner, day(d), text, Width::THREE).unwrap().0
    }

    #[test]
    fn stored_entry_reads_back_identically() {
        let repo = SqliteRepository::in_memory().unwrap();
        let stored = repo
            .upsert(entry("A", 10, "3X 101 202 303 Chạm9 919"), UpsertGuard::Always)
            .unwrap();

        let loaded = repo.get("A", day(10)).unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert!(loaded.id.is_some());
        assert_eq!(loaded.groups.len(), 2);
    }

    #[test]
    fn blank_update_keeps_row() {
        let repo = SqliteRepository::in_memory().unwrap();
        let stored = repo.upsert(entry("A", 10, "101"), UpsertGuard::Always).unwrap();
        let blank = Entry::new("A", day(10), Width::THREE, "", Vec::new());

        assert_eq!(repo.upsert(blank, UpsertGuard::Always).unwrap(), stored);
        assert_eq!(repo.get("A", day(10)).unwrap().unwrap().raw_text, "101");
    }

    #[test]
    fn batch_keeps_good_writes_when_one_conflicts() {
        let repo = SqliteRepository::in_memory().unwrap();
        let a = repo.upsert(entry("A", 10, "101"), UpsertGuard::Always).unwrap();
        let b = repo.upsert(entry("B", 10, "202"), UpsertGuard::Always).unwrap();
        let stale_b = b.updated_at;
        repo.upsert(entry("B", 10, "303"), UpsertGuard::Always).unwrap();

        let mut a_done = a.clone();
        a_done.outcome = Outcome::Miss;
        let mut b_done = b.clone();
        b_done.outcome = Outcome::Miss;

        let results = repo
            .upsert_batch(vec![
                (a_done, UpsertGuard::UnchangedSince(a.updated_at)),
                (b_done, UpsertGuard::UnchangedSince(stale_b)),
            ])
            .unwrap();

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(DanError::Conflict(_))));
        assert_eq!(repo.get("A", day(10)).unwrap().unwrap().outcome, Outcome::Miss);
        assert_eq!(repo.get("B", day(10)).unwrap().unwrap().outcome, Outcome::Pending);
    }

    #[test]
    fn pending_days_and_owners() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.upsert(entry("A", 10, "101"), UpsertGuard::Always).unwrap();
        repo.upsert(entry("B", 11, "[VIP]"), UpsertGuard::Always).unwrap();
        repo.upsert(entry("C", 12, "121"), UpsertGuard::Always).unwrap();

        assert_eq!(repo.pending_days().unwrap(), vec![day(10), day(12)]);
        assert_eq!(repo.list_owners().unwrap().len(), 3);
        assert_eq!(repo.list_recent(2, 0).unwrap()[0].owner_name, "C");
    }
}
