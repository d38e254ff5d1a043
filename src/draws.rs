use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::database;
use crate::error::{DanError, Result};
use crate::types::{DrawResponse, DrawResult, Tier};
use crate::utils::{format_day, parse_day};

/// Read access to official draw results.
///
/// `Ok(None)` means the draw for `day` has not been posted yet.
#[async_trait]
pub trait DrawResultSource: Send + Sync {
    async fn get_draw_result(&self, day: NaiveDate) -> Result<Option<DrawResult>>;
}

/// Fixed set of draws held in memory.
#[derive(Debug, Default)]
pub struct StaticDrawSource {
    draws: Mutex<HashMap<NaiveDate, DrawResult>>,
}

impl StaticDrawSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_draws<I: IntoIterator<Item = DrawResult>>(draws: I) -> Self {
        let map = draws.into_iter().map(|draw| (draw.day, draw)).collect();
        Self {
            draws: Mutex::new(map),
        }
    }

    pub fn insert(&self, draw: DrawResult) -> Result<()> {
        let mut draws = self
            .draws
            .lock()
            .map_err(|_| DanError::TransientIo("draw map lock poisoned".to_string()))?;
        draws.insert(draw.day, draw);
        Ok(())
    }
}

#[async_trait]
impl DrawResultSource for StaticDrawSource {
    async fn get_draw_result(&self, day: NaiveDate) -> Result<Option<DrawResult>> {
        let draws = self
            .draws
            .lock()
            .map_err(|_| DanError::TransientIo("draw map lock poisoned".to_string()))?;
        Ok(draws.get(&day).cloned())
    }
}

/// Draw results mirrored into the local SQLite file. Async lookups run on
/// the blocking pool so callers can bound them with a timeout.
pub struct SqliteDrawStore {
    conn: Arc<Mutex<Connection>>,
}

fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| DanError::TransientIo("draw store lock poisoned".to_string()))
}

impl SqliteDrawStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn open(database_path: &str) -> Result<Self> {
        Ok(Self::new(database::conn(database_path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(database::in_memory_conn()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        lock_conn(&self.conn)
    }

    pub fn save_draw_result(&self, draw: &DrawResult) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let draw_id = save_draw_result(&tx, draw)?;
        tx.commit()?;
        Ok(draw_id)
    }

    /// Parse a provider response document and store its result.
    pub fn parse_and_insert_raw_json(&self, raw_json: &str) -> Result<i64> {
        let draw = parse_raw_json(raw_json)?;
        self.save_draw_result(&draw)
    }

    pub fn draw_exists_for_day(&self, day: NaiveDate) -> Result<bool> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM draw_results WHERE draw_date = ?1")?;
        let count: i64 = stmt.query_row([format_day(day)], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Split `days` into those still missing locally and those already stored.
    pub fn check_existing_days(&self, days: &[NaiveDate]) -> Result<(Vec<NaiveDate>, Vec<NaiveDate>)> {
        let mut missing = Vec::new();
        let mut existing = Vec::new();
        for &day in days {
            if self.draw_exists_for_day(day)? {
                existing.push(day);
            } else {
                missing.push(day);
            }
        }
        Ok((missing, existing))
    }

    pub fn list_draw_days(&self) -> Result<Vec<NaiveDate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT draw_date FROM draw_results ORDER BY draw_date DESC")?;
        let day_iter = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut days = Vec::new();
        for day in day_iter {
            days.push(parse_day(&day?)?);
        }
        Ok(days)
    }

    pub fn load_draw_result(&self, day: NaiveDate) -> Result<Option<DrawResult>> {
        let conn = self.lock()?;
        load_draw_result(&conn, day)
    }
}

#[async_trait]
impl DrawResultSource for SqliteDrawStore {
    async fn get_draw_result(&self, day: NaiveDate) -> Result<Option<DrawResult>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&conn)?;
            load_draw_result(&conn, day)
        })
        .await
        .map_err(|e| DanError::TransientIo(format!("draw lookup task failed: {}", e)))?
    }
}

/// Accepts the provider's `status/response/result` envelope.
pub fn parse_raw_json(raw_json: &str) -> Result<DrawResult> {
    let response: DrawResponse = serde_json::from_str(raw_json)?;

    if !response.status {
        return Err(DanError::Validation(format!(
            "document status is false: {} ({})",
            response.status_message, response.status_code
        )));
    }

    let result = response
        .response
        .and_then(|r| r.result)
        .ok_or_else(|| DanError::Validation("missing result in document".to_string()))?;

    result.into_draw_result()
}

fn save_draw_result(conn: &Connection, draw: &DrawResult) -> Result<i64> {
    let draw_date = format_day(draw.day);
    conn.execute(
        "INSERT OR IGNORE INTO draw_results (draw_date) VALUES (?1)",
        [&draw_date],
    )?;

    let draw_id: i64 = if conn.changes() > 0 {
        conn.last_insert_rowid()
    } else {
        let mut stmt = conn.prepare("SELECT id FROM draw_results WHERE draw_date = ?1")?;
        stmt.query_row([&draw_date], |row| row.get::<_, i64>(0))?
    };

    for (tier, numbers) in &draw.winning_numbers_by_tier {
        for (round, number) in numbers.iter().enumerate() {
            conn.execute(
                "INSERT OR IGNORE INTO prize_numbers (
                    draw_id, tier, number_value, round_number
                ) VALUES (?1, ?2, ?3, ?4)",
                params![draw_id, tier.as_str(), number, round as i64 + 1],
            )?;
        }
    }

    Ok(draw_id)
}

fn load_draw_result(conn: &Connection, day: NaiveDate) -> Result<Option<DrawResult>> {
    let draw_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM draw_results WHERE draw_date = ?1",
            [format_day(day)],
            |row| row.get(0),
        )
        .optional()?;

    let Some(draw_id) = draw_id else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT tier, number_value FROM prize_numbers
         WHERE draw_id = ?1 ORDER BY tier, round_number",
    )?;
    let prize_iter = stmt.query_map([draw_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut by_tier: BTreeMap<Tier, BTreeSet<String>> = BTreeMap::new();
    for prize in prize_iter {
        let (tier, number) = prize?;
        let tier: Tier = tier
            .parse()
            .map_err(|e| DanError::TransientIo(format!("corrupt tier column: {}", e)))?;
        by_tier.entry(tier).or_default().insert(number);
    }

    Ok(Some(DrawResult {
        day,
        winning_numbers_by_tier: by_tier,
    }))
}
