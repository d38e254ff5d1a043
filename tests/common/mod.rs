#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dan_engine::{DanError, DrawResult, DrawResultSource, Result, StaticDrawSource, Tier};

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
}

pub fn special(d: u32, numbers: &[&str]) -> DrawResult {
    DrawResult::new(day(d)).with_tier(Tier::Special, numbers.iter().copied())
}

/// Fails with `TransientIo` for the listed days, serves `inner` otherwise.
pub struct FailingDrawSource {
    pub inner: StaticDrawSource,
    pub failing: HashSet<NaiveDate>,
}

#[async_trait]
impl DrawResultSource for FailingDrawSource {
    async fn get_draw_result(&self, day: NaiveDate) -> Result<Option<DrawResult>> {
        if self.failing.contains(&day) {
            return Err(DanError::TransientIo(format!("provider unreachable for {}", day)));
        }
        self.inner.get_draw_result(day).await
    }
}

/// Answers after `delay`.
pub struct SlowDrawSource {
    pub inner: StaticDrawSource,
    pub delay: Duration,
}

#[async_trait]
impl DrawResultSource for SlowDrawSource {
    async fn get_draw_result(&self, day: NaiveDate) -> Result<Option<DrawResult>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_draw_result(day).await
    }
}

/// Records lookups per day and the highest number of lookups in flight.
pub struct CountingDrawSource {
    pub inner: StaticDrawSource,
    pub delay: Duration,
    calls: Mutex<HashMap<NaiveDate, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CountingDrawSource {
    pub fn new(inner: StaticDrawSource, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self, day: NaiveDate) -> usize {
        self.calls.lock().unwrap().get(&day).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DrawResultSource for CountingDrawSource {
    async fn get_draw_result(&self, day: NaiveDate) -> Result<Option<DrawResult>> {
        *self.calls.lock().unwrap().entry(day).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.get_draw_result(day).await
    }
}
