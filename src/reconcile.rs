//! Settles open entries against posted draws.
//!
//! Each day is handled on its own: the draw is fetched once, every eligible
//! entry is evaluated independently, and the results are written back in a
//! single guarded batch. A failing day is reported and left Pending without
//! affecting the other days of the run.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::draws::DrawResultSource;
use crate::error::{DanError, Result};
use crate::repository::{EntryRepository, UpsertGuard};
use crate::types::{
    DayError, DrawResult, Entry, EntryOutcome, HIT_PREFIX, MISS_NOTE, Outcome, ReconcileReport, Tier,
};
use crate::utils::format_day;

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Tiers whose numbers count as winning.
    pub tiers: Vec<Tier>,
    pub fetch_timeout: Duration,
    pub max_concurrent_days: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            tiers: vec![Tier::Special],
            fetch_timeout: Duration::from_secs(10),
            max_concurrent_days: 4,
        }
    }
}

/// Cooperative cancellation shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Result of checking one entry against one draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub outcome: Outcome,
    pub matched_numbers: BTreeSet<String>,
    pub note: String,
}

impl Verdict {
    fn already_applied(&self, entry: &Entry) -> bool {
        entry.outcome == self.outcome
            && entry.matched_numbers == self.matched_numbers
            && entry.note == self.note
    }

    fn apply(self, entry: &mut Entry) {
        entry.outcome = self.outcome;
        entry.matched_numbers = self.matched_numbers;
        entry.note = self.note;
    }
}

/// Compare an entry's numbers with the winning numbers of `tiers`.
pub fn evaluate(entry: &Entry, draw: &DrawResult, tiers: &[Tier]) -> Verdict {
    let winning = draw.winning_numbers(tiers, entry.width);
    let matched: BTreeSet<String> = entry
        .resolved_numbers
        .intersection(&winning)
        .cloned()
        .collect();

    if matched.is_empty() {
        return Verdict {
            outcome: Outcome::Miss,
            matched_numbers: matched,
            note: MISS_NOTE.to_string(),
        };
    }

    let mut labels: Vec<String> = Vec::new();
    for group in &entry.groups {
        if group.numbers.iter().any(|n| matched.contains(n)) {
            let label = group.label();
            if !label.is_empty() && !labels.contains(&label) {
                labels.push(label);
            }
        }
    }
    let label = if labels.is_empty() {
        entry.size_label()
    } else {
        labels.join(", ")
    };

    Verdict {
        outcome: Outcome::Hit,
        matched_numbers: matched,
        note: format!("{}{}", HIT_PREFIX, label),
    }
}

fn outcome_of(entry: &Entry) -> EntryOutcome {
    EntryOutcome {
        entry_id: entry.id,
        owner_name: entry.owner_name.clone(),
        day: entry.day,
        outcome: entry.outcome,
        matched_numbers: entry.matched_numbers.clone(),
        note: entry.note.clone(),
    }
}

#[derive(Clone)]
pub struct Reconciler {
    repo: Arc<dyn EntryRepository>,
    draws: Arc<dyn DrawResultSource>,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn EntryRepository>,
        draws: Arc<dyn DrawResultSource>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            repo,
            draws,
            settings,
        }
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    pub async fn reconcile(&self, day: NaiveDate, force: bool) -> ReconcileReport {
        self.reconcile_day(day, force, &CancelToken::new()).await
    }

    /// Every day that still has Pending entries with numbers.
    pub async fn reconcile_pending(&self, cancel: &CancelToken) -> Result<ReconcileReport> {
        let days = self.with_repo(|repo| repo.pending_days()).await?;
        Ok(self.reconcile_days(days, false, cancel).await)
    }

    /// Reconcile `days` concurrently, at most `max_concurrent_days` at once.
    pub async fn reconcile_days(
        &self,
        days: Vec<NaiveDate>,
        force: bool,
        cancel: &CancelToken,
    ) -> ReconcileReport {
        let days: BTreeSet<NaiveDate> = days.into_iter().collect();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_days.max(1)));
        let mut handles = Vec::with_capacity(days.len());

        for day in days {
            if cancel.is_cancelled() {
                info!("reconciliation cancelled before {}", format_day(day));
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let this = self.clone();
            let cancel = cancel.clone();

            handles.push((
                day,
                tokio::spawn(async move {
                    let _permit = permit;
                    this.reconcile_day(day, force, &cancel).await
                }),
            ));
        }

        let mut report = ReconcileReport::default();
        for (day, handle) in handles {
            match handle.await {
                Ok(day_report) => report.merge(day_report),
                Err(e) => report.errors.push(DayError::new(
                    day,
                    &DanError::TransientIo(format!("reconciliation task failed: {}", e)),
                )),
            }
        }
        report.sort();
        report
    }

    /// Runs a repository call on the blocking pool.
    async fn with_repo<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn EntryRepository) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || f(repo.as_ref()))
            .await
            .map_err(|e| DanError::TransientIo(format!("repository task failed: {}", e)))?
    }

    async fn fetch_draw(&self, day: NaiveDate) -> Result<Option<DrawResult>> {
        match tokio::time::timeout(self.settings.fetch_timeout, self.draws.get_draw_result(day)).await {
            Ok(Ok(draw)) => Ok(draw),
            Ok(Err(DanError::NotFound(_))) => Ok(None),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DanError::TransientIo(format!(
                "draw lookup for {} timed out after {} ms",
                format_day(day),
                self.settings.fetch_timeout.as_millis()
            ))),
        }
    }

    async fn reconcile_day(&self, day: NaiveDate, force: bool, cancel: &CancelToken) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if cancel.is_cancelled() {
            return report;
        }

        let draw = match self.fetch_draw(day).await {
            Ok(Some(draw)) => draw,
            Ok(None) => {
                info!("no draw posted for {}, entries stay pending", format_day(day));
                return report;
            }
            Err(e) => {
                warn!("draw lookup failed for {}: {}", format_day(day), e);
                report.errors.push(DayError::new(day, &e));
                return report;
            }
        };

        let entries = match self.with_repo(move |repo| repo.list_by_day(day)).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("could not list entries for {}: {}", format_day(day), e);
                report.errors.push(DayError::new(day, &e));
                return report;
            }
        };

        let mut writes = Vec::new();
        let mut unchanged = Vec::new();
        for entry in entries {
            if entry.resolved_numbers.is_empty() || (entry.outcome.is_resolved() && !force) {
                continue;
            }

            let verdict = evaluate(&entry, &draw, &self.settings.tiers);
            if verdict.already_applied(&entry) {
                unchanged.push(outcome_of(&entry));
                continue;
            }

            let guard = UpsertGuard::UnchangedSince(entry.updated_at);
            let mut updated = entry;
            verdict.apply(&mut updated);
            writes.push((updated, guard));
        }

        if cancel.is_cancelled() {
            info!("reconciliation of {} cancelled before writing", format_day(day));
            return report;
        }

        report.processed += unchanged.len();
        report.results.extend(unchanged);

        if writes.is_empty() {
            debug!("nothing to write for {}", format_day(day));
            return report;
        }

        match self.with_repo(move |repo| repo.upsert_batch(writes)).await {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(stored) => {
                            report.processed += 1;
                            report.results.push(outcome_of(&stored));
                        }
                        Err(e) => {
                            warn!("entry on {} not settled: {}", format_day(day), e);
                            report.errors.push(DayError::new(day, &e));
                        }
                    }
                }
            }
            Err(e) => {
                warn!("writing outcomes for {} failed: {}", format_day(day), e);
                report.errors.push(DayError::new(day, &e));
            }
        }

        let hits = report
            .results
            .iter()
            .filter(|r| r.outcome == Outcome::Hit)
            .count();
        info!(
            "reconciled {}: {} entries, {} hit, {} errors",
            format_day(day),
            report.processed,
            hits,
            report.errors.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble_entry;
    use crate::types::Width;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
    }

    fn entry(text: &str, width: Width) -> Entry {
        assemble_entry("A", day(), text, width).unwrap().0
    }

    #[test]
    fn hit_note_names_matching_group() {
        let draw = DrawResult::new(day()).with_tier(Tier::Special, ["202"]);
        let verdict = evaluate(&entry("3X 101 202 303", Width::THREE), &draw, &[Tier::Special]);

        assert_eq!(verdict.outcome, Outcome::Hit);
        assert_eq!(verdict.matched_numbers, BTreeSet::from(["202".to_string()]));
        assert_eq!(verdict.note, "Trúng: 3X");
    }

    #[test]
    fn unlabeled_hit_falls_back_to_size_label() {
        let draw = DrawResult::new(day()).with_tier(Tier::Special, ["45612"]);
        let verdict = evaluate(&entry("12 34", Width::TWO), &draw, &[Tier::Special]);
        assert_eq!(verdict.note, "Trúng: STĐ");
    }

    #[test]
    fn several_matching_groups_are_joined() {
        let draw = DrawResult::new(day())
            .with_tier(Tier::Special, ["00012"])
            .with_tier(Tier::First, ["00077"]);
        let e = entry("[A] 12 [B] 34 [C] 77", Width::TWO);

        let verdict = evaluate(&e, &draw, &[Tier::Special, Tier::First]);
        assert_eq!(verdict.note, "Trúng: A, C");

        let special_only = evaluate(&e, &draw, &[Tier::Special]);
        assert_eq!(special_only.note, "Trúng: A");
    }

    #[test]
    fn miss_note() {
        let draw = DrawResult::new(day()).with_tier(Tier::Special, ["99999"]);
        let verdict = evaluate(&entry("12 34", Width::TWO), &draw, &[Tier::Special]);
        assert_eq!(verdict.outcome, Outcome::Miss);
        assert!(verdict.matched_numbers.is_empty());
        assert_eq!(verdict.note, "Trượt");
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
