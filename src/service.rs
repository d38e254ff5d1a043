use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::HttpDrawSource;
use crate::assembler::{ParseWarning, assemble_entry};
use crate::config::Config;
use crate::database::SqliteRepository;
use crate::draws::{DrawResultSource, SqliteDrawStore};
use crate::error::{DanError, Result};
use crate::reconcile::{CancelToken, Reconciler};
use crate::repository::{EntryRepository, UpsertGuard};
use crate::types::{Entry, Page, ReconcileReport, Width};
use crate::utils::{calendar_day, days_in_range, format_day};

pub const MAX_PAGE_LIMIT: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub entry: Entry,
    pub warnings: Vec<ParseWarning>,
    /// Blank text left the stored entry as it was.
    pub unchanged: bool,
}

/// Entry submission, listing and reconciliation over one repository and one
/// draw source.
#[derive(Clone)]
pub struct DanService {
    repo: Arc<dyn EntryRepository>,
    reconciler: Reconciler,
    default_width: Width,
    offset: FixedOffset,
}

impl DanService {
    pub fn new(
        repo: Arc<dyn EntryRepository>,
        draws: Arc<dyn DrawResultSource>,
        config: &Config,
    ) -> Result<Self> {
        let offset = config.reference_offset()?;
        let reconciler = Reconciler::new(Arc::clone(&repo), draws, config.reconcile_settings());
        Ok(Self {
            repo,
            reconciler,
            default_width: config.default_width,
            offset,
        })
    }

    /// SQLite-backed service for `config`. Draws come from the HTTP provider
    /// when one is configured, otherwise from the draws stored locally.
    pub fn open(config: &Config) -> Result<Self> {
        let repo = Arc::new(SqliteRepository::open(&config.database_url)?);
        let draws: Arc<dyn DrawResultSource> = match &config.draw_api_url {
            Some(url) => Arc::new(HttpDrawSource::new(url, config.fetch_timeout())?),
            None => Arc::new(SqliteDrawStore::open(&config.database_url)?),
        };
        Self::new(repo, draws, config)
    }

    pub fn default_width(&self) -> Width {
        self.default_width
    }

    /// Today in the reference timezone.
    pub fn today(&self) -> NaiveDate {
        calendar_day(Utc::now(), self.offset)
    }

    pub fn submit_entry(
        &self,
        owner_name: &str,
        day: NaiveDate,
        raw_text: &str,
        width: Option<Width>,
    ) -> Result<Submission> {
        let owner_name = owner_name.trim();
        if owner_name.is_empty() {
            return Err(DanError::InvalidRequest("owner name is empty".to_string()));
        }
        let width = width.unwrap_or(self.default_width);

        if raw_text.trim().is_empty() {
            // The repository keeps stored content and refuses to create
            // an empty entry.
            let blank = Entry::new(owner_name, day, width, "", Vec::new());
            let entry = self.repo.upsert(blank, UpsertGuard::Always)?;
            debug!("blank submission for {} / {} ignored", owner_name, format_day(day));
            return Ok(Submission {
                entry,
                warnings: Vec::new(),
                unchanged: true,
            });
        }

        let (entry, warnings) = assemble_entry(owner_name, day, raw_text, width)?;
        for warning in &warnings {
            debug!("{} / {}: {}", owner_name, format_day(day), warning);
        }

        let entry = self.repo.upsert(entry, UpsertGuard::Always)?;
        info!(
            "stored dàn of {} for {}: {} numbers, label {}",
            entry.owner_name,
            format_day(day),
            entry.resolved_numbers.len(),
            entry.label
        );
        Ok(Submission {
            entry,
            warnings,
            unchanged: false,
        })
    }

    /// Submit at `instant`, filed under its calendar day in the reference
    /// timezone.
    pub fn submit_entry_at(
        &self,
        owner_name: &str,
        instant: DateTime<Utc>,
        raw_text: &str,
        width: Option<Width>,
    ) -> Result<Submission> {
        self.submit_entry(owner_name, calendar_day(instant, self.offset), raw_text, width)
    }

    pub fn get_entry(&self, owner_name: &str, day: NaiveDate) -> Result<Entry> {
        let owner_name = owner_name.trim();
        if owner_name.is_empty() {
            return Err(DanError::InvalidRequest("owner name is empty".to_string()));
        }
        self.repo.get(owner_name, day)?.ok_or_else(|| {
            DanError::NotFound(format!("no dàn for {} on {}", owner_name, format_day(day)))
        })
    }

    pub fn list_entries(
        &self,
        day: Option<NaiveDate>,
        owner_name: Option<&str>,
        page: Page,
    ) -> Result<Vec<Entry>> {
        if page.limit == 0 {
            return Err(DanError::InvalidRequest("page limit must be positive".to_string()));
        }
        let limit = page.limit.min(MAX_PAGE_LIMIT);
        let owner_name = owner_name.map(str::trim).filter(|o| !o.is_empty());

        match (day, owner_name) {
            (Some(day), Some(owner)) => Ok(self
                .repo
                .get(owner, day)?
                .into_iter()
                .skip(page.offset)
                .take(limit)
                .collect()),
            (Some(day), None) => Ok(self
                .repo
                .list_by_day(day)?
                .into_iter()
                .skip(page.offset)
                .take(limit)
                .collect()),
            (None, Some(owner)) => self.repo.list_by_owner(owner, limit, page.offset),
            (None, None) => self.repo.list_recent(limit, page.offset),
        }
    }

    pub fn list_owners(&self) -> Result<Vec<String>> {
        Ok(self.repo.list_owners()?.into_iter().collect())
    }

    /// One day, or every day that still has Pending entries.
    pub async fn run_reconciliation(&self, day: Option<NaiveDate>) -> Result<ReconcileReport> {
        match day {
            Some(day) => Ok(self.reconciler.reconcile(day, false).await),
            None => self.reconciler.reconcile_pending(&CancelToken::new()).await,
        }
    }

    pub async fn reconcile_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<ReconcileReport> {
        let days = days_in_range(start, end)?;
        Ok(self.reconciler.reconcile_days(days, force, cancel).await)
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }
}
