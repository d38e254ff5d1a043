use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;
use tracing::{info, warn};

use crate::draws::{DrawResultSource, SqliteDrawStore};
use crate::error::Result;
use crate::types::{DrawRequest, DrawResponse, DrawResult};
use crate::utils::{format_day, format_day_for_api};

/// Draw results fetched from the provider's HTTP endpoint.
pub struct HttpDrawSource {
    client: reqwest::Client,
    url: String,
}

impl HttpDrawSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub async fn fetch_draw_response(&self, day: NaiveDate) -> Result<DrawResponse> {
        let (date, month, year) = format_day_for_api(day);
        let request_body = DrawRequest { date, month, year };

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?
            .error_for_status()?;

        let draw_response: DrawResponse = response.json().await?;
        Ok(draw_response)
    }
}

#[async_trait]
impl DrawResultSource for HttpDrawSource {
    async fn get_draw_result(&self, day: NaiveDate) -> Result<Option<DrawResult>> {
        let response = self.fetch_draw_response(day).await?;

        if !(response.status && response.status_code == 200) {
            warn!(
                "draw provider answered {} ({}) for {}",
                response.status_message,
                response.status_code,
                format_day(day)
            );
            return Ok(None);
        }

        let Some(result) = response.response.and_then(|r| r.result) else {
            return Ok(None);
        };

        let draw = result.into_draw_result()?;
        // Providers answer with the latest draw when the requested one is
        // not out yet.
        if draw.day != day {
            return Ok(None);
        }
        Ok(Some(draw))
    }
}

/// Mirror the draws of `days` from `source` into `store`, skipping days
/// already stored. Returns the days that were newly saved.
pub async fn fetch_and_save_draws(
    store: &SqliteDrawStore,
    source: &dyn DrawResultSource,
    days: &[NaiveDate],
) -> Result<Vec<NaiveDate>> {
    let (missing, existing) = store.check_existing_days(days)?;

    if !existing.is_empty() {
        info!("{} of {} days already stored locally", existing.len(), days.len());
    }

    let mut saved = Vec::new();
    for day in missing {
        match source.get_draw_result(day).await {
            Ok(Some(draw)) => {
                store.save_draw_result(&draw)?;
                info!("saved draw for {}", format_day(day));
                saved.push(day);
            }
            Ok(None) => info!("no draw posted for {}", format_day(day)),
            Err(e) => warn!("failed to fetch draw for {}: {}", format_day(day), e),
        }
    }

    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draws::StaticDrawSource;
    use crate::types::Tier;

    #[tokio::test]
    async fn mirrors_only_missing_days() {
        let d1 = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 1, 11).unwrap();
        let d3 = NaiveDate::from_ymd_opt(2025, 1, 12).unwrap();

        let store = SqliteDrawStore::in_memory().unwrap();
        store
            .save_draw_result(&DrawResult::new(d1).with_tier(Tier::Special, ["11111"]))
            .unwrap();

        let source = StaticDrawSource::with_draws([
            DrawResult::new(d1).with_tier(Tier::Special, ["99999"]),
            DrawResult::new(d2).with_tier(Tier::Special, ["22222"]),
        ]);

        let saved = fetch_and_save_draws(&store, &source, &[d1, d2, d3]).await.unwrap();
        assert_eq!(saved, vec![d2]);

        let kept = store.load_draw_result(d1).unwrap().unwrap();
        assert!(kept.winning_numbers_by_tier[&Tier::Special].contains("11111"));
    }
}
