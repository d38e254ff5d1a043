use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use dan_engine::classifier::{self, CriteriaGroup, Tag};
use dan_engine::utils::parse_day;
use dan_engine::{DanService, NumberUniverse, Page, Width, generator};

fn required_str<'a>(arguments: &'a HashMap<String, Value>, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Missing {} parameter", key))
}

fn optional_day(arguments: &HashMap<String, Value>, key: &str) -> Result<Option<NaiveDate>> {
    match arguments.get(key).and_then(|v| v.as_str()) {
        Some(day) => Ok(Some(parse_day(day)?)),
        None => Ok(None),
    }
}

fn optional_width(arguments: &HashMap<String, Value>) -> Result<Option<Width>> {
    match arguments.get("width") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let digits = value
                .as_u64()
                .and_then(|w| u8::try_from(w).ok())
                .ok_or_else(|| anyhow!("width must be 2, 3 or 4"))?;
            Ok(Some(Width::new(digits)?))
        }
    }
}

pub struct EntryUseCase {
    service: Arc<DanService>,
}

impl EntryUseCase {
    pub fn new(service: Arc<DanService>) -> Self {
        Self { service }
    }

    pub async fn submit_entry(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let owner_name = required_str(arguments, "owner_name")?;
        let raw_text = required_str(arguments, "raw_text")?;
        let day = optional_day(arguments, "day")?.unwrap_or_else(|| self.service.today());
        let width = optional_width(arguments)?;

        let submission = self.service.submit_entry(owner_name, day, raw_text, width)?;

        Ok(json!({
            "success": true,
            "unchanged": submission.unchanged,
            "entry": submission.entry,
            "warnings": submission.warnings,
            "message": format!(
                "Stored {} numbers for {} ({})",
                submission.entry.resolved_numbers.len(),
                submission.entry.owner_name,
                submission.entry.label
            )
        })
        .to_string())
    }

    pub async fn get_entry(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let owner_name = required_str(arguments, "owner_name")?;
        let day = optional_day(arguments, "day")?.unwrap_or_else(|| self.service.today());

        let entry = self.service.get_entry(owner_name, day)?;
        Ok(json!({
            "success": true,
            "entry": entry
        })
        .to_string())
    }

    pub async fn list_entries(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let day = optional_day(arguments, "day")?;
        let owner_name = arguments.get("owner_name").and_then(|v| v.as_str());
        let defaults = Page::default();
        let page = Page {
            limit: arguments
                .get("limit")
                .and_then(|v| v.as_u64())
                .map(|l| l as usize)
                .unwrap_or(defaults.limit),
            offset: arguments
                .get("offset")
                .and_then(|v| v.as_u64())
                .map(|o| o as usize)
                .unwrap_or(defaults.offset),
        };

        let entries = self.service.list_entries(day, owner_name, page)?;
        Ok(json!({
            "success": true,
            "count": entries.len(),
            "entries": entries
        })
        .to_string())
    }

    pub async fn list_owners(&self, _arguments: &HashMap<String, Value>) -> Result<String> {
        let owners = self.service.list_owners()?;
        Ok(json!({
            "success": true,
            "owners": owners
        })
        .to_string())
    }
}

pub struct ReconcileUseCase {
    service: Arc<DanService>,
}

impl ReconcileUseCase {
    pub fn new(service: Arc<DanService>) -> Self {
        Self { service }
    }

    pub async fn run_reconciliation(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let day = optional_day(arguments, "day")?;
        let report = self.service.run_reconciliation(day).await?;

        Ok(json!({
            "success": report.errors.is_empty(),
            "processed": report.processed,
            "results": report.results,
            "errors": report.errors
        })
        .to_string())
    }
}

pub struct NumberUseCase {
    default_width: Width,
}

impl NumberUseCase {
    pub fn new(default_width: Width) -> Self {
        Self { default_width }
    }

    pub async fn generate_numbers(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let count = arguments
            .get("count")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow!("Missing count parameter"))?;
        let width = optional_width(arguments)?.unwrap_or(self.default_width);
        let seed = arguments.get("seed").and_then(|v| v.as_u64());

        let numbers = generator::generate_signed(count, width, seed)?;
        Ok(json!({
            "success": true,
            "width": width,
            "numbers": numbers
        })
        .to_string())
    }

    pub async fn classify_number(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let number = required_str(arguments, "number")?;
        let width = optional_width(arguments)?.unwrap_or(self.default_width);

        let tags = classifier::classify(number, width)?;
        Ok(json!({
            "success": true,
            "number": number,
            "tags": tags
        })
        .to_string())
    }

    pub async fn filter_numbers(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let width = optional_width(arguments)?.unwrap_or(self.default_width);
        let criteria = parse_criteria(arguments.get("criteria"))?;

        let numbers = classifier::filter_by_criteria(&NumberUniverse::new(width), &criteria);
        Ok(json!({
            "success": true,
            "count": numbers.len(),
            "numbers": numbers
        })
        .to_string())
    }
}

/// `[["head:even"], ["touch:5", "touch:7"]]`: every inner list must match,
/// any tag within a list may.
fn parse_criteria(value: Option<&Value>) -> Result<Vec<CriteriaGroup>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let groups = value
        .as_array()
        .ok_or_else(|| anyhow!("criteria must be an array of tag arrays"))?;

    let mut criteria = Vec::with_capacity(groups.len());
    for group in groups {
        let tags = group
            .as_array()
            .ok_or_else(|| anyhow!("criteria must be an array of tag arrays"))?;
        let mut parsed = Vec::with_capacity(tags.len());
        for tag in tags {
            let text = tag
                .as_str()
                .ok_or_else(|| anyhow!("criterion tags must be strings"))?;
            parsed.push(text.parse::<Tag>()?);
        }
        criteria.push(parsed);
    }
    Ok(criteria)
}
