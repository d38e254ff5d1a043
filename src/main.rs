use anyhow::{Context, Result, anyhow, bail};
use dan_engine::api::fetch_and_save_draws;
use dan_engine::utils::{days_in_range, parse_day};
use dan_engine::{DanService, HttpDrawSource, ReconcileReport, SqliteDrawStore, Width, config, generator};
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  dan-engine import <dir>                      store every *.json draw document in <dir>
  dan-engine sync <YYYY-MM-DD> [YYYY-MM-DD]    mirror draws from DAN_DRAW_API_URL
  dan-engine reconcile [YYYY-MM-DD]            settle one day, or every pending day
  dan-engine generate <n> <width> [seed]       draw n distinct numbers";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = config::load()?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("import") => {
            let dir = args.get(1).ok_or_else(|| anyhow!("import needs a directory\n{}", USAGE))?;
            import_dir(&config.database_url, Path::new(dir))
        }
        Some("sync") => {
            let start = parse_day(args.get(1).ok_or_else(|| anyhow!("sync needs a start day\n{}", USAGE))?)?;
            let end = match args.get(2) {
                Some(end) => parse_day(end)?,
                None => start,
            };
            let url = config
                .draw_api_url
                .as_deref()
                .ok_or_else(|| anyhow!("DAN_DRAW_API_URL is not set"))?;

            let store = SqliteDrawStore::open(&config.database_url)?;
            let source = HttpDrawSource::new(url, config.fetch_timeout())?;
            let saved = fetch_and_save_draws(&store, &source, &days_in_range(start, end)?).await?;
            println!("✅ {} draws saved", saved.len());
            Ok(())
        }
        Some("reconcile") => {
            let day = args.get(1).map(|d| parse_day(d)).transpose()?;
            let service = DanService::open(&config)?;
            let report = service.run_reconciliation(day).await?;
            print_report(&report);
            Ok(())
        }
        Some("generate") => {
            let count: i64 = args
                .get(1)
                .ok_or_else(|| anyhow!("generate needs a count\n{}", USAGE))?
                .parse()
                .context("count must be an integer")?;
            let width = match args.get(2) {
                Some(w) => Width::new(w.parse().context("width must be 2, 3 or 4")?)?,
                None => config.default_width,
            };
            let seed = args
                .get(3)
                .map(|s| s.parse::<u64>())
                .transpose()
                .context("seed must be a non-negative integer")?;

            let numbers = generator::generate_signed(count, width, seed)?;
            println!("{}", numbers.join(" "));
            Ok(())
        }
        _ => bail!("{}", USAGE),
    }
}

fn import_dir(database_url: &str, dir: &Path) -> Result<()> {
    let store = SqliteDrawStore::open(database_url)?;
    let mut imported = 0;

    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }

        tracing::info!("reading file: {}", path.display());
        let raw_json = fs::read_to_string(&path)?;
        match store.parse_and_insert_raw_json(&raw_json) {
            Ok(draw_id) => {
                imported += 1;
                println!("🎟️ Draw {} stored from {}", draw_id, path.display());
            }
            Err(e) => tracing::warn!("skipping {}: {}", path.display(), e),
        }
    }

    println!("✅ {} documents imported", imported);
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    for result in &report.results {
        println!(
            "{}  {:<16} {:<8} {}",
            result.day,
            result.owner_name,
            result.outcome.as_str(),
            result.note
        );
    }
    for error in &report.errors {
        println!("❌ {}: {}", error.day, error.message);
    }
    println!(
        "📋 {} entries settled, {} errors",
        report.processed,
        report.errors.len()
    );
}
