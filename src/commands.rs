use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;

use oi_tracker::acquire::CycleReport;
use oi_tracker::api;
use oi_tracker::config::AppConfig;
use oi_tracker::model::{Reconciliation, Symbol, strike_key};
use oi_tracker::service::OiService;
use oi_tracker::store::{SnapshotStore, SqliteStore, dedup};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

fn load() -> Result<(AppConfig, Arc<dyn SnapshotStore>)> {
    let config = AppConfig::from_env().context("reading configuration")?;
    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening database at {}", config.db_path.display()))?;
    Ok((config, Arc::new(store)))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("creating tokio runtime")
}

/// Broadcast a shutdown on Ctrl-C.
fn on_ctrl_c(tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = tx.send(());
        }
    });
}

fn print_report(report: &CycleReport) {
    println!("  Persisted: {:?}", report.persisted);
    println!("  Unchanged: {:?}", report.unchanged);
    println!("  Failed:    {:?}", report.failed);
}

// ── serve ────────────────────────────────────────────────────────────

pub fn serve(host: &str, port: u16, no_poll: bool) -> Result<()> {
    let (config, store) = load()?;

    println!("=== oi-tracker serve ===");
    println!("Database: {}", config.db_path.display());
    println!("Mock:     {}", config.use_mock);
    println!("Symbols:  {:?}", config.orchestrator.symbols);
    if no_poll {
        println!("Polling:  disabled");
    } else {
        println!(
            "Polling:  every {}s (first in {}s)",
            config.orchestrator.poll_interval.as_secs(),
            config.orchestrator.initial_delay.as_secs()
        );
    }
    println!();

    runtime()?.block_on(serve_async(host, port, no_poll, config, store))
}

async fn serve_async(
    host: &str,
    port: u16,
    no_poll: bool,
    config: AppConfig,
    store: Arc<dyn SnapshotStore>,
) -> Result<()> {
    let service = OiService::from_config(&config, store);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let poller = (!no_poll).then(|| {
        tokio::spawn(
            service
                .orchestrator()
                .clone()
                .run_scheduler(shutdown_tx.subscribe()),
        )
    });

    let mut server_rx = shutdown_tx.subscribe();
    on_ctrl_c(shutdown_tx);

    api::serve(host, port, service.clone(), async move {
        let _ = server_rx.recv().await;
    })
    .await?;

    if let Some(poller) = poller {
        let _ = poller.await;
    }
    println!("Shutting down gracefully...");
    service.shutdown(SHUTDOWN_TIMEOUT).await;
    Ok(())
}

// ── poll ─────────────────────────────────────────────────────────────

pub fn poll(once: bool) -> Result<()> {
    let (config, store) = load()?;
    runtime()?.block_on(poll_async(once, config, store))
}

async fn poll_async(once: bool, config: AppConfig, store: Arc<dyn SnapshotStore>) -> Result<()> {
    let service = OiService::from_config(&config, store);
    let orchestrator = service.orchestrator().clone();

    if once {
        println!("── Single cycle (--once) ──");
        if let Some(report) = orchestrator.run_cycle().await {
            print_report(&report);
        }
    } else {
        println!(
            "── Polling every {}s (Ctrl-C to stop) ──",
            config.orchestrator.poll_interval.as_secs()
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        on_ctrl_c(shutdown_tx);
        orchestrator.run_scheduler(shutdown_rx).await;
    }

    service.shutdown(SHUTDOWN_TIMEOUT).await;
    Ok(())
}

// ── fetch ────────────────────────────────────────────────────────────

pub fn fetch(symbol: &str) -> Result<()> {
    let symbol: Symbol = symbol.parse()?;
    let (config, store) = load()?;
    runtime()?.block_on(fetch_async(symbol, config, store))
}

async fn fetch_async(symbol: Symbol, config: AppConfig, store: Arc<dyn SnapshotStore>) -> Result<()> {
    let service = OiService::from_config(&config, store);
    println!("Fetching {symbol}...");

    let outcome = service
        .orchestrator()
        .acquirer()
        .fetch_with_retry(symbol)
        .await;
    match outcome {
        Some(Reconciliation::Persisted(record)) => {
            let totals = record.payload.totals();
            println!("Persisted record {:?}", record.id);
            println!("  Source time: {}", record.payload.identity_key());
            println!("  Spot:        {:.2}", record.payload.underlying_value);
            println!("  Strikes:     {}", record.payload.rows.len());
            println!("  PCR:         {:.3}", totals.put_call_ratio);
        }
        Some(Reconciliation::NoChange) => println!("No material change; nothing stored."),
        None => println!("Failed: no data obtained for {symbol}."),
    }

    service.shutdown(SHUTDOWN_TIMEOUT).await;
    Ok(())
}

// ── dedup ────────────────────────────────────────────────────────────

pub fn dedup(dry_run: bool) -> Result<()> {
    let (_, store) = load()?;
    runtime()?.block_on(dedup_async(dry_run, store))
}

async fn dedup_async(dry_run: bool, store: Arc<dyn SnapshotStore>) -> Result<()> {
    if dry_run {
        for symbol in Symbol::ALL {
            let records = store.history(symbol, None).await?;
            let dupes = dedup::duplicate_ids(&records);
            println!(
                "{symbol}: {} records, {} duplicates (dry run)",
                records.len(),
                dupes.len()
            );
        }
    } else {
        for report in dedup::sweep_all(store.as_ref(), &Symbol::ALL).await? {
            println!(
                "{}: {} records, {} duplicates removed",
                report.symbol, report.scanned, report.removed
            );
        }
    }
    println!("Cleanup complete.");
    Ok(())
}

// ── inspect ──────────────────────────────────────────────────────────

pub fn inspect(symbol: &str, limit: usize) -> Result<()> {
    let symbol: Symbol = symbol.parse()?;
    let (_, store) = load()?;
    runtime()?.block_on(inspect_async(symbol, limit, store))
}

async fn inspect_async(symbol: Symbol, limit: usize, store: Arc<dyn SnapshotStore>) -> Result<()> {
    let total = store.count(symbol).await?;
    let mut records = store.history(symbol, Some(limit)).await?;
    records.reverse();

    println!("{symbol}: {total} stored records");
    let step = symbol.strike_step();
    for (i, rec) in records.iter().enumerate() {
        let snap = &rec.payload;
        let atm = (snap.underlying_value / step).round() * step;
        let atm_row = snap.rows.iter().find(|r| r.strike_key() == strike_key(atm));
        let totals = snap.totals();

        println!(
            "[{i}] Time: {}, Source: {}, Spot: {:.2}, Strikes: {}",
            rec.timestamp.format("%Y-%m-%d %H:%M:%S"),
            snap.source_timestamp.as_deref().unwrap_or("-"),
            snap.underlying_value,
            snap.rows.len()
        );
        match atm_row {
            Some(row) => println!(
                "    ATM({atm}) CE_OI: {} PE_OI: {}",
                row.call.open_interest, row.put.open_interest
            ),
            None => println!("    ATM({atm}) not in chain"),
        }
        println!(
            "    Total CE_OI: {} PE_OI: {} PCR: {:.3}",
            totals.call_open_interest, totals.put_open_interest, totals.put_call_ratio
        );
    }
    Ok(())
}
