//! Command handlers. Each prints one JSON document on success.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::ArgMatches;
use serde::Serialize;
use waitlist_core::{EntryId, FreedSlot, JoinRequest, TimeRange};

use super::{ledger::SqliteBookingLedger, setup::shutdown_signal};
use crate::{
    config::{load_config, EngineConfig},
    engine::WaitlistEngine,
    store::SqliteEntryStore,
};

pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    let config = resolve_config(matches)?;

    match matches.subcommand() {
        Some(("serve", _)) => return handle_serve(&config).await,
        Some((_, _)) => {}
        None => anyhow::bail!("No command given. Run 'waitlist --help' for usage."),
    }

    let engine = open_engine(&config).await?;
    let result = run_command(&engine, matches).await;
    engine.shutdown().await;
    result
}

/// Layered config plus the global CLI overrides.
fn resolve_config(matches: &ArgMatches) -> Result<EngineConfig> {
    let explicit = matches.get_one::<String>("config").map(Path::new);
    let mut config = load_config(explicit)?;

    if let Some(url) = matches.get_one::<String>("database") {
        config.database_url.clone_from(url);
    }
    if let Some(ttl) = matches.get_one::<u64>("offer-ttl") {
        config.offer_ttl_secs = *ttl;
    }
    if let Some(interval) = matches
        .subcommand_matches("serve")
        .and_then(|m| m.get_one::<u64>("sweep-interval"))
    {
        config.sweep_interval_secs = *interval;
    }
    config.validate()?;
    Ok(config)
}

async fn open_engine(config: &EngineConfig) -> Result<WaitlistEngine> {
    let store = SqliteEntryStore::open(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    let ledger = SqliteBookingLedger::open(store.pool().clone()).await?;
    let engine = WaitlistEngine::builder(Arc::new(store), Arc::new(ledger))
        .config(config)
        .start()
        .await?;
    Ok(engine)
}

async fn run_command(engine: &WaitlistEngine, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("join", sub)) => handle_join(engine, sub).await,
        Some(("leave", sub)) => print_json(&engine.leave(&entry_id(sub)?).await?),
        Some(("position", sub)) => handle_position(engine, sub).await,
        Some(("list", sub)) => print_json(&engine.list_for_user(required(sub, "user")?).await?),
        Some(("free-slot", sub)) => handle_free_slot(engine, sub).await,
        Some(("confirm", sub)) => handle_confirm(engine, sub).await,
        Some(("skip", sub)) => print_json(&engine.skip(&entry_id(sub)?).await?),
        Some(("events", sub)) => print_json(&engine.events(&entry_id(sub)?).await?),
        Some(("stats", _)) => print_json(&engine.stats().await?),
        Some(("sweep", _)) => {
            let expired = engine.reconcile().await?;
            print_json(&serde_json::json!({ "expired": expired }))
        }
        _ => anyhow::bail!("Unknown command. Run 'waitlist --help' for usage."),
    }
}

async fn handle_join(engine: &WaitlistEngine, matches: &ArgMatches) -> Result<()> {
    let request = JoinRequest {
        user_id: required(matches, "user")?.to_string(),
        salon_id: required(matches, "salon")?.to_string(),
        service_id: required(matches, "service")?.to_string(),
        staff_id: matches.get_one::<String>("staff").cloned(),
        preferred_date: *matches
            .get_one::<NaiveDate>("date")
            .context("Missing --date")?,
        preferred_time_slots: matches
            .get_many::<TimeRange>("slot")
            .map(|ranges| ranges.copied().collect())
            .unwrap_or_default(),
    };
    print_json(&engine.join(request).await?)
}

async fn handle_position(engine: &WaitlistEngine, matches: &ArgMatches) -> Result<()> {
    let id = entry_id(matches)?;
    let position = engine.get_position(&id).await?;
    print_json(&serde_json::json!({ "entry_id": id, "position": position }))
}

async fn handle_free_slot(engine: &WaitlistEngine, matches: &ArgMatches) -> Result<()> {
    let slot = FreedSlot {
        salon_id: required(matches, "salon")?.to_string(),
        service_id: required(matches, "service")?.to_string(),
        staff_id: matches.get_one::<String>("staff").cloned(),
        date: *matches
            .get_one::<NaiveDate>("date")
            .context("Missing --date")?,
        time: *matches
            .get_one::<NaiveTime>("time")
            .context("Missing --time")?,
    };
    print_json(&engine.on_slot_freed(slot).await?)
}

async fn handle_confirm(engine: &WaitlistEngine, matches: &ArgMatches) -> Result<()> {
    let id = entry_id(matches)?;
    let booking = engine.confirm(&id).await?;
    print_json(&serde_json::json!({ "entry_id": id, "booking_ref": booking }))
}

async fn handle_serve(config: &EngineConfig) -> Result<()> {
    let engine = open_engine(config).await?;
    engine.spawn_sweeper(config.sweep_interval()).await;
    tracing::info!(
        database_url = %config.database_url,
        offer_ttl_secs = config.offer_ttl_secs,
        sweep_interval_secs = config.sweep_interval_secs,
        "Waitlist engine serving"
    );

    let signal = shutdown_signal().await;
    engine.shutdown().await;
    signal?;
    print_json(&engine.stats().await?)
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("Missing --{name}"))
}

fn entry_id(matches: &ArgMatches) -> Result<EntryId> {
    matches
        .get_one::<String>("entry-id")
        .map(EntryId::new)
        .context("Missing ENTRY_ID")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    #[allow(clippy::print_stdout)]
    {
        println!("{json}");
    }
    Ok(())
}
