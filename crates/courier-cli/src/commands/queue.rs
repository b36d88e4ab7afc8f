//! Queue commands - offline processing, clearing and statistics.

use anyhow::{Result, bail};
use colored::Colorize;
use courier_events::{BusError, EventBus, OfflineOptions};

use crate::theme::Theme;

/// Replay up to `limit` pending records for the bus's consumer.
pub(crate) async fn process_offline(bus: &EventBus, limit: usize) -> Result<()> {
    let report = match bus.process_offline(OfflineOptions::with_limit(limit)).await {
        Ok(report) => report,
        Err(BusError::ConsumerBusy(consumer)) => {
            println!(
                "{}",
                Theme::warning(&format!(
                    "Consumer '{consumer}' is already processing; try again later"
                ))
            );
            bail!("offline consumer busy");
        },
        Err(e) => return Err(e.into()),
    };

    if report.processed == 0 && report.failed_id.is_none() {
        println!("{}", Theme::info("No pending events"));
    } else {
        println!(
            "{}",
            Theme::success(&format!(
                "Processed {} event(s), cursor at {}",
                report.processed, report.last_id
            ))
        );
    }

    if let Some(id) = report.failed_id {
        println!(
            "{}",
            Theme::error(&format!(
                "Event {id} failed and stays pending; see the log for the subscriber error"
            ))
        );
        bail!("offline processing stopped at event {id}");
    }

    Ok(())
}

/// Delete every queued record. Refuses without `yes`.
pub(crate) async fn clear_queue(bus: &EventBus, yes: bool) -> Result<()> {
    if !yes {
        println!(
            "{}",
            Theme::warning("This deletes every queued event, pending ones included")
        );
        println!("Re-run with {} to confirm.", "--yes".bold());
        bail!("clear-queue not confirmed");
    }

    let removed = bus.clear_queue().await?;
    println!(
        "{}",
        Theme::success(&format!("Removed {removed} queued event(s)"))
    );
    Ok(())
}

/// Delete records that were already processed.
pub(crate) async fn clear_processed(bus: &EventBus) -> Result<()> {
    let removed = bus.clear_processed().await?;
    println!(
        "{}",
        Theme::success(&format!("Removed {removed} processed event(s)"))
    );
    Ok(())
}

/// Print queue counters and this consumer's cursor.
pub(crate) async fn show_stats(bus: &EventBus, json: bool) -> Result<()> {
    let stats = bus.queue_stats().await?;
    let cursor = bus.cursor().await?;

    if json {
        let value = serde_json::json!({
            "strategy": bus.strategy_kind(),
            "consumer": bus.consumer(),
            "cursor": cursor,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("\n{}", Theme::header("Event Queue"));
    println!("{}", Theme::separator());
    println!("{}", Theme::kv("strategy", bus.strategy_kind()));
    println!("{}", Theme::kv("consumer", bus.consumer()));
    println!("{}", Theme::kv("total", stats.total));
    println!("{}", Theme::kv("pending", stats.pending.to_string().yellow()));
    println!("{}", Theme::kv("processed", stats.processed.to_string().green()));
    println!("{}", Theme::kv("last id", stats.last_id));
    println!("{}", Theme::kv("cursor", cursor));
    println!();
    Ok(())
}
