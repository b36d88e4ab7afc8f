//! Emit command - publish one event from the command line.

use anyhow::{Context, Result, bail};
use courier_events::{DispatchOutcome, EmitOptions, EventBus};

use crate::theme::Theme;

/// Emit `name` with a JSON payload.
///
/// Exits with an error when a synchronous subscriber vetoes.
pub(crate) async fn emit_event(
    bus: &EventBus,
    name: &str,
    payload: &str,
    previous: Option<&str>,
    persistent: bool,
) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("--payload is not valid JSON")?;

    let mut options = if persistent {
        EmitOptions::persistent()
    } else {
        EmitOptions::new()
    };
    if let Some(previous) = previous {
        let previous =
            serde_json::from_str(previous).context("--previous is not valid JSON")?;
        options = options.with_previous(previous);
    }

    let receipt = bus.emit_event(name, payload, options).await?;
    bus.wait_idle().await;

    match &receipt.outcome {
        DispatchOutcome::Vetoed { subscriber, veto } => {
            println!(
                "{}",
                Theme::error(&format!(
                    "Vetoed by '{subscriber}' ({}): {}",
                    veto.status, veto.message
                ))
            );
            bail!("event '{name}' was vetoed");
        },
        DispatchOutcome::Completed {
            sync_invoked,
            async_invoked,
        } => {
            println!(
                "{}",
                Theme::success(&format!(
                    "Emitted '{name}' ({sync_invoked} sync, {async_invoked} async subscriber(s))"
                ))
            );
        },
    }

    if let Some(id) = receipt.queued_id {
        println!("{}", Theme::info(&format!("Queued as event {id}")));
    }

    Ok(())
}
