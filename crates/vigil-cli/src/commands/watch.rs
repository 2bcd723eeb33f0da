use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Args;
use vigil_core::{
    Database, FallbackSink, FallbackTransition, NotificationEvent, Notifier, Slot, SlotStore,
    TickEvaluator,
};

use super::Context;

/// Ticks between slot reloads from the database.
const REFRESH_TICKS: u64 = 30;

#[derive(Args)]
pub struct WatchArgs {
    /// Stop after this many ticks
    #[arg(long)]
    ticks: Option<u64>,
}

/// Writes notifications and fallback changes to stdout, one JSON object per line.
struct StdoutSink;

impl Notifier for StdoutSink {
    fn notify(&self, event: &NotificationEvent) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string(event)?);
        Ok(())
    }
}

impl FallbackSink for StdoutSink {
    fn fallback_changed(
        &self,
        transition: &FallbackTransition,
    ) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string(transition)?);
        Ok(())
    }
}

async fn load_slots(db: &Arc<Database>) -> Result<Vec<Slot>, Box<dyn std::error::Error>> {
    let db = Arc::clone(db);
    let slots = tokio::task::spawn_blocking(move || db.list_slots()).await??;
    Ok(slots)
}

pub fn run(args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::open()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(watch(ctx, args.ticks))
}

async fn watch(ctx: Context, max_ticks: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let mut evaluator = TickEvaluator::from_config(&ctx.config);
    let mut interval = tokio::time::interval(Duration::from_millis(ctx.config.watch.tick_ms));
    let mut slots = load_slots(&ctx.db).await?;
    let mut ticks: u64 = 0;

    tracing::info!(slots = slots.len(), tick_ms = ctx.config.watch.tick_ms, "watch started");
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(ticks, "watch interrupted");
                return Ok(());
            }
        }

        if ticks > 0 && ticks % REFRESH_TICKS == 0 {
            match load_slots(&ctx.db).await {
                Ok(fresh) => slots = fresh,
                Err(e) => tracing::warn!(error = %e, "slot refresh failed, keeping previous"),
            }
        }

        evaluator.tick(&slots, Utc::now(), &StdoutSink, &StdoutSink);
        ticks += 1;

        if max_ticks.is_some_and(|max| ticks >= max) {
            tracing::info!(ticks, "watch finished");
            return Ok(());
        }
    }
}
