use chrono::{DateTime, Utc};
use clap::Args;
use vigil_core::time::to_local;
use vigil_core::{countdown_for, Config};

use super::print_json;

#[derive(Args)]
pub struct CountdownArgs {
    /// Daily window, e.g. "22:00-22:30"
    window: String,
    /// Evaluate at this RFC 3339 instant instead of now
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

/// Prints `{"window": ..., "countdown": null}` for a window that does not parse.
pub fn run(args: CountdownArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_or_default();
    let now = to_local(args.at.unwrap_or_else(Utc::now), config.utc_offset());

    let countdown = countdown_for(now, &args.window);
    if countdown.is_none() {
        tracing::debug!(window = %args.window, "no active countdown");
    }
    print_json(&serde_json::json!({
        "window": args.window,
        "countdown": countdown,
    }))
}
