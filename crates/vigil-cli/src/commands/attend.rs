use chrono::{Duration, NaiveDate, Utc};
use clap::Args;

use super::{print_json, Context};

#[derive(Args)]
pub struct AttendArgs {
    /// Slot ID
    slot_id: String,
    /// Local date of the occurrence (defaults to today)
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Record the occurrence as missed
    #[arg(long)]
    missed: bool,
    /// Minutes spent in prayer
    #[arg(long, default_value = "0")]
    duration_min: u32,
}

pub fn run(args: AttendArgs) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::open()?;
    let now = Utc::now();
    let date = args.date.unwrap_or_else(|| ctx.service.today(now));

    let (record, update) = ctx.service.record_attendance(
        &args.slot_id,
        date,
        !args.missed,
        Duration::minutes(args.duration_min as i64),
        now,
    )?;
    print_json(&serde_json::json!({
        "record": record,
        "slot": update.slot,
        "changed": update.changed(),
    }))
}
