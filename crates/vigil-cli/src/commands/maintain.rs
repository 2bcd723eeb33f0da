use chrono::Utc;
use vigil_core::maintenance;

use super::{print_json, Context};

const LAST_RUN_KEY: &str = "maintenance.last_run";

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::open()?;
    let now = Utc::now();

    let report = maintenance::run(&ctx.service, now)?;
    ctx.db.kv_set(LAST_RUN_KEY, &now.to_rfc3339())?;
    print_json(&report)
}
