use chrono::{Datelike, Utc};
use clap::Subcommand;
use vigil_core::TimeWindow;

use super::{print_json, Context};

#[derive(Subcommand)]
pub enum StatsAction {
    /// Sessions this month, day streak and best streak for an intercessor
    Progress {
        /// Intercessor id
        user_id: String,
        /// Count sessions for this month instead of the current one
        #[arg(long)]
        month: Option<u32>,
        /// Year for --month (defaults to the current year)
        #[arg(long)]
        year: Option<i32>,
    },
    /// Coverage of a window over the lookback period
    Coverage {
        /// Daily window, e.g. "22:00-22:30"
        window: String,
        /// Lookback in days (defaults to coverage.lookback_days)
        #[arg(long)]
        days: Option<u32>,
    },
}

pub fn run(action: StatsAction) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::open()?;
    let today = ctx.service.today(Utc::now());

    match action {
        StatsAction::Progress {
            user_id,
            month,
            year,
        } => {
            let mut progress = ctx.service.user_progress(&user_id, today)?;
            if let Some(month) = month {
                let year = year.unwrap_or(today.year());
                progress.sessions_this_month =
                    ctx.service.compute_monthly_sessions(&user_id, month, year)?;
            }
            print_json(&progress)?;
        }
        StatsAction::Coverage { window, days } => {
            let window = TimeWindow::parse(&window)?;
            let days = days.unwrap_or(ctx.config.coverage.lookback_days);
            print_json(&ctx.service.compute_coverage(window, days, today)?)?;
        }
    }
    Ok(())
}
