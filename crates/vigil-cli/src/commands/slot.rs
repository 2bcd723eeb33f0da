use chrono::Utc;
use clap::Subcommand;
use vigil_core::{SlotStatus, TimeWindow};

use super::{print_json, Context};

#[derive(Subcommand)]
pub enum SlotAction {
    /// Assign a window to an intercessor
    Assign {
        /// Intercessor id
        owner: String,
        /// Daily window, e.g. "22:00-22:30"
        window: String,
        /// Reassign this unassigned or released slot instead of picking one
        #[arg(long)]
        slot: Option<String>,
    },
    /// Pause a slot for the skip grace period
    Skip {
        /// Slot ID
        slot_id: String,
    },
    /// End a skip early
    Reactivate {
        /// Slot ID
        slot_id: String,
    },
    /// Print a slot with countdown, streak and coverage as JSON
    Show {
        /// Slot ID
        slot_id: String,
    },
    /// List slots as JSON
    List {
        /// Only slots held by this intercessor
        #[arg(long)]
        owner: Option<String>,
        /// Only slots in this status (e.g. "active", "released")
        #[arg(long)]
        status: Option<String>,
    },
}

pub fn run(action: SlotAction) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context::open()?;
    let now = Utc::now();

    match action {
        SlotAction::Assign {
            owner,
            window,
            slot,
        } => {
            let window = TimeWindow::parse(&window)?;
            let update = match slot {
                Some(slot_id) => ctx.service.assign(&slot_id, &owner, window, now)?,
                None => ctx.service.assign_new(&owner, window, now)?,
            };
            print_json(&update)?;
        }
        SlotAction::Skip { slot_id } => {
            print_json(&ctx.service.request_skip(&slot_id, now)?)?;
        }
        SlotAction::Reactivate { slot_id } => {
            print_json(&ctx.service.reactivate(&slot_id, now)?)?;
        }
        SlotAction::Show { slot_id } => {
            print_json(&ctx.service.projection(&slot_id, now)?)?;
        }
        SlotAction::List { owner, status } => {
            let status = match status {
                Some(s) => Some(
                    SlotStatus::parse(&s).ok_or_else(|| format!("unknown status: {s}"))?,
                ),
                None => None,
            };
            let slots: Vec<_> = ctx
                .service
                .list_slots()?
                .into_iter()
                .filter(|s| owner.is_none() || s.owner == owner)
                .filter(|s| status.map_or(true, |st| s.effective_status(now) == st))
                .collect();
            print_json(&slots)?;
        }
    }
    Ok(())
}
