//! Periodic maintenance job.
//!
//! One pass over every slot:
//! 1. persist lapsed skips as Active
//! 2. close out ended occurrences after the latest record, as missed
//! 3. release Missed slots at or over the threshold
//!
//! Each step re-reads the slot and saves with a version check, so a run can be
//! interrupted and repeated without double-counting. A slot that fails is
//! logged and reported, and the run moves on.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::service::SlotService;
use crate::slot::SlotStatus;
use crate::time::to_local;

/// How far back the close-out looks for unrecorded occurrences.
pub const CLOSE_OUT_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotFailure {
    pub slot_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub slots_checked: u32,
    pub skips_expired: u32,
    pub occurrences_closed: u32,
    pub released: u32,
    pub failures: Vec<SlotFailure>,
}

/// Run one maintenance pass at `now`.
///
/// # Errors
/// Only fails if the slot list itself cannot be read; per-slot errors end up
/// in [`MaintenanceReport::failures`].
pub fn run(service: &SlotService, now: DateTime<Utc>) -> Result<MaintenanceReport> {
    let mut report = MaintenanceReport::default();

    for slot in service.list_slots()? {
        report.slots_checked += 1;
        if let Err(e) = maintain_slot(service, &slot.id, now, &mut report) {
            tracing::warn!(slot_id = %slot.id, error = %e, "maintenance skipped slot");
            report.failures.push(SlotFailure {
                slot_id: slot.id,
                error: e.to_string(),
            });
        }
    }

    tracing::info!(
        slots = report.slots_checked,
        skips_expired = report.skips_expired,
        closed = report.occurrences_closed,
        released = report.released,
        failures = report.failures.len(),
        "maintenance run finished"
    );
    Ok(report)
}

fn maintain_slot(
    service: &SlotService,
    slot_id: &str,
    now: DateTime<Utc>,
    report: &mut MaintenanceReport,
) -> Result<()> {
    if service.expire_skip(slot_id, now)?.transition.changed {
        report.skips_expired += 1;
    }

    if close_out(service, slot_id, now, report)? {
        return Ok(());
    }

    let update = service.release_if_due(slot_id, now)?;
    if update.transition.changed {
        report.released += 1;
    }
    Ok(())
}

/// Record already ended occurrences after the slot's latest record as missed.
/// Returns true if the slot was released along the way.
///
/// Dates before the latest record are never charged, so a later attended day
/// cannot be followed by misses for the days before it.
fn close_out(
    service: &SlotService,
    slot_id: &str,
    now: DateTime<Utc>,
    report: &mut MaintenanceReport,
) -> Result<bool> {
    let slot = service.store().load_slot(slot_id)?;
    let (Some(_), Some(active_since)) = (slot.owner.as_ref(), slot.active_since) else {
        return Ok(false);
    };
    if !matches!(slot.status, SlotStatus::Active | SlotStatus::Missed) {
        return Ok(false);
    }

    let offset = service.offset();
    let local_now = to_local(now, offset);
    let counted_from = to_local(active_since, offset);
    let today = service.today(now);
    let mut first = counted_from
        .date()
        .max(today - Duration::days(CLOSE_OUT_DAYS));
    if let Some(latest) = service.latest_recorded_date(slot_id)? {
        match latest.succ_opt() {
            Some(next) => first = first.max(next),
            None => return Ok(false),
        }
    }

    for date in first.iter_days().take_while(|d| *d <= today) {
        if slot.window.occurrence_start(date) < counted_from
            || slot.window.occurrence_end(date) > local_now
        {
            continue;
        }
        match service.record_attendance(slot_id, date, false, Duration::zero(), now) {
            Ok((_, update)) => {
                report.occurrences_closed += 1;
                if update.transition.changed && update.transition.to == SlotStatus::Released {
                    report.released += 1;
                    return Ok(true);
                }
            }
            // Recorded concurrently by the owner.
            Err(CoreError::DuplicateRecord { .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(false)
}
