use chrono::NaiveDate;

use crate::limits::MAX_BOOKING_DAYS;
use crate::model::*;

use super::EngineError;

/// Both dates present, in order, and no longer than the booking limit.
pub(crate) fn require_dates(
    pickup: Option<NaiveDate>,
    return_date: Option<NaiveDate>,
) -> Result<DateRange, EngineError> {
    let (Some(start), Some(end)) = (pickup, return_date) else {
        return Err(EngineError::Validation("pickup and return dates are required".into()));
    };
    let range = DateRange::new(start, end);
    if !range.is_well_formed() {
        return Err(EngineError::Validation("return date must not be before pickup date".into()));
    }
    if range.inclusive_days() > MAX_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(range)
}

/// Every blocking booking on the car intersecting `range`, except `exclude`.
pub(crate) fn find_conflicts(
    cs: &CarState,
    range: &DateRange,
    exclude: Option<BookingId>,
) -> Vec<ConflictingBooking> {
    cs.overlapping(range, exclude)
        .map(|b| ConflictingBooking { id: b.id, dates: b.dates })
        .collect()
}

pub(crate) fn has_conflict(cs: &CarState, range: &DateRange, exclude: Option<BookingId>) -> bool {
    cs.overlapping(range, exclude).next().is_some()
}

/// Conflict gate used on submission, approval and date edits.
pub(crate) fn check_no_conflict(
    cs: &CarState,
    range: &DateRange,
    exclude: Option<BookingId>,
    gate: &'static str,
) -> Result<(), EngineError> {
    if !has_conflict(cs, range, exclude) {
        return Ok(());
    }
    let conflicts = find_conflicts(cs, range, exclude);
    metrics::counter!(crate::observability::CONFLICTS_TOTAL, "gate" => gate).increment(1);
    tracing::warn!(
        "{gate} blocked on car {}: {} conflicting booking(s)",
        cs.car.id,
        conflicts.len()
    );
    Err(EngineError::Conflict(conflicts))
}
