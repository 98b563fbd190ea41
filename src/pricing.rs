use std::collections::BTreeSet;
use std::str::FromStr;

use num_format::{Locale, ToFormattedString};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::engine::EngineError;
use crate::limits::MAX_BOOKING_DAYS;
use crate::model::{Booking, Car, overlap_day_set};

/// Price breakdown for one booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub price_per_day: Decimal,
    pub total_days: i64,
    /// `total_days` minus days already covered by other blocking bookings, at least 1.
    pub billable_days: i64,
    pub total: Decimal,
    pub display: String,
}

/// Lenient price parsing: everything except digits and `.` is dropped, and
/// whatever still fails to parse is zero.
pub fn parse_price(raw: &str) -> Decimal {
    let mut cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    if cleaned.is_empty() {
        return Decimal::ZERO;
    }
    if cleaned.starts_with('.') {
        cleaned.insert(0, '0');
    }
    if cleaned.ends_with('.') {
        cleaned.push('0');
    }
    Decimal::from_str(&cleaned).unwrap_or(Decimal::ZERO)
}

/// Days of `booking` left after removing every day shared with another
/// blocking booking on the same car. Never below 1.
pub fn billable_days<'a>(booking: &Booking, others: impl IntoIterator<Item = &'a Booking>) -> i64 {
    let covered: BTreeSet<_> = others
        .into_iter()
        .filter(|o| o.id != booking.id && o.car_id == booking.car_id && o.is_blocking())
        .flat_map(|o| overlap_day_set(&booking.dates, &o.dates))
        .collect();
    (booking.dates.inclusive_days() - covered.len() as i64).max(1)
}

fn charge_for(price_per_day: Decimal, days: i64) -> Result<Decimal, EngineError> {
    price_per_day
        .checked_mul(Decimal::from(days))
        .map(|total| total.round_dp(2))
        .ok_or(EngineError::LimitExceeded("price too large"))
}

/// Rejects a catalog price whose longest possible rental would not fit in a `Decimal`.
pub fn check_price(raw: &str) -> Result<Decimal, EngineError> {
    let price_per_day = parse_price(raw);
    charge_for(price_per_day, MAX_BOOKING_DAYS)?;
    Ok(price_per_day)
}

pub fn total_price<'a>(
    booking: &Booking,
    price_per_day: Decimal,
    others: impl IntoIterator<Item = &'a Booking>,
) -> Result<Decimal, EngineError> {
    charge_for(price_per_day, billable_days(booking, others))
}

pub fn quote<'a>(
    booking: &Booking,
    car: &Car,
    others: impl IntoIterator<Item = &'a Booking>,
) -> Result<Quote, EngineError> {
    let price_per_day = car.price_per_day();
    let billable = billable_days(booking, others);
    let total = charge_for(price_per_day, billable)?;
    Ok(Quote {
        price_per_day,
        total_days: booking.dates.inclusive_days(),
        billable_days: billable,
        total,
        display: format_peso(total),
    })
}

/// `₱10,000` for whole amounts, `₱2,200.50` otherwise.
pub fn format_peso(amount: Decimal) -> String {
    let sign = if amount.is_sign_negative() && !amount.is_zero() { "-" } else { "" };
    let amount = amount.abs();
    if amount.fract().is_zero() {
        let whole = amount.trunc().to_i128().unwrap_or_default();
        return format!("₱{sign}{}", whole.to_formatted_string(&Locale::en));
    }
    let rounded = amount.round_dp(2);
    let whole = rounded.trunc();
    let cents = ((rounded - whole) * Decimal::ONE_HUNDRED).to_u32().unwrap_or_default();
    format!(
        "₱{sign}{}.{cents:02}",
        whole.to_i128().unwrap_or_default().to_formatted_string(&Locale::en)
    )
}
