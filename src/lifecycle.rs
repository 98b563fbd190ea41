//! Booking status transitions and the payment sub-state rules.
//!
//! The engine consults these before journaling anything, while holding the
//! car's write lock.

use std::fmt;

use crate::model::{BookingStatus, PaymentStatus};

/// The rule a rejected transition broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRule {
    /// Moving back to Pending once a payment method is on record.
    PaymentMethodSelected,
    /// Leaving Rejected or Completed.
    Terminal(BookingStatus),
    /// Returned → Completed only happens through a review.
    ReviewRequired,
    NotAllowed {
        from: BookingStatus,
        to: BookingStatus,
    },
    PaymentRequiresApproved(BookingStatus),
    PaymentSettled,
    ReviewRequiresReturned(BookingStatus),
    AlreadyReviewed,
    /// Owner edits and deletions are limited to Pending and Approved.
    Locked(BookingStatus),
}

impl fmt::Display for TransitionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionRule::PaymentMethodSelected => {
                f.write_str("cannot change status back to Pending after payment method has been selected")
            }
            TransitionRule::Terminal(status) => {
                write!(f, "booking is {status} and can no longer change status")
            }
            TransitionRule::ReviewRequired => {
                f.write_str("booking is completed automatically when the customer submits a review")
            }
            TransitionRule::NotAllowed { from, to } => {
                write!(f, "cannot change status from {from} to {to}")
            }
            TransitionRule::PaymentRequiresApproved(status) => {
                write!(f, "payment is only available for approved bookings (booking is {status})")
            }
            TransitionRule::PaymentSettled => f.write_str("booking has already been paid"),
            TransitionRule::ReviewRequiresReturned(status) => {
                write!(f, "you can only review returned bookings (booking is {status})")
            }
            TransitionRule::AlreadyReviewed => f.write_str("you have already reviewed this booking"),
            TransitionRule::Locked(status) => {
                write!(f, "{status} bookings can no longer be modified")
            }
        }
    }
}

/// Admin status change `from → to`.
///
/// Terminal states reject everything. Returning to Pending with a payment
/// method recorded is reported before the table lookup, so that reason wins
/// over `NotAllowed`.
pub fn check_transition(
    from: BookingStatus,
    to: BookingStatus,
    has_payment_method: bool,
) -> Result<(), TransitionRule> {
    use BookingStatus::*;

    if from.is_terminal() {
        return Err(TransitionRule::Terminal(from));
    }
    if to == Pending && has_payment_method {
        return Err(TransitionRule::PaymentMethodSelected);
    }
    match (from, to) {
        (Pending, Approved) | (Pending, Rejected) | (Approved, Returned) => Ok(()),
        (Returned, Completed) => Err(TransitionRule::ReviewRequired),
        (from, to) => Err(TransitionRule::NotAllowed { from, to }),
    }
}

pub fn check_review(status: BookingStatus, already_reviewed: bool) -> Result<(), TransitionRule> {
    if already_reviewed {
        return Err(TransitionRule::AlreadyReviewed);
    }
    if status != BookingStatus::Returned {
        return Err(TransitionRule::ReviewRequiresReturned(status));
    }
    Ok(())
}

/// Selecting or processing a payment.
pub fn check_payment(status: BookingStatus, payment: PaymentStatus) -> Result<(), TransitionRule> {
    if status != BookingStatus::Approved {
        return Err(TransitionRule::PaymentRequiresApproved(status));
    }
    if payment == PaymentStatus::Paid {
        return Err(TransitionRule::PaymentSettled);
    }
    Ok(())
}

/// Owner-initiated edit or deletion.
pub fn check_owner_change(status: BookingStatus) -> Result<(), TransitionRule> {
    match status {
        BookingStatus::Pending | BookingStatus::Approved => Ok(()),
        other => Err(TransitionRule::Locked(other)),
    }
}
