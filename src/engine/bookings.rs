use chrono::Utc;
use tracing::info;
use ulid::Ulid;
use validator::Validate;

use crate::auth::Actor;
use crate::lifecycle::{check_owner_change, check_payment, check_review, check_transition};
use crate::limits::MAX_BOOKINGS_PER_CAR;
use crate::model::*;
use crate::observability;
use crate::payment::PaymentRequest;
use crate::pricing;
use crate::request::{BookingEdit, NewBooking, NewReview};

use super::conflict::{check_no_conflict, require_dates};
use super::{Engine, EngineError, Entity};

impl Engine {
    /// Customer submission. Starts Pending, unpaid, with no payment method.
    pub async fn submit_booking(&self, actor: &Actor, form: NewBooking) -> Result<BookingId, EngineError> {
        form.validate()?;
        let dates = require_dates(form.pickup, form.return_date)?;
        let _commit = self.commit_gate.read().await;

        let mut guard = self.car_write(form.car_id).await?;
        // Under the car lock: a concurrent delete_user either already removed
        // the account or will cascade over this booking.
        if self.store.user(&actor.user_id).is_none() {
            return Err(EngineError::NotFound(Entity::User, actor.user_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_CAR {
            return Err(EngineError::LimitExceeded("too many bookings on car"));
        }
        check_no_conflict(&guard, &dates, None, "submission")?;

        let booking = Booking {
            id: Ulid::new(),
            user_id: actor.user_id,
            car_id: form.car_id,
            contact: ContactDetails {
                name: form.name,
                email: form.email,
                phone: form.contact,
            },
            dates,
            status: BookingStatus::Pending,
            payment_method: None,
            payment_status: PaymentStatus::Unpaid,
            submitted_at: Utc::now(),
            documents: form.documents,
            notes: form.notes.filter(|n| !n.trim().is_empty()),
            receipt: None,
        };
        let id = booking.id;
        self.persist_and_apply(&mut guard, &Event::BookingSubmitted { booking }).await?;
        metrics::counter!(observability::BOOKINGS_SUBMITTED_TOTAL).increment(1);
        info!("booking {id} submitted for car {} ({dates})", form.car_id);
        Ok(id)
    }

    /// Admin status change. Approval re-checks availability under the car lock,
    /// so two overlapping approvals cannot both commit.
    pub async fn set_status(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        to: BookingStatus,
    ) -> Result<(), EngineError> {
        actor.require_admin()?;
        let _commit = self.commit_gate.read().await;

        let mut guard = self.resolve_booking_write(booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        let (from, dates, car_id) = (booking.status, booking.dates, booking.car_id);

        check_transition(from, to, booking.has_payment_method())?;
        if to == BookingStatus::Approved {
            check_no_conflict(&guard, &dates, Some(booking_id), "approval")?;
        }

        let event = Event::StatusChanged { id: booking_id, car_id, status: to };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::STATUS_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        info!("booking {booking_id}: {from} -> {to}");
        Ok(())
    }

    /// Owner picks how an approved booking will be paid. Cash stays unpaid until pickup.
    pub async fn select_payment_method(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        method: PaymentMethod,
    ) -> Result<(), EngineError> {
        let _commit = self.commit_gate.read().await;

        let mut guard = self.resolve_booking_write(booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        actor.require_owner(booking.user_id)?;
        check_payment(booking.status, booking.payment_status)?;

        let event = Event::PaymentMethodSelected {
            id: booking_id,
            car_id: booking.car_id,
            method,
            payment_status: PaymentStatus::Unpaid,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("booking {booking_id}: payment method {method}");
        Ok(())
    }

    /// Charge the selected online method for the quoted total and mark the booking paid.
    pub async fn process_payment(&self, actor: &Actor, booking_id: BookingId) -> Result<PaymentReceipt, EngineError> {
        let _commit = self.commit_gate.read().await;

        let mut guard = self.resolve_booking_write(booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        actor.require_owner(booking.user_id)?;
        check_payment(booking.status, booking.payment_status)?;
        let method = booking
            .payment_method
            .ok_or_else(|| EngineError::Validation("select a payment method first".into()))?;
        if !method.is_online() {
            return Err(EngineError::Validation("cash payments are settled at pickup".into()));
        }

        let quote = pricing::quote(booking, &guard.car, guard.bookings.iter())?;
        let request = PaymentRequest {
            booking_id,
            method,
            amount: quote.total,
        };
        let car_id = booking.car_id;
        let confirmation = self.payments.charge(&request).await.map_err(|e| {
            tracing::warn!("payment for booking {booking_id} failed: {e}");
            EngineError::PaymentDeclined(e.to_string())
        })?;

        let receipt = PaymentReceipt {
            method,
            amount: quote.total,
            reference: confirmation.reference,
            paid_at: Utc::now(),
        };
        let event = Event::PaymentProcessed {
            id: booking_id,
            car_id,
            receipt: receipt.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::PAYMENTS_TOTAL, "method" => method.as_str()).increment(1);
        info!("booking {booking_id} paid {} via {method}", quote.display);
        Ok(receipt)
    }

    /// Review a returned booking. The review and the move to Completed are one journal record.
    pub async fn submit_review(
        &self,
        actor: &Actor,
        booking_id: BookingId,
        form: NewReview,
    ) -> Result<ReviewId, EngineError> {
        form.validate()?;
        let _commit = self.commit_gate.read().await;

        let mut guard = self.resolve_booking_write(booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        actor.require_owner(booking.user_id)?;
        check_review(booking.status, guard.review_for_booking(booking_id).is_some())?;

        let review = Review {
            id: Ulid::new(),
            user_id: actor.user_id,
            car_id: booking.car_id,
            booking_id,
            rating: form.rating,
            comment: form.comment.filter(|c| !c.trim().is_empty()),
            created_at: Utc::now(),
        };
        let id = review.id;
        self.persist_and_apply(&mut guard, &Event::ReviewSubmitted { review }).await?;
        metrics::counter!(observability::REVIEWS_TOTAL).increment(1);
        metrics::counter!(observability::STATUS_TRANSITIONS_TOTAL, "to" => BookingStatus::Completed.as_str())
            .increment(1);
        info!("booking {booking_id} reviewed and completed");
        Ok(id)
    }

    /// Owner changes dates or notes of a Pending or Approved booking.
    pub async fn edit_booking(&self, actor: &Actor, booking_id: BookingId, edit: BookingEdit) -> Result<(), EngineError> {
        edit.validate()?;
        let dates = require_dates(edit.pickup, edit.return_date)?;
        let _commit = self.commit_gate.read().await;

        let mut guard = self.resolve_booking_write(booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        actor.require_owner(booking.user_id)?;
        check_owner_change(booking.status)?;
        let car_id = booking.car_id;
        check_no_conflict(&guard, &dates, Some(booking_id), "edit")?;

        let event = Event::BookingEdited {
            id: booking_id,
            car_id,
            dates,
            notes: edit.notes.filter(|n| !n.trim().is_empty()),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("booking {booking_id} moved to {dates}");
        Ok(())
    }

    /// Owners may withdraw Pending or Approved bookings; admins may delete any.
    /// The booking's review goes with it.
    pub async fn delete_booking(&self, actor: &Actor, booking_id: BookingId) -> Result<(), EngineError> {
        let _commit = self.commit_gate.read().await;

        let mut guard = self.resolve_booking_write(booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        actor.require_owner_or_admin(booking.user_id)?;
        if !actor.is_admin {
            check_owner_change(booking.status)?;
        }

        let event = Event::BookingDeleted {
            id: booking_id,
            car_id: booking.car_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("booking {booking_id} deleted");
        Ok(())
    }
}
