use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use tokio::sync::OwnedRwLockReadGuard;

use crate::auth::Actor;
use crate::limits::DASHBOARD_RECENT;
use crate::model::*;
use crate::pricing::{self, Quote};

use super::conflict;
use super::{Engine, EngineError, Entity};

fn newest_first(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(b.id.cmp(&a.id)));
}

impl Engine {
    async fn car_read(&self, car_id: CarId) -> Result<OwnedRwLockReadGuard<CarState>, EngineError> {
        let cs = self
            .store
            .get_car_state(&car_id)
            .ok_or(EngineError::NotFound(Entity::Car, car_id))?;
        Ok(cs.read_owned().await)
    }

    async fn booking_read(&self, booking_id: BookingId) -> Result<OwnedRwLockReadGuard<CarState>, EngineError> {
        let car_id = self
            .store
            .car_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        let guard = self.car_read(car_id).await?;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(Entity::Booking, booking_id));
        }
        Ok(guard)
    }

    /// Every booking matching `keep`, across all cars.
    async fn collect_bookings(&self, keep: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let mut out = Vec::new();
        for cs in self.store.car_states() {
            let guard = cs.read().await;
            out.extend(guard.bookings.iter().filter(|b| keep(b)).cloned());
        }
        out
    }

    // ── Catalog ──────────────────────────────────────────────

    pub async fn get_car(&self, car_id: CarId) -> Option<Car> {
        let cs = self.store.get_car_state(&car_id)?;
        let guard = cs.read().await;
        Some(guard.car.clone())
    }

    /// The catalog, sorted by name.
    pub async fn list_cars(&self) -> Vec<Car> {
        let mut cars = Vec::with_capacity(self.store.car_count());
        for cs in self.store.car_states() {
            cars.push(cs.read().await.car.clone());
        }
        cars.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        cars
    }

    // ── Availability ─────────────────────────────────────────

    pub async fn has_conflict(
        &self,
        car_id: CarId,
        start: NaiveDate,
        end: NaiveDate,
        exclude: Option<BookingId>,
    ) -> Result<bool, EngineError> {
        let guard = self.car_read(car_id).await?;
        Ok(conflict::has_conflict(&guard, &DateRange::new(start, end), exclude))
    }

    pub async fn find_conflicts(
        &self,
        car_id: CarId,
        start: NaiveDate,
        end: NaiveDate,
        exclude: Option<BookingId>,
    ) -> Result<Vec<ConflictingBooking>, EngineError> {
        let guard = self.car_read(car_id).await?;
        Ok(conflict::find_conflicts(&guard, &DateRange::new(start, end), exclude))
    }

    pub async fn find_blocking(&self, car_id: CarId, exclude: Option<BookingId>) -> Result<Vec<Booking>, EngineError> {
        let guard = self.car_read(car_id).await?;
        Ok(guard.find_blocking(exclude).cloned().collect())
    }

    /// Date ranges held by blocking bookings, in pickup order.
    pub async fn booked_ranges(&self, car_id: CarId) -> Result<Vec<DateRange>, EngineError> {
        let guard = self.car_read(car_id).await?;
        Ok(guard.find_blocking(None).map(|b| b.dates).collect())
    }

    /// Every individual day a blocking booking holds, ascending and deduplicated.
    pub async fn booked_dates(&self, car_id: CarId) -> Result<Vec<NaiveDate>, EngineError> {
        let guard = self.car_read(car_id).await?;
        let days: BTreeSet<NaiveDate> = guard.find_blocking(None).flat_map(|b| b.dates.days()).collect();
        Ok(days.into_iter().collect())
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn booking_details(&self, actor: &Actor, booking_id: BookingId) -> Result<Booking, EngineError> {
        let guard = self.booking_read(booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        actor.require_owner_or_admin(booking.user_id)?;
        Ok(booking.clone())
    }

    /// Price breakdown, accounting for days shared with other blocking bookings on the car.
    pub async fn quote(&self, actor: &Actor, booking_id: BookingId) -> Result<Quote, EngineError> {
        let guard = self.booking_read(booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking, booking_id))?;
        actor.require_owner_or_admin(booking.user_id)?;
        pricing::quote(booking, &guard.car, guard.bookings.iter())
    }

    /// A user's bookings, newest first.
    pub async fn bookings_for_user(&self, actor: &Actor, user_id: UserId) -> Result<Vec<Booking>, EngineError> {
        actor.require_owner_or_admin(user_id)?;
        let mut bookings = self.collect_bookings(|b| b.user_id == user_id).await;
        newest_first(&mut bookings);
        Ok(bookings)
    }

    /// The caller's own bookings bucketed by status; every status has an entry.
    pub async fn bookings_grouped(&self, actor: &Actor) -> BTreeMap<BookingStatus, Vec<Booking>> {
        let mut grouped: BTreeMap<BookingStatus, Vec<Booking>> =
            BookingStatus::ALL.into_iter().map(|s| (s, Vec::new())).collect();
        let mut bookings = self.collect_bookings(|b| b.user_id == actor.user_id).await;
        newest_first(&mut bookings);
        for booking in bookings {
            grouped.entry(booking.status).or_default().push(booking);
        }
        grouped
    }

    /// Admin listing, optionally narrowed to one status, newest first.
    pub async fn bookings_by_status(
        &self,
        actor: &Actor,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, EngineError> {
        actor.require_admin()?;
        let mut bookings = self
            .collect_bookings(|b| status.is_none_or(|s| b.status == s))
            .await;
        newest_first(&mut bookings);
        Ok(bookings)
    }

    // ── Reviews ──────────────────────────────────────────────

    pub async fn review_for_booking(&self, booking_id: BookingId) -> Option<Review> {
        let guard = self.booking_read(booking_id).await.ok()?;
        guard.review_for_booking(booking_id).cloned()
    }

    /// Reviews for a car, newest first, with the author's name or "Anonymous".
    pub async fn car_reviews(&self, car_id: CarId) -> Result<Vec<ReviewView>, EngineError> {
        let guard = self.car_read(car_id).await?;
        let mut reviews: Vec<&Review> = guard.reviews.iter().collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(reviews
            .into_iter()
            .map(|r| ReviewView {
                author: self
                    .store
                    .user_name(&r.user_id)
                    .unwrap_or_else(|| "Anonymous".to_string()),
                rating: r.rating,
                comment: r.comment.clone(),
                created_on: r.created_at.date_naive(),
            })
            .collect())
    }

    pub async fn car_rating(&self, car_id: CarId) -> Result<CarRating, EngineError> {
        let guard = self.car_read(car_id).await?;
        let count = guard.reviews.len();
        let average = (count > 0).then(|| {
            let sum: u32 = guard.reviews.iter().map(|r| u32::from(r.rating)).sum();
            (f64::from(sum) / count as f64 * 10.0).round_ties_even() / 10.0
        });
        Ok(CarRating { average, count })
    }

    // ── Accounts ─────────────────────────────────────────────

    /// Customers and admins, each sorted by name.
    pub fn list_users(&self, actor: &Actor) -> Result<UserDirectory, EngineError> {
        actor.require_admin()?;
        let (mut admins, mut customers): (Vec<User>, Vec<User>) =
            self.store.users().into_iter().partition(|u| u.is_admin);
        admins.sort_by(|a, b| a.name.cmp(&b.name));
        customers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(UserDirectory { customers, admins })
    }

    pub fn get_user(&self, actor: &Actor, user_id: UserId) -> Result<User, EngineError> {
        actor.require_owner_or_admin(user_id)?;
        self.store
            .user(&user_id)
            .ok_or(EngineError::NotFound(Entity::User, user_id))
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<User> {
        let id = self.store.user_by_email(email)?;
        self.store.user(&id)
    }

    // ── Admin dashboard ──────────────────────────────────────

    pub async fn dashboard(&self, actor: &Actor) -> Result<DashboardSummary, EngineError> {
        actor.require_admin()?;
        let mut all = self.collect_bookings(|_| true).await;
        newest_first(&mut all);
        let recent = |status: BookingStatus| -> Vec<Booking> {
            all.iter()
                .filter(|b| b.status == status)
                .take(DASHBOARD_RECENT)
                .cloned()
                .collect()
        };
        Ok(DashboardSummary {
            total_cars: self.store.car_count(),
            total_bookings: all.len(),
            total_customers: self.store.users().iter().filter(|u| !u.is_admin).count(),
            recent_pending: recent(BookingStatus::Pending),
            recent_approved: recent(BookingStatus::Approved),
            recent_completed: recent(BookingStatus::Completed),
            recent_rejected: recent(BookingStatus::Rejected),
        })
    }
}
