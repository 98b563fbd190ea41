use dashmap::DashMap;

use crate::model::*;

use super::SharedCarState;

/// Indexes over everything the journal has recreated. Cars own their
/// bookings and reviews; users and the lookup maps live at this level.
pub struct InMemoryStore {
    cars: DashMap<CarId, SharedCarState>,
    booking_to_car: DashMap<BookingId, CarId>,
    users: DashMap<UserId, User>,
    /// Lowercased email → user.
    emails: DashMap<String, UserId>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            cars: DashMap::new(),
            booking_to_car: DashMap::new(),
            users: DashMap::new(),
            emails: DashMap::new(),
        }
    }

    // ── Cars ─────────────────────────────────────────────────

    pub fn car_count(&self) -> usize {
        self.cars.len()
    }

    pub fn contains_car(&self, id: &CarId) -> bool {
        self.cars.contains_key(id)
    }

    pub fn get_car_state(&self, id: &CarId) -> Option<SharedCarState> {
        self.cars.get(id).map(|e| e.value().clone())
    }

    pub fn insert_car(&self, id: CarId, state: SharedCarState) {
        self.cars.insert(id, state);
    }

    /// Drop the car and everything booked on it. The caller holds its write lock.
    pub fn remove_car(&self, cs: &mut CarState) {
        for booking in cs.bookings.drain(..) {
            self.booking_to_car.remove(&booking.id);
        }
        cs.reviews.clear();
        self.cars.remove(&cs.car.id);
    }

    pub fn car_ids(&self) -> Vec<CarId> {
        self.cars.iter().map(|e| *e.key()).collect()
    }

    pub fn car_states(&self) -> Vec<SharedCarState> {
        self.cars.iter().map(|e| e.value().clone()).collect()
    }

    // ── Booking index ────────────────────────────────────────

    pub fn car_for_booking(&self, booking_id: &BookingId) -> Option<CarId> {
        self.booking_to_car.get(booking_id).map(|e| *e.value())
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_car.len()
    }

    // ── Users ────────────────────────────────────────────────

    pub fn user(&self, id: &UserId) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn user_by_email(&self, email: &str) -> Option<UserId> {
        self.emails.get(&email.to_lowercase()).map(|e| *e.value())
    }

    pub fn users(&self) -> Vec<User> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    pub fn user_name(&self, id: &UserId) -> Option<String> {
        self.users.get(id).map(|e| e.value().name.clone())
    }

    // ── Event application ────────────────────────────────────

    /// Apply a car-scoped event. No locking; the caller holds the car's write lock.
    pub fn apply_event(&self, cs: &mut CarState, event: &Event) {
        match event {
            Event::CarUpdated { car } => {
                cs.car = car.clone();
            }
            Event::BookingSubmitted { booking } => {
                self.booking_to_car.insert(booking.id, booking.car_id);
                cs.insert_booking(booking.clone());
            }
            Event::BookingEdited { id, dates, notes, .. } => {
                // Re-insert so the pickup ordering holds
                if let Some(mut booking) = cs.remove_booking(*id) {
                    booking.dates = *dates;
                    booking.notes = notes.clone();
                    cs.insert_booking(booking);
                }
            }
            Event::StatusChanged { id, status, .. } => {
                if let Some(booking) = cs.booking_mut(*id) {
                    booking.status = *status;
                }
            }
            Event::PaymentMethodSelected {
                id,
                method,
                payment_status,
                ..
            } => {
                if let Some(booking) = cs.booking_mut(*id) {
                    booking.payment_method = Some(*method);
                    booking.payment_status = *payment_status;
                }
            }
            Event::PaymentProcessed { id, receipt, .. } => {
                if let Some(booking) = cs.booking_mut(*id) {
                    booking.payment_method = Some(receipt.method);
                    booking.payment_status = PaymentStatus::Paid;
                    booking.receipt = Some(receipt.clone());
                }
            }
            Event::ReviewSubmitted { review } => {
                if let Some(booking) = cs.booking_mut(review.booking_id) {
                    booking.status = BookingStatus::Completed;
                }
                cs.reviews.push(review.clone());
            }
            Event::BookingDeleted { id, .. } => {
                cs.remove_booking(*id);
                cs.reviews.retain(|r| r.booking_id != *id);
                self.booking_to_car.remove(id);
            }
            Event::UserDeleted { id } => {
                let removed: Vec<BookingId> = cs
                    .bookings
                    .iter()
                    .filter(|b| b.user_id == *id)
                    .map(|b| b.id)
                    .collect();
                cs.bookings.retain(|b| b.user_id != *id);
                cs.reviews
                    .retain(|r| r.user_id != *id && !removed.contains(&r.booking_id));
                for booking_id in &removed {
                    self.booking_to_car.remove(booking_id);
                }
            }
            // Handled at the map level
            Event::CarAdded { .. }
            | Event::CarDeleted { .. }
            | Event::UserRegistered { .. }
            | Event::UserUpdated { .. } => {}
        }
    }

    /// Apply a user event to the account tables. `UserDeleted` also needs
    /// `apply_event` on every car holding the user's bookings.
    pub fn apply_user_event(&self, event: &Event) {
        match event {
            Event::UserRegistered { user } => {
                self.emails.insert(user.email.to_lowercase(), user.id);
                self.users.insert(user.id, user.clone());
            }
            Event::UserUpdated {
                id,
                name,
                email,
                is_admin,
            } => {
                let old_email = match self.users.get_mut(id) {
                    Some(mut user) => {
                        let old = std::mem::replace(&mut user.email, email.clone());
                        user.name = name.clone();
                        user.is_admin = *is_admin;
                        old
                    }
                    None => return,
                };
                self.emails.remove(&old_email.to_lowercase());
                self.emails.insert(email.to_lowercase(), *id);
            }
            Event::UserDeleted { id } => {
                if let Some((_, user)) = self.users.remove(id) {
                    self.emails.remove(&user.email.to_lowercase());
                }
            }
            _ => {}
        }
    }
}
