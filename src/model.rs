use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type CarId = Ulid;
pub type BookingId = Ulid;
pub type ReviewId = Ulid;
pub type UserId = Ulid;

/// Closed interval of calendar days `[start, end]`: pickup and return day are both rented.
///
/// `end >= start` is checked where bookings are submitted or edited, not here, so
/// journals written before that check replay unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start <= self.end
    }

    pub fn inclusive_days(&self) -> i64 {
        inclusive_days(self.start, self.end)
    }

    /// Standard closed-interval test: touching on a single day counts.
    pub fn intersects(&self, other: &DateRange) -> bool {
        self.end >= other.start && self.start <= other.end
    }

    /// Every day of the range in order. Empty for a malformed range.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start.format("%b %d"), self.end.format("%b %d"))
    }
}

/// `(end - start) + 1` days, never less than one.
pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end.signed_duration_since(start).num_days() + 1).max(1)
}

/// Calendar days present in both ranges.
pub fn overlap_day_set(a: &DateRange, b: &DateRange) -> BTreeSet<NaiveDate> {
    if !a.intersects(b) {
        return BTreeSet::new();
    }
    DateRange::new(a.start.max(b.start), a.end.min(b.end))
        .days()
        .collect()
}

/// Returned by the `FromStr` impls of the closed enums below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Returned,
    Completed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Approved,
        BookingStatus::Rejected,
        BookingStatus::Returned,
        BookingStatus::Completed,
    ];

    /// Approved, Returned and Completed bookings hold their dates against the car.
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            BookingStatus::Approved | BookingStatus::Returned | BookingStatus::Completed
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Rejected | BookingStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Approved => "Approved",
            BookingStatus::Rejected => "Rejected",
            BookingStatus::Returned => "Returned",
            BookingStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                kind: "booking status",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    GCash,
    Card,
}

impl PaymentMethod {
    /// GCash and Card go through the payment gateway; cash is settled at pickup.
    pub fn is_online(self) -> bool {
        matches!(self, PaymentMethod::GCash | PaymentMethod::Card)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::GCash => "GCash",
            PaymentMethod::Card => "Card",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [PaymentMethod::Cash, PaymentMethod::GCash, PaymentMethod::Card]
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                kind: "payment method",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transmission {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fuel {
    Gas,
    Diesel,
    Electric,
}

/// Shown in the catalog only. Conflict detection never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CarAvailability {
    #[default]
    Available,
    Rented,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub id: CarId,
    pub name: String,
    /// Daily rate as entered by the admin, e.g. "2,000" or "₱2,200.50".
    pub price: String,
    pub specs: String,
    pub image: Option<String>,
    pub transmission: Transmission,
    pub fuel: Fuel,
    pub capacity: String,
    pub engine: Option<String>,
    pub mileage: Option<String>,
    pub color: Option<String>,
    pub availability: CarAvailability,
}

impl Car {
    pub fn price_per_day(&self) -> Decimal {
        crate::pricing::parse_price(&self.price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Stored references to the identity documents uploaded with a booking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Documents {
    pub id_document: Option<String>,
    pub license: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub reference: String,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub car_id: CarId,
    pub contact: ContactDetails,
    pub dates: DateRange,
    pub status: BookingStatus,
    pub payment_method: Option<PaymentMethod>,
    pub payment_status: PaymentStatus,
    pub submitted_at: DateTime<Utc>,
    pub documents: Documents,
    pub notes: Option<String>,
    pub receipt: Option<PaymentReceipt>,
}

impl Booking {
    pub fn is_blocking(&self) -> bool {
        self.status.is_blocking()
    }

    pub fn has_payment_method(&self) -> bool {
        self.payment_method.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub user_id: UserId,
    pub car_id: CarId,
    pub booking_id: BookingId,
    /// 1..=5
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// A car together with everything booked against it. One lock guards the whole set.
#[derive(Debug, Clone)]
pub struct CarState {
    pub car: Car,
    /// Sorted by `dates.start`.
    pub bookings: Vec<Booking>,
    pub reviews: Vec<Review>,
}

impl CarState {
    pub fn new(car: Car) -> Self {
        Self {
            car,
            bookings: Vec::new(),
            reviews: Vec::new(),
        }
    }

    /// Insert maintaining sort order by pickup date.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.dates.start <= booking.dates.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: BookingId) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Blocking bookings on this car, minus `exclude`.
    pub fn find_blocking(&self, exclude: Option<BookingId>) -> impl Iterator<Item = &Booking> {
        self.bookings
            .iter()
            .filter(move |b| b.is_blocking() && Some(b.id) != exclude)
    }

    /// Blocking bookings whose range intersects `range`.
    /// Bookings picking up after `range.end` are skipped by binary search.
    pub fn overlapping(
        &self,
        range: &DateRange,
        exclude: Option<BookingId>,
    ) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.dates.start <= range.end);
        let range = *range;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.is_blocking() && Some(b.id) != exclude && b.dates.intersects(&range))
    }

    pub fn review_for_booking(&self, booking_id: BookingId) -> Option<&Review> {
        self.reviews.iter().find(|r| r.booking_id == booking_id)
    }
}

/// Journal record. Every state change is one of these, applied only after it is durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CarAdded {
        car: Car,
    },
    CarUpdated {
        car: Car,
    },
    CarDeleted {
        id: CarId,
    },
    UserRegistered {
        user: User,
    },
    UserUpdated {
        id: UserId,
        name: String,
        email: String,
        is_admin: bool,
    },
    UserDeleted {
        id: UserId,
    },
    BookingSubmitted {
        booking: Booking,
    },
    BookingEdited {
        id: BookingId,
        car_id: CarId,
        dates: DateRange,
        notes: Option<String>,
    },
    StatusChanged {
        id: BookingId,
        car_id: CarId,
        status: BookingStatus,
    },
    PaymentMethodSelected {
        id: BookingId,
        car_id: CarId,
        method: PaymentMethod,
        payment_status: PaymentStatus,
    },
    PaymentProcessed {
        id: BookingId,
        car_id: CarId,
        receipt: PaymentReceipt,
    },
    /// Inserts the review and moves its booking to Completed in one record.
    ReviewSubmitted {
        review: Review,
    },
    BookingDeleted {
        id: BookingId,
        car_id: CarId,
    },
}

impl Event {
    /// The car whose state this event mutates, for car-scoped events.
    pub fn car_id(&self) -> Option<CarId> {
        match self {
            Event::CarUpdated { car } => Some(car.id),
            Event::BookingSubmitted { booking } => Some(booking.car_id),
            Event::ReviewSubmitted { review } => Some(review.car_id),
            Event::BookingEdited { car_id, .. }
            | Event::StatusChanged { car_id, .. }
            | Event::PaymentMethodSelected { car_id, .. }
            | Event::PaymentProcessed { car_id, .. }
            | Event::BookingDeleted { car_id, .. } => Some(*car_id),
            Event::CarAdded { .. }
            | Event::CarDeleted { .. }
            | Event::UserRegistered { .. }
            | Event::UserUpdated { .. }
            | Event::UserDeleted { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A blocking booking that prevents a submission, approval or date change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictingBooking {
    pub id: BookingId,
    pub dates: DateRange,
}

impl fmt::Display for ConflictingBooking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Booking #{} ({})", self.id, self.dates)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarRating {
    /// Mean star rating rounded to one decimal, `None` without reviews.
    pub average: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewView {
    pub author: String,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_on: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDirectory {
    pub customers: Vec<User>,
    pub admins: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSummary {
    pub total_cars: usize,
    pub total_bookings: usize,
    pub total_customers: usize,
    pub recent_pending: Vec<Booking>,
    pub recent_approved: Vec<Booking>,
    pub recent_completed: Vec<Booking>,
    pub recent_rejected: Vec<Booking>,
}
