use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use super::*;
use crate::auth::Actor;
use crate::lifecycle::TransitionRule;
use crate::payment::{PaymentConfirmation, PaymentError, PaymentRequest};
use crate::request::*;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("carhire_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

fn car_details(name: &str, price: &str) -> CarDetails {
    CarDetails {
        name: name.into(),
        price: price.into(),
        specs: "Automatic, 5 Seater".into(),
        image: None,
        transmission: Transmission::Automatic,
        fuel: Fuel::Gas,
        capacity: "5-Seater".into(),
        engine: None,
        mileage: None,
        color: None,
        availability: CarAvailability::Available,
    }
}

fn booking_form(car_id: CarId, start: NaiveDate, end: NaiveDate) -> NewBooking {
    NewBooking {
        car_id,
        name: "Juan Dela Cruz".into(),
        email: "juan@example.com".into(),
        contact: "09171234567".into(),
        pickup: Some(start),
        return_date: Some(end),
        documents: Documents::default(),
        notes: None,
    }
}

struct Fixture {
    engine: Engine,
    admin: Actor,
    customer: Actor,
    car: CarId,
}

async fn customer(engine: &Engine, email: &str) -> Actor {
    let id = engine
        .register_user(NewUser {
            name: "Juan Dela Cruz".into(),
            email: email.into(),
            password_hash: "pbkdf2:sha256$x".into(),
            is_admin: false,
        })
        .await
        .unwrap();
    Actor::customer(id)
}

async fn fixture(name: &str) -> Fixture {
    let engine = Engine::new(test_wal_path(name)).unwrap();
    let admin = Actor::admin(Ulid::new());
    let customer = customer(&engine, "juan@example.com").await;
    let car = engine.add_car(&admin, car_details("Toyota Vios 2020", "2,000")).await.unwrap();
    Fixture {
        engine,
        admin,
        customer,
        car,
    }
}

impl Fixture {
    async fn book(&self, start: NaiveDate, end: NaiveDate) -> BookingId {
        self.engine
            .submit_booking(&self.customer, booking_form(self.car, start, end))
            .await
            .unwrap()
    }

    async fn approved(&self, start: NaiveDate, end: NaiveDate) -> BookingId {
        let id = self.book(start, end).await;
        self.engine.set_status(&self.admin, id, BookingStatus::Approved).await.unwrap();
        id
    }

    async fn returned(&self, start: NaiveDate, end: NaiveDate) -> BookingId {
        let id = self.approved(start, end).await;
        self.engine.set_status(&self.admin, id, BookingStatus::Returned).await.unwrap();
        id
    }

    async fn status(&self, id: BookingId) -> BookingStatus {
        self.engine.booking_details(&self.admin, id).await.unwrap().status
    }
}

// ── Submission ───────────────────────────────────────────

#[tokio::test]
async fn submission_starts_pending_and_unpaid() {
    let f = fixture("submit_pending.wal").await;
    let id = f.book(date(1, 1), date(1, 5)).await;
    let b = f.engine.booking_details(&f.customer, id).await.unwrap();
    assert_eq!(b.status, BookingStatus::Pending);
    assert_eq!(b.payment_method, None);
    assert_eq!(b.payment_status, PaymentStatus::Unpaid);
    assert_eq!(b.user_id, f.customer.user_id);
    assert_eq!(b.dates, DateRange::new(date(1, 1), date(1, 5)));
}

#[tokio::test]
async fn submission_requires_both_dates_in_order() {
    let f = fixture("submit_dates.wal").await;
    let mut form = booking_form(f.car, date(1, 1), date(1, 5));
    form.return_date = None;
    assert!(matches!(
        f.engine.submit_booking(&f.customer, form).await,
        Err(EngineError::Validation(_))
    ));

    let backwards = booking_form(f.car, date(1, 5), date(1, 1));
    assert!(matches!(
        f.engine.submit_booking(&f.customer, backwards).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn submission_rejects_overlong_rental() {
    let f = fixture("submit_long.wal").await;
    let form = booking_form(f.car, date(1, 1), NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
    assert!(matches!(
        f.engine.submit_booking(&f.customer, form).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn submission_validates_contact_fields() {
    let f = fixture("submit_fields.wal").await;
    let mut form = booking_form(f.car, date(1, 1), date(1, 2));
    form.email = "nope".into();
    let err = f.engine.submit_booking(&f.customer, form).await.unwrap_err();
    assert!(matches!(&err, EngineError::Validation(msg) if msg.contains("email")));
}

#[tokio::test]
async fn submission_for_unknown_car_or_user() {
    let f = fixture("submit_unknown.wal").await;
    let missing_car = Ulid::new();
    assert!(matches!(
        f.engine
            .submit_booking(&f.customer, booking_form(missing_car, date(1, 1), date(1, 2)))
            .await,
        Err(EngineError::NotFound(Entity::Car, id)) if id == missing_car
    ));
    let stranger = Actor::customer(Ulid::new());
    assert!(matches!(
        f.engine
            .submit_booking(&stranger, booking_form(f.car, date(1, 1), date(1, 2)))
            .await,
        Err(EngineError::NotFound(Entity::User, _))
    ));
}

#[tokio::test]
async fn pending_bookings_do_not_block() {
    let f = fixture("pending_no_block.wal").await;
    f.book(date(2, 1), date(2, 10)).await;
    // Same dates again: nothing blocking yet
    f.book(date(2, 1), date(2, 10)).await;
    assert!(!f.engine.has_conflict(f.car, date(2, 1), date(2, 10), None).await.unwrap());
}

#[tokio::test]
async fn submission_blocked_by_approved_overlap() {
    let f = fixture("submit_conflict.wal").await;
    let a = f.approved(date(2, 1), date(2, 10)).await;
    let err = f
        .engine
        .submit_booking(&f.customer, booking_form(f.car, date(2, 5), date(2, 15)))
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict(conflicts) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].id, a);
            assert_eq!(conflicts[0].dates, DateRange::new(date(2, 1), date(2, 10)));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn touching_ranges_conflict() {
    let f = fixture("touching.wal").await;
    f.approved(date(2, 1), date(2, 10)).await;
    assert!(f.engine.has_conflict(f.car, date(2, 10), date(2, 12), None).await.unwrap());
    assert!(!f.engine.has_conflict(f.car, date(2, 11), date(2, 12), None).await.unwrap());
}

#[tokio::test]
async fn find_conflicts_lists_every_blocking_overlap() {
    let f = fixture("find_conflicts.wal").await;
    let a = f.approved(date(3, 1), date(3, 5)).await;
    let b = f.returned(date(3, 8), date(3, 12)).await;
    f.approved(date(4, 1), date(4, 2)).await;

    let conflicts = f.engine.find_conflicts(f.car, date(3, 4), date(3, 9), None).await.unwrap();
    let ids: Vec<_> = conflicts.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![a, b]);

    let without_a = f.engine.find_conflicts(f.car, date(3, 4), date(3, 9), Some(a)).await.unwrap();
    assert_eq!(without_a.len(), 1);
}

// ── Status machine ───────────────────────────────────────

#[tokio::test]
async fn approval_blocked_by_overlap() {
    // Both submitted while neither blocks
    let g = fixture("approve_conflict.wal").await;
    let first = g.book(date(2, 1), date(2, 10)).await;
    let second = g.book(date(2, 5), date(2, 15)).await;
    g.engine.set_status(&g.admin, first, BookingStatus::Approved).await.unwrap();

    let err = g
        .engine
        .set_status(&g.admin, second, BookingStatus::Approved)
        .await
        .unwrap_err();
    assert!(matches!(&err, EngineError::Conflict(c) if c.len() == 1 && c[0].id == first));
    assert!(err.to_string().contains("(Feb 01 - Feb 10)"));
    assert_eq!(g.status(second).await, BookingStatus::Pending);

    // Rejecting the blocked one is still fine
    g.engine.set_status(&g.admin, second, BookingStatus::Rejected).await.unwrap();
    assert_eq!(g.status(second).await, BookingStatus::Rejected);
}

#[tokio::test]
async fn only_admins_change_status() {
    let f = fixture("status_admin_only.wal").await;
    let id = f.book(date(1, 1), date(1, 2)).await;
    assert!(matches!(
        f.engine.set_status(&f.customer, id, BookingStatus::Approved).await,
        Err(EngineError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn terminal_states_are_final() {
    let f = fixture("terminal.wal").await;
    let rejected = f.book(date(1, 1), date(1, 2)).await;
    f.engine.set_status(&f.admin, rejected, BookingStatus::Rejected).await.unwrap();
    for to in BookingStatus::ALL {
        assert!(matches!(
            f.engine.set_status(&f.admin, rejected, to).await,
            Err(EngineError::IllegalTransition(TransitionRule::Terminal(BookingStatus::Rejected)))
        ));
    }
}

#[tokio::test]
async fn back_to_pending_after_payment_method() {
    let f = fixture("pending_after_payment.wal").await;
    let id = f.approved(date(1, 1), date(1, 3)).await;
    f.engine
        .select_payment_method(&f.customer, id, PaymentMethod::Cash)
        .await
        .unwrap();
    assert!(matches!(
        f.engine.set_status(&f.admin, id, BookingStatus::Pending).await,
        Err(EngineError::IllegalTransition(TransitionRule::PaymentMethodSelected))
    ));
}

#[tokio::test]
async fn admin_cannot_complete_directly() {
    let f = fixture("admin_complete.wal").await;
    let id = f.returned(date(1, 1), date(1, 3)).await;
    assert!(matches!(
        f.engine.set_status(&f.admin, id, BookingStatus::Completed).await,
        Err(EngineError::IllegalTransition(TransitionRule::ReviewRequired))
    ));
    assert_eq!(f.status(id).await, BookingStatus::Returned);
}

#[tokio::test]
async fn same_status_change_is_rejected() {
    let f = fixture("same_status.wal").await;
    let id = f.approved(date(1, 1), date(1, 3)).await;
    assert!(matches!(
        f.engine.set_status(&f.admin, id, BookingStatus::Approved).await,
        Err(EngineError::IllegalTransition(TransitionRule::NotAllowed { .. }))
    ));
}

#[tokio::test]
async fn unknown_booking_is_not_found() {
    let f = fixture("unknown_booking.wal").await;
    let ghost = Ulid::new();
    assert!(matches!(
        f.engine.set_status(&f.admin, ghost, BookingStatus::Approved).await,
        Err(EngineError::NotFound(Entity::Booking, id)) if id == ghost
    ));
}

// ── Payments ─────────────────────────────────────────────

#[tokio::test]
async fn payment_requires_approved_booking() {
    let f = fixture("payment_pending.wal").await;
    let id = f.book(date(1, 1), date(1, 3)).await;
    assert!(matches!(
        f.engine.select_payment_method(&f.customer, id, PaymentMethod::GCash).await,
        Err(EngineError::IllegalTransition(TransitionRule::PaymentRequiresApproved(BookingStatus::Pending)))
    ));
}

#[tokio::test]
async fn payment_only_by_owner() {
    let f = fixture("payment_owner.wal").await;
    let id = f.approved(date(1, 1), date(1, 3)).await;
    let other = customer(&f.engine, "other@example.com").await;
    assert!(matches!(
        f.engine.select_payment_method(&other, id, PaymentMethod::Card).await,
        Err(EngineError::Unauthorized(_))
    ));
    assert!(matches!(
        f.engine.select_payment_method(&f.admin, id, PaymentMethod::Card).await,
        Err(EngineError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn cash_stays_unpaid_and_cannot_be_processed() {
    let f = fixture("payment_cash.wal").await;
    let id = f.approved(date(1, 1), date(1, 3)).await;
    f.engine
        .select_payment_method(&f.customer, id, PaymentMethod::Cash)
        .await
        .unwrap();
    let b = f.engine.booking_details(&f.customer, id).await.unwrap();
    assert_eq!(b.payment_method, Some(PaymentMethod::Cash));
    assert_eq!(b.payment_status, PaymentStatus::Unpaid);
    assert!(matches!(
        f.engine.process_payment(&f.customer, id).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn online_payment_records_receipt() {
    let f = fixture("payment_gcash.wal").await;
    let id = f.approved(date(1, 1), date(1, 5)).await;
    assert!(matches!(
        f.engine.process_payment(&f.customer, id).await,
        Err(EngineError::Validation(_))
    ));
    f.engine
        .select_payment_method(&f.customer, id, PaymentMethod::GCash)
        .await
        .unwrap();
    let receipt = f.engine.process_payment(&f.customer, id).await.unwrap();
    assert_eq!(receipt.method, PaymentMethod::GCash);
    assert_eq!(receipt.amount, Decimal::new(10_000, 0));
    assert!(receipt.reference.starts_with("SIM-"));

    let b = f.engine.booking_details(&f.customer, id).await.unwrap();
    assert_eq!(b.payment_status, PaymentStatus::Paid);
    assert_eq!(b.receipt, Some(receipt));

    // Settled: no second charge, no method change
    assert!(matches!(
        f.engine.process_payment(&f.customer, id).await,
        Err(EngineError::IllegalTransition(TransitionRule::PaymentSettled))
    ));
    assert!(matches!(
        f.engine.select_payment_method(&f.customer, id, PaymentMethod::Cash).await,
        Err(EngineError::IllegalTransition(TransitionRule::PaymentSettled))
    ));
}

#[tokio::test]
async fn method_can_change_while_unpaid() {
    let f = fixture("payment_reselect.wal").await;
    let id = f.approved(date(1, 1), date(1, 2)).await;
    f.engine.select_payment_method(&f.customer, id, PaymentMethod::Cash).await.unwrap();
    f.engine.select_payment_method(&f.customer, id, PaymentMethod::Card).await.unwrap();
    let b = f.engine.booking_details(&f.customer, id).await.unwrap();
    assert_eq!(b.payment_method, Some(PaymentMethod::Card));
}

struct DecliningGateway;

#[async_trait::async_trait]
impl crate::payment::PaymentGateway for DecliningGateway {
    async fn charge(&self, _request: &PaymentRequest) -> Result<PaymentConfirmation, PaymentError> {
        Err(PaymentError::Declined("insufficient funds".into()))
    }
}

#[tokio::test]
async fn declined_payment_leaves_booking_unpaid() {
    let engine = Engine::with_gateway(test_wal_path("payment_declined.wal"), Arc::new(DecliningGateway)).unwrap();
    let admin = Actor::admin(Ulid::new());
    let cust = customer(&engine, "declined@example.com").await;
    let car = engine.add_car(&admin, car_details("Honda City 2020", "2,200")).await.unwrap();
    let id = engine
        .submit_booking(&cust, booking_form(car, date(1, 1), date(1, 2)))
        .await
        .unwrap();
    engine.set_status(&admin, id, BookingStatus::Approved).await.unwrap();
    engine.select_payment_method(&cust, id, PaymentMethod::Card).await.unwrap();

    let err = engine.process_payment(&cust, id).await.unwrap_err();
    assert!(matches!(&err, EngineError::PaymentDeclined(msg) if msg.contains("insufficient funds")));
    let b = engine.booking_details(&cust, id).await.unwrap();
    assert_eq!(b.payment_status, PaymentStatus::Unpaid);
    assert!(b.receipt.is_none());
}

// ── Reviews ──────────────────────────────────────────────

#[tokio::test]
async fn review_completes_returned_booking() {
    let f = fixture("review_complete.wal").await;
    let id = f.returned(date(1, 1), date(1, 3)).await;
    f.engine
        .submit_review(&f.customer, id, NewReview { rating: 5, comment: Some("Smooth ride".into()) })
        .await
        .unwrap();
    assert_eq!(f.status(id).await, BookingStatus::Completed);
    assert!(f.engine.review_for_booking(id).await.is_some());

    let again = f
        .engine
        .submit_review(&f.customer, id, NewReview { rating: 1, comment: None })
        .await;
    assert!(matches!(again, Err(EngineError::IllegalTransition(TransitionRule::AlreadyReviewed))));
    assert_eq!(f.engine.car_rating(f.car).await.unwrap().count, 1);
}

#[tokio::test]
async fn review_requires_returned_and_owner() {
    let f = fixture("review_rules.wal").await;
    let approved = f.approved(date(1, 1), date(1, 3)).await;
    assert!(matches!(
        f.engine.submit_review(&f.customer, approved, NewReview { rating: 4, comment: None }).await,
        Err(EngineError::IllegalTransition(TransitionRule::ReviewRequiresReturned(BookingStatus::Approved)))
    ));

    let returned = f.returned(date(2, 1), date(2, 3)).await;
    let other = customer(&f.engine, "other@example.com").await;
    assert!(matches!(
        f.engine.submit_review(&other, returned, NewReview { rating: 4, comment: None }).await,
        Err(EngineError::Unauthorized(_))
    ));
    assert!(matches!(
        f.engine.submit_review(&f.customer, returned, NewReview { rating: 9, comment: None }).await,
        Err(EngineError::Validation(_))
    ));
    assert_eq!(f.status(returned).await, BookingStatus::Returned);
}

#[tokio::test]
async fn car_reviews_newest_first_with_rating() {
    let f = fixture("car_reviews.wal").await;
    let first = f.returned(date(1, 1), date(1, 2)).await;
    let second = f.returned(date(2, 1), date(2, 2)).await;
    f.engine
        .submit_review(&f.customer, first, NewReview { rating: 4, comment: Some("ok".into()) })
        .await
        .unwrap();
    f.engine
        .submit_review(&f.customer, second, NewReview { rating: 5, comment: Some("great".into()) })
        .await
        .unwrap();

    let reviews = f.engine.car_reviews(f.car).await.unwrap();
    assert_eq!(reviews.len(), 2);
    assert_eq!(reviews[0].comment.as_deref(), Some("great"));
    assert_eq!(reviews[0].author, "Juan Dela Cruz");

    let rating = f.engine.car_rating(f.car).await.unwrap();
    assert_eq!(rating.count, 2);
    assert_eq!(rating.average, Some(4.5));
}

#[tokio::test]
async fn rating_rounds_half_to_even() {
    let f = fixture("rating_round.wal").await;
    for (i, rating) in [5u8, 5, 4, 3].into_iter().enumerate() {
        let day = 1 + 3 * i as u32;
        let id = f.returned(date(3, day), date(3, day + 1)).await;
        f.engine
            .submit_review(&f.customer, id, NewReview { rating, comment: None })
            .await
            .unwrap();
    }
    // 17 / 4 = 4.25
    let rating = f.engine.car_rating(f.car).await.unwrap();
    assert_eq!(rating.count, 4);
    assert_eq!(rating.average, Some(4.2));
}

#[tokio::test]
async fn rating_without_reviews() {
    let f = fixture("no_reviews.wal").await;
    let rating = f.engine.car_rating(f.car).await.unwrap();
    assert_eq!(rating, CarRating { average: None, count: 0 });
}

// ── Edit and delete ──────────────────────────────────────

#[tokio::test]
async fn edit_moves_dates_and_rechecks_conflicts() {
    let f = fixture("edit.wal").await;
    f.approved(date(3, 10), date(3, 15)).await;
    let id = f.approved(date(3, 1), date(3, 3)).await;

    let into_conflict = BookingEdit {
        pickup: Some(date(3, 2)),
        return_date: Some(date(3, 11)),
        notes: None,
    };
    assert!(matches!(
        f.engine.edit_booking(&f.customer, id, into_conflict).await,
        Err(EngineError::Conflict(_))
    ));

    // Overlapping its own old dates is fine
    let ok = BookingEdit {
        pickup: Some(date(3, 2)),
        return_date: Some(date(3, 6)),
        notes: Some("Pickup at the airport".into()),
    };
    f.engine.edit_booking(&f.customer, id, ok).await.unwrap();
    let b = f.engine.booking_details(&f.customer, id).await.unwrap();
    assert_eq!(b.dates, DateRange::new(date(3, 2), date(3, 6)));
    assert_eq!(b.notes.as_deref(), Some("Pickup at the airport"));
}

#[tokio::test]
async fn edit_locked_after_return() {
    let f = fixture("edit_locked.wal").await;
    let id = f.returned(date(1, 1), date(1, 3)).await;
    let edit = BookingEdit {
        pickup: Some(date(1, 1)),
        return_date: Some(date(1, 4)),
        notes: None,
    };
    assert!(matches!(
        f.engine.edit_booking(&f.customer, id, edit).await,
        Err(EngineError::IllegalTransition(TransitionRule::Locked(BookingStatus::Returned)))
    ));
}

#[tokio::test]
async fn owner_deletes_open_booking_admin_deletes_any() {
    let f = fixture("delete.wal").await;
    let open = f.book(date(1, 1), date(1, 2)).await;
    f.engine.delete_booking(&f.customer, open).await.unwrap();
    assert!(matches!(
        f.engine.booking_details(&f.customer, open).await,
        Err(EngineError::NotFound(Entity::Booking, _))
    ));

    let done = f.returned(date(2, 1), date(2, 2)).await;
    f.engine
        .submit_review(&f.customer, done, NewReview { rating: 3, comment: None })
        .await
        .unwrap();
    assert!(matches!(
        f.engine.delete_booking(&f.customer, done).await,
        Err(EngineError::IllegalTransition(TransitionRule::Locked(BookingStatus::Completed)))
    ));
    f.engine.delete_booking(&f.admin, done).await.unwrap();
    assert!(f.engine.review_for_booking(done).await.is_none());
    assert_eq!(f.engine.car_rating(f.car).await.unwrap().count, 0);
}

#[tokio::test]
async fn strangers_cannot_see_or_delete() {
    let f = fixture("strangers.wal").await;
    let id = f.book(date(1, 1), date(1, 2)).await;
    let other = customer(&f.engine, "nosy@example.com").await;
    assert!(matches!(
        f.engine.booking_details(&other, id).await,
        Err(EngineError::Unauthorized(_))
    ));
    assert!(matches!(f.engine.delete_booking(&other, id).await, Err(EngineError::Unauthorized(_))));
    assert!(matches!(f.engine.quote(&other, id).await, Err(EngineError::Unauthorized(_))));
}

// ── Pricing and availability views ───────────────────────

#[tokio::test]
async fn quote_five_days_at_two_thousand() {
    let f = fixture("quote.wal").await;
    let id = f.approved(date(1, 1), date(1, 5)).await;
    let q = f.engine.quote(&f.customer, id).await.unwrap();
    assert_eq!(q.total_days, 5);
    assert_eq!(q.billable_days, 5);
    assert_eq!(q.display, "₱10,000");
    assert_eq!(q, f.engine.quote(&f.admin, id).await.unwrap());
}

#[tokio::test]
async fn unrepresentable_price_is_refused() {
    let f = fixture("huge_price.wal").await;
    let huge = "79228162514264337593543950335";
    assert!(matches!(
        f.engine.add_car(&f.admin, car_details("Limousine", huge)).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        f.engine.update_car(&f.admin, f.car, car_details("Toyota Vios 2020", huge)).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert_eq!(f.engine.get_car(f.car).await.unwrap().price, "2,000");
    assert_eq!(f.engine.list_cars().await.len(), 1);
}

#[tokio::test]
async fn overflowing_total_fails_and_releases_the_car() {
    let f = fixture("overflow_total.wal").await;
    let id = f.approved(date(1, 1), date(1, 2)).await;
    f.engine
        .select_payment_method(&f.customer, id, PaymentMethod::GCash)
        .await
        .unwrap();
    // Price stored before the catalog range check existed
    let cs = f.engine.store.get_car_state(&f.car).unwrap();
    cs.write().await.car.price = "79228162514264337593543950335".into();

    assert!(matches!(
        f.engine.quote(&f.customer, id).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        f.engine.process_payment(&f.customer, id).await,
        Err(EngineError::LimitExceeded(_))
    ));
    f.engine.set_status(&f.admin, id, BookingStatus::Returned).await.unwrap();
    let b = f.engine.booking_details(&f.customer, id).await.unwrap();
    assert_eq!(b.payment_status, PaymentStatus::Unpaid);
    assert!(b.receipt.is_none());
}

#[tokio::test]
async fn booked_ranges_and_dates() {
    let f = fixture("booked_views.wal").await;
    f.approved(date(1, 10), date(1, 12)).await;
    f.returned(date(1, 1), date(1, 2)).await;
    f.book(date(2, 1), date(2, 5)).await;

    let ranges = f.engine.booked_ranges(f.car).await.unwrap();
    assert_eq!(
        ranges,
        vec![DateRange::new(date(1, 1), date(1, 2)), DateRange::new(date(1, 10), date(1, 12))]
    );
    let days = f.engine.booked_dates(f.car).await.unwrap();
    assert_eq!(days, vec![date(1, 1), date(1, 2), date(1, 10), date(1, 11), date(1, 12)]);
}

// ── Listings ─────────────────────────────────────────────

#[tokio::test]
async fn user_listings_and_grouping() {
    let f = fixture("listings.wal").await;
    let a = f.book(date(1, 1), date(1, 2)).await;
    let b = f.approved(date(2, 1), date(2, 2)).await;
    let other = customer(&f.engine, "other@example.com").await;
    f.engine
        .submit_booking(&other, booking_form(f.car, date(3, 1), date(3, 2)))
        .await
        .unwrap();

    let mine = f.engine.bookings_for_user(&f.customer, f.customer.user_id).await.unwrap();
    assert_eq!(mine.iter().map(|x| x.id).collect::<Vec<_>>(), vec![b, a]);
    assert!(f.engine.bookings_for_user(&other, f.customer.user_id).await.is_err());

    let grouped = f.engine.bookings_grouped(&f.customer).await;
    assert_eq!(grouped.len(), 5);
    assert_eq!(grouped[&BookingStatus::Pending].len(), 1);
    assert_eq!(grouped[&BookingStatus::Approved][0].id, b);
    assert!(grouped[&BookingStatus::Completed].is_empty());

    let pending = f.engine.bookings_by_status(&f.admin, Some(BookingStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(f.engine.bookings_by_status(&f.admin, None).await.unwrap().len(), 3);
    assert!(f.engine.bookings_by_status(&f.customer, None).await.is_err());
}

#[tokio::test]
async fn dashboard_counts_and_recent() {
    let f = fixture("dashboard.wal").await;
    for m in 1..=7 {
        f.book(date(m, 1), date(m, 2)).await;
    }
    let rejected = f.book(date(8, 1), date(8, 2)).await;
    f.engine.set_status(&f.admin, rejected, BookingStatus::Rejected).await.unwrap();
    f.engine
        .add_user(
            &f.admin,
            NewUser {
                name: "Second Admin".into(),
                email: "admin2@example.com".into(),
                password_hash: "x".into(),
                is_admin: true,
            },
        )
        .await
        .unwrap();

    let d = f.engine.dashboard(&f.admin).await.unwrap();
    assert_eq!(d.total_cars, 1);
    assert_eq!(d.total_bookings, 8);
    assert_eq!(d.total_customers, 1);
    assert_eq!(d.recent_pending.len(), 5);
    assert_eq!(d.recent_rejected.len(), 1);
    assert!(d.recent_approved.is_empty());
    assert!(f.engine.dashboard(&f.customer).await.is_err());
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn car_crud_and_cascade() {
    let f = fixture("car_crud.wal").await;
    assert!(matches!(
        f.engine.add_car(&f.customer, car_details("Nope", "1")).await,
        Err(EngineError::Unauthorized(_))
    ));
    assert!(matches!(
        f.engine.add_car(&f.admin, car_details("X", "1")).await,
        Err(EngineError::Validation(_))
    ));

    let mut details = car_details("Toyota Vios 2021", "2,100");
    details.availability = CarAvailability::Maintenance;
    f.engine.update_car(&f.admin, f.car, details).await.unwrap();
    let car = f.engine.get_car(f.car).await.unwrap();
    assert_eq!(car.name, "Toyota Vios 2021");
    assert_eq!(car.availability, CarAvailability::Maintenance);

    let booking = f.approved(date(1, 1), date(1, 2)).await;
    f.engine.delete_car(&f.admin, f.car).await.unwrap();
    assert!(f.engine.get_car(f.car).await.is_none());
    assert!(f.engine.list_cars().await.is_empty());
    assert!(matches!(
        f.engine.booking_details(&f.admin, booking).await,
        Err(EngineError::NotFound(Entity::Booking, _))
    ));
}

#[tokio::test]
async fn availability_flag_does_not_affect_conflicts() {
    let f = fixture("advisory_flag.wal").await;
    let mut details = car_details("Toyota Vios 2020", "2,000");
    details.availability = CarAvailability::Rented;
    f.engine.update_car(&f.admin, f.car, details).await.unwrap();
    f.book(date(1, 1), date(1, 2)).await;
}

// ── Accounts ─────────────────────────────────────────────

#[tokio::test]
async fn email_is_unique_ignoring_case() {
    let f = fixture("email_unique.wal").await;
    let dup = f
        .engine
        .register_user(NewUser {
            name: "Juan Again".into(),
            email: "JUAN@example.com".into(),
            password_hash: "x".into(),
            is_admin: true,
        })
        .await;
    assert!(matches!(dup, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn registration_never_grants_admin() {
    let f = fixture("register_admin.wal").await;
    let id = f
        .engine
        .register_user(NewUser {
            name: "Sneaky".into(),
            email: "sneaky@example.com".into(),
            password_hash: "x".into(),
            is_admin: true,
        })
        .await
        .unwrap();
    assert!(!f.engine.get_user(&f.admin, id).unwrap().is_admin);
}

#[tokio::test]
async fn update_user_keeps_password() {
    let f = fixture("update_user.wal").await;
    let id = f.customer.user_id;
    f.engine
        .update_user(
            &f.admin,
            id,
            UserUpdate {
                name: "Juan D.".into(),
                email: "juan.d@example.com".into(),
                is_admin: false,
            },
        )
        .await
        .unwrap();
    let u = f.engine.get_user(&f.customer, id).unwrap();
    assert_eq!(u.name, "Juan D.");
    assert_eq!(u.password_hash, "pbkdf2:sha256$x");
    assert!(f.engine.find_user_by_email("juan@example.com").is_none());
    assert_eq!(f.engine.find_user_by_email("Juan.D@example.com").map(|u| u.id), Some(id));

    let other = customer(&f.engine, "taken@example.com").await;
    let clash = UserUpdate {
        name: "Juan D.".into(),
        email: "taken@example.com".into(),
        is_admin: false,
    };
    assert!(matches!(
        f.engine.update_user(&f.admin, id, clash).await,
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(f.engine.get_user(&other, id).is_err());
}

#[tokio::test]
async fn delete_user_cascades_bookings_and_reviews() {
    let f = fixture("delete_user.wal").await;
    let done = f.returned(date(1, 1), date(1, 2)).await;
    f.engine
        .submit_review(&f.customer, done, NewReview { rating: 5, comment: None })
        .await
        .unwrap();
    let open = f.book(date(2, 1), date(2, 2)).await;

    f.engine.delete_user(&f.admin, f.customer.user_id).await.unwrap();
    assert!(f.engine.review_for_booking(done).await.is_none());
    assert!(f.engine.booking_details(&f.admin, open).await.is_err());
    assert_eq!(f.engine.car_rating(f.car).await.unwrap().count, 0);
    assert_eq!(f.engine.list_users(&f.admin).unwrap().customers.len(), 0);
}

#[tokio::test]
async fn admin_cannot_delete_self() {
    let f = fixture("delete_self.wal").await;
    let me = f
        .engine
        .add_user(
            &f.admin,
            NewUser {
                name: "Admin".into(),
                email: "admin@test.com".into(),
                password_hash: "x".into(),
                is_admin: true,
            },
        )
        .await
        .unwrap();
    let me = Actor::admin(me);
    assert!(matches!(
        f.engine.delete_user(&me, me.user_id).await,
        Err(EngineError::Validation(_))
    ));
    let dir = f.engine.list_users(&f.admin).unwrap();
    assert_eq!(dir.admins.len(), 1);
    assert_eq!(dir.customers.len(), 1);
}

// ── Journal ──────────────────────────────────────────────

#[tokio::test]
async fn replay_restores_full_state() {
    let path = test_wal_path("replay_full.wal");
    let (car, customer_id, done, paid, open) = {
        let engine = Engine::new(path.clone()).unwrap();
        let admin = Actor::admin(Ulid::new());
        let cust = customer(&engine, "replay@example.com").await;
        let car = engine.add_car(&admin, car_details("Toyota Vios 2020", "2,000")).await.unwrap();

        let done = engine.submit_booking(&cust, booking_form(car, date(1, 1), date(1, 3))).await.unwrap();
        engine.set_status(&admin, done, BookingStatus::Approved).await.unwrap();
        engine.set_status(&admin, done, BookingStatus::Returned).await.unwrap();
        engine
            .submit_review(&cust, done, NewReview { rating: 4, comment: Some("nice".into()) })
            .await
            .unwrap();

        let paid = engine.submit_booking(&cust, booking_form(car, date(2, 1), date(2, 5))).await.unwrap();
        engine.set_status(&admin, paid, BookingStatus::Approved).await.unwrap();
        engine.select_payment_method(&cust, paid, PaymentMethod::Card).await.unwrap();
        engine.process_payment(&cust, paid).await.unwrap();

        let open = engine.submit_booking(&cust, booking_form(car, date(3, 1), date(3, 2))).await.unwrap();
        let edit = BookingEdit {
            pickup: Some(date(3, 4)),
            return_date: Some(date(3, 6)),
            notes: None,
        };
        engine.edit_booking(&cust, open, edit).await.unwrap();
        let gone = engine.submit_booking(&cust, booking_form(car, date(4, 1), date(4, 2))).await.unwrap();
        engine.delete_booking(&cust, gone).await.unwrap();
        (car, cust.user_id, done, paid, open)
    };

    let engine = Engine::new(path).unwrap();
    let admin = Actor::admin(Ulid::new());
    assert_eq!(engine.get_user(&admin, customer_id).unwrap().email, "replay@example.com");
    assert_eq!(engine.booking_details(&admin, done).await.unwrap().status, BookingStatus::Completed);
    assert!(engine.review_for_booking(done).await.is_some());
    let p = engine.booking_details(&admin, paid).await.unwrap();
    assert_eq!(p.payment_status, PaymentStatus::Paid);
    assert_eq!(p.receipt.map(|r| r.amount), Some(Decimal::new(10_000, 0)));
    assert_eq!(
        engine.booking_details(&admin, open).await.unwrap().dates,
        DateRange::new(date(3, 4), date(3, 6))
    );
    assert_eq!(engine.bookings_by_status(&admin, None).await.unwrap().len(), 3);
    assert!(engine.has_conflict(car, date(2, 3), date(2, 3), None).await.unwrap());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let (car, paid) = {
        let f_engine = Engine::new(path.clone()).unwrap();
        let admin = Actor::admin(Ulid::new());
        let cust = customer(&f_engine, "compact@example.com").await;
        let car = f_engine.add_car(&admin, car_details("Honda City 2020", "2,200")).await.unwrap();
        // Churn that compaction should fold away
        for _ in 0..5 {
            let id = f_engine
                .submit_booking(&cust, booking_form(car, date(5, 1), date(5, 2)))
                .await
                .unwrap();
            f_engine.delete_booking(&cust, id).await.unwrap();
        }
        let paid = f_engine.submit_booking(&cust, booking_form(car, date(1, 1), date(1, 2))).await.unwrap();
        f_engine.set_status(&admin, paid, BookingStatus::Approved).await.unwrap();
        f_engine.select_payment_method(&cust, paid, PaymentMethod::GCash).await.unwrap();
        f_engine.process_payment(&cust, paid).await.unwrap();

        let before = std::fs::metadata(&path).unwrap().len();
        let events = f_engine.compact_wal().await.unwrap();
        // user + car + booking
        assert_eq!(events, 3);
        assert!(std::fs::metadata(&path).unwrap().len() < before);
        assert_eq!(f_engine.wal_appends_since_compact().await, 0);

        // Appends after compaction land in the new file
        f_engine.set_status(&admin, paid, BookingStatus::Returned).await.unwrap();
        (car, paid)
    };

    let engine = Engine::new(path).unwrap();
    let admin = Actor::admin(Ulid::new());
    let b = engine.booking_details(&admin, paid).await.unwrap();
    assert_eq!(b.status, BookingStatus::Returned);
    assert_eq!(b.payment_status, PaymentStatus::Paid);
    assert_eq!(engine.get_car(car).await.unwrap().price, "2,200");
}

#[tokio::test]
async fn failed_journal_write_changes_nothing() {
    let mut f = fixture("journal_down.wal").await;
    let id = f.returned(date(1, 1), date(1, 3)).await;
    let (closed, rx) = mpsc::channel(1);
    drop(rx);
    f.engine.wal_tx = closed;

    let result = f
        .engine
        .submit_review(&f.customer, id, NewReview { rating: 4, comment: Some("fine".into()) })
        .await;
    assert!(matches!(result, Err(EngineError::Storage(_))));
    assert_eq!(result.unwrap_err().user_message(), "operation failed, please try again");
    assert_eq!(f.status(id).await, BookingStatus::Returned);
    assert!(f.engine.review_for_booking(id).await.is_none());
    assert_eq!(f.engine.car_rating(f.car).await.unwrap().count, 0);

    assert!(matches!(
        f.engine
            .submit_booking(&f.customer, booking_form(f.car, date(2, 1), date(2, 2)))
            .await,
        Err(EngineError::Storage(_))
    ));
    let mine = f.engine.bookings_for_user(&f.customer, f.customer.user_id).await.unwrap();
    assert_eq!(mine.len(), 1);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_approvals_admit_one() {
    let f = fixture("concurrent_approve.wal").await;
    let mut ids = Vec::new();
    for offset in 0..8 {
        ids.push(f.book(date(6, 1 + offset), date(6, 10 + offset)).await);
    }
    let engine = Arc::new(f.engine);
    let admin = f.admin;
    let handles: Vec<_> = ids
        .iter()
        .map(|&id| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.set_status(&admin, id, BookingStatus::Approved).await })
        })
        .collect();

    let mut approved = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => approved += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(approved, 1);
    assert_eq!(engine.booked_ranges(f.car).await.unwrap().len(), 1);
}

#[tokio::test]
async fn submission_racing_user_deletion_leaves_no_orphans() {
    let f = fixture("submit_vs_delete_user.wal").await;
    let engine = Arc::new(f.engine);
    let (admin, customer, car) = (f.admin, f.customer, f.car);

    let held = engine.store.get_car_state(&car).unwrap().write_owned().await;
    let deleting = tokio::spawn({
        let engine = engine.clone();
        async move { engine.delete_user(&admin, customer.user_id).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let submitting = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine
                .submit_booking(&customer, booking_form(car, date(5, 1), date(5, 3)))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);

    deleting.await.unwrap().unwrap();
    assert!(matches!(
        submitting.await.unwrap(),
        Err(EngineError::NotFound(Entity::User, _))
    ));
    assert!(engine.store.user(&customer.user_id).is_none());
    assert_eq!(engine.store.booking_count(), 0);
}
