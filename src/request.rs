//! Validated input for engine operations.
//!
//! Field bounds mirror the booking, car, review and user forms. Cross-field
//! rules (date order, booking length) are checked by the engine.

use chrono::NaiveDate;
use serde::Deserialize;
use validator::Validate;

use crate::model::{CarAvailability, CarId, Documents, Fuel, Transmission};

/// Customer booking submission.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewBooking {
    pub car_id: CarId,

    #[validate(length(min = 2, max = 100))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 10, max = 15))]
    pub contact: String,

    pub pickup: Option<NaiveDate>,

    pub return_date: Option<NaiveDate>,

    /// References returned by `DocumentStore::store`.
    #[serde(default)]
    pub documents: Documents,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Owner edit of an open booking: dates and notes only.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BookingEdit {
    pub pickup: Option<NaiveDate>,

    pub return_date: Option<NaiveDate>,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewReview {
    #[validate(range(min = 1, max = 5))]
    pub rating: u8,

    #[validate(length(max = 500))]
    pub comment: Option<String>,
}

/// Admin car form, used for both adding and updating a car.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CarDetails {
    #[validate(length(min = 2, max = 100))]
    pub name: String,

    #[validate(length(min = 1, max = 50))]
    pub price: String,

    #[validate(length(min = 2, max = 200))]
    pub specs: String,

    pub image: Option<String>,

    pub transmission: Transmission,

    pub fuel: Fuel,

    #[validate(length(min = 1, max = 50))]
    pub capacity: String,

    #[validate(length(max = 100))]
    pub engine: Option<String>,

    #[validate(length(max = 50))]
    pub mileage: Option<String>,

    #[validate(length(max = 50))]
    pub color: Option<String>,

    #[serde(default)]
    pub availability: CarAvailability,
}

/// Registration or admin-created account. The hash is produced by the host's
/// authentication layer and stored as given.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewUser {
    #[validate(length(min = 2, max = 100))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1))]
    pub password_hash: String,

    #[serde(default)]
    pub is_admin: bool,
}

/// Admin edit of an account. The password is not touched.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UserUpdate {
    #[validate(length(min = 2, max = 100))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    pub is_admin: bool,
}
