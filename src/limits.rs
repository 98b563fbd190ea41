// Field lengths live on the validated request types in `request.rs`.

/// Longest rental a single booking may cover, in inclusive days.
pub const MAX_BOOKING_DAYS: i64 = 366;

pub const MAX_BOOKINGS_PER_CAR: usize = 10_000;

/// Recent bookings shown per status on the admin dashboard.
pub const DASHBOARD_RECENT: usize = 5;
