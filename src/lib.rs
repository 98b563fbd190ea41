pub mod auth;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod payment;
pub mod pricing;
pub mod request;
pub mod seed;
pub mod uploads;
pub mod wal;
