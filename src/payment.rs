use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::{BookingId, PaymentMethod};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub booking_id: BookingId,
    pub method: PaymentMethod,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    Declined(String),
    Unavailable(String),
}

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentError::Declined(reason) => write!(f, "payment declined: {reason}"),
            PaymentError::Unavailable(reason) => write!(f, "payment gateway unavailable: {reason}"),
        }
    }
}

impl std::error::Error for PaymentError {}

/// Online payment boundary (GCash, card). Called while the booking's car is
/// locked, so a charge and its journal record are never interleaved with
/// another change to the same booking.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &PaymentRequest) -> Result<PaymentConfirmation, PaymentError>;
}

/// Stub gateway: approves every non-negative charge without contacting anyone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedGateway;

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(&self, request: &PaymentRequest) -> Result<PaymentConfirmation, PaymentError> {
        if request.amount.is_sign_negative() {
            return Err(PaymentError::Declined("negative amount".into()));
        }
        tracing::debug!(
            "simulated {} charge of {} for booking {}",
            request.method,
            request.amount,
            request.booking_id
        );
        Ok(PaymentConfirmation {
            reference: format!("SIM-{}", Ulid::new()),
        })
    }
}
