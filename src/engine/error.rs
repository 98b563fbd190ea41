use std::fmt;

use ulid::Ulid;

use crate::lifecycle::TransitionRule;
use crate::model::{ConflictingBooking, UnknownVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Car,
    Booking,
    Review,
    User,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Car => "car",
            Entity::Booking => "booking",
            Entity::Review => "review",
            Entity::User => "user",
        })
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    Conflict(Vec<ConflictingBooking>),
    IllegalTransition(TransitionRule),
    Unauthorized(&'static str),
    NotFound(Entity, Ulid),
    AlreadyExists(&'static str),
    LimitExceeded(&'static str),
    PaymentDeclined(String),
    Storage(String),
}

impl EngineError {
    /// Text safe to show an end user. Journal failures are reduced to a generic message.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Storage(_) => "operation failed, please try again".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Conflict(conflicts) => {
                f.write_str("car is already booked for overlapping dates: ")?;
                for (i, c) in conflicts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{c}")?;
                }
                Ok(())
            }
            EngineError::IllegalTransition(rule) => write!(f, "{rule}"),
            EngineError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::PaymentDeclined(msg) => write!(f, "{msg}"),
            EngineError::Storage(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<TransitionRule> for EngineError {
    fn from(rule: TransitionRule) -> Self {
        EngineError::IllegalTransition(rule)
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<&str> = errors.field_errors().into_keys().collect();
        fields.sort_unstable();
        EngineError::Validation(format!("invalid fields: {}", fields.join(", ")))
    }
}

impl From<UnknownVariant> for EngineError {
    fn from(e: UnknownVariant) -> Self {
        EngineError::Validation(e.to_string())
    }
}
