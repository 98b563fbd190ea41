use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::UserId;

/// Who is calling. Supplied with every engine operation by the host's session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Actor {
    pub fn customer(user_id: UserId) -> Self {
        Self { user_id, is_admin: false }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self { user_id, is_admin: true }
    }

    /// Internal maintenance (seeding). Admin rights, nil user id.
    pub fn system() -> Self {
        Self { user_id: Ulid::nil(), is_admin: true }
    }

    pub fn require_admin(&self) -> Result<(), EngineError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(EngineError::Unauthorized("admin access required"))
        }
    }

    pub fn require_owner(&self, owner: UserId) -> Result<(), EngineError> {
        if self.user_id == owner {
            Ok(())
        } else {
            Err(EngineError::Unauthorized("not the owner of this booking"))
        }
    }

    pub fn require_owner_or_admin(&self, owner: UserId) -> Result<(), EngineError> {
        if self.is_admin || self.user_id == owner {
            Ok(())
        } else {
            Err(EngineError::Unauthorized("not the owner of this booking"))
        }
    }
}
