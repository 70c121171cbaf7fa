//! Record lock state machine
//!
//! A record is either unlocked or locked by exactly one user. Transitions are
//! pure functions of the current state and the caller; persisting the result
//! is the caller's job.

use serde::{Deserialize, Serialize};

use crate::actor::Actor;
use crate::error::{RedlogError, RedlogResult};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockState {
    #[default]
    Unlocked,
    Locked { owner: String },
}

impl LockState {
    pub fn locked_by(owner: impl Into<String>) -> Self {
        LockState::Locked {
            owner: owner.into(),
        }
    }

    /// Rebuild the state from the persisted `(locked, locked_by)` columns.
    ///
    /// A row flagged locked without an owner is treated as locked by nobody,
    /// which only an admin can release.
    pub fn from_columns(locked: bool, locked_by: Option<&str>) -> Self {
        if locked {
            LockState::locked_by(locked_by.unwrap_or_default())
        } else {
            LockState::Unlocked
        }
    }

    /// The `(locked, locked_by)` column pair for this state
    pub fn to_columns(&self) -> (bool, Option<String>) {
        match self {
            LockState::Unlocked => (false, None),
            LockState::Locked { owner } => (true, Some(owner.clone())),
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked { .. })
    }

    pub fn owner(&self) -> Option<&str> {
        match self {
            LockState::Unlocked => None,
            LockState::Locked { owner } => Some(owner),
        }
    }

    /// Whether the lock prevents `actor` from editing the record's fields
    pub fn blocks(&self, actor: &Actor) -> bool {
        match self {
            LockState::Unlocked => false,
            LockState::Locked { owner } => !actor.is(owner) && !actor.is_admin(),
        }
    }

    /// UNLOCKED -> LOCKED(actor)
    pub fn acquire(&self, actor: &Actor) -> RedlogResult<LockState> {
        match self {
            LockState::Unlocked => Ok(LockState::locked_by(&actor.username)),
            LockState::Locked { owner } if actor.is(owner) => Ok(self.clone()),
            LockState::Locked { owner } => Err(RedlogError::permission_denied(format!(
                "record is locked by {}",
                owner
            ))),
        }
    }

    /// LOCKED(owner) -> UNLOCKED, for the owner or an admin
    pub fn release(&self, actor: &Actor) -> RedlogResult<LockState> {
        match self {
            LockState::Unlocked => Ok(LockState::Unlocked),
            LockState::Locked { owner } if actor.is(owner) || actor.is_admin() => {
                Ok(LockState::Unlocked)
            }
            LockState::Locked { owner } => Err(RedlogError::permission_denied(format!(
                "record is locked by {}; only the lock owner or an admin can unlock it",
                owner
            ))),
        }
    }

    /// Acquire when unlocked, release when locked
    pub fn toggle(&self, actor: &Actor) -> RedlogResult<LockState> {
        match self {
            LockState::Unlocked => self.acquire(actor),
            LockState::Locked { .. } => self.release(actor),
        }
    }
}

/// Read-only lock projection used for edit preflight checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub locked: bool,
    pub locked_by: Option<String>,
}

impl From<&LockState> for LockStatus {
    fn from(state: &LockState) -> Self {
        let (locked, locked_by) = state.to_columns();
        Self { locked, locked_by }
    }
}
