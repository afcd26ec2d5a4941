use crate::store::Collection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            reason: reason.into(),
        }
    }
}

/// A snapshot entry that cannot be materialized. Both kinds are handled the
/// same way: the entry is removed from the store and skipped locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    #[error("corrupt {collection} entry `{key}`: {reason}")]
    Corrupt {
        collection: Collection,
        key: String,
        reason: String,
    },
    #[error("{collection} entry `{key}` is outside the map at ({x}, {y})")]
    InvalidPosition {
        collection: Collection,
        key: String,
        x: i32,
        y: i32,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionRejected {
    #[error("local player has not joined")]
    PlayerMissing,
    #[error("local player is dead")]
    PlayerDead,
    #[error("local player is not dead")]
    NotDead,
    #[error("local player is stunned")]
    PlayerStunned,
    #[error("bomb limit reached ({bomb_count}/{max_bombs})")]
    BombLimitReached { bomb_count: u32, max_bombs: u32 },
    #[error("cell ({x}, {y}) is outside the map")]
    OutOfBounds { x: i32, y: i32 },
    #[error("cell ({x}, {y}) is blocked")]
    Blocked { x: i32, y: i32 },
    #[error("cell ({x}, {y}) is occupied")]
    CellOccupied { x: i32, y: i32 },
    #[error("no bomb in front of the player")]
    NoBombToPunch,
    #[error("bomb `{bomb_id}` is not live")]
    UnknownBomb { bomb_id: String },
    #[error("no free spawn cell found")]
    NoFreeSpawnCell,
    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },
}

impl From<StoreError> for ActionRejected {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable { reason } => ActionRejected::StoreUnavailable { reason },
        }
    }
}
