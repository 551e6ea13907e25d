use chrono::NaiveDate;
use serde::Serialize;

use crate::lifecycle::domain::{EntityId, EntityRef, Version};
use crate::lifecycle::machines::InvalidTransition;
use crate::lifecycle::store::StoreError;

/// Business limit a command ran into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CapacityLimit {
    Nights { limit: u32, requested: usize },
    RoomBooked { room_id: EntityId, booking_id: EntityId },
    RoomHeld {
        room_id: EntityId,
        subscription_id: EntityId,
        date: NaiveDate,
    },
}

impl std::fmt::Display for CapacityLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityLimit::Nights { limit, requested } => {
                write!(f, "{requested} nights requested but the plan allows {limit}")
            }
            CapacityLimit::RoomBooked {
                room_id,
                booking_id,
            } => write!(f, "room {room_id} is already booked by {booking_id}"),
            CapacityLimit::RoomHeld {
                room_id,
                subscription_id,
                date,
            } => write!(
                f,
                "room {room_id} is held on {date} by subscription {subscription_id}"
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{0} not found")]
    NotFound(EntityRef),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("{entity} is at version {actual:?}, command expected {expected:?}")]
    ConcurrentModification {
        entity: EntityRef,
        expected: Option<Version>,
        actual: Option<Version>,
    },
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(CapacityLimit),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error(transparent)]
    Store(StoreError),
}

impl OrchestratorError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidCommand(message.into())
    }

    /// Only lost optimistic-lock races are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::CapacityExceeded(_) => "capacity_exceeded",
            Self::InvalidCommand(_) => "invalid_command",
            Self::Store(_) => "store_unavailable",
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict {
                entity,
                expected,
                actual,
            } => Self::ConcurrentModification {
                entity,
                expected,
                actual,
            },
            other => Self::Store(other),
        }
    }
}
