//! Stay lifecycle: bookings, keys, housekeeping, maintenance, bond claims and subscriptions
//! driven through one orchestrator over a versioned entity store.

pub mod access;
pub mod domain;
pub mod engine;
pub mod events;
pub mod import;
pub mod ledger;
pub mod machines;
pub mod orchestrator;
pub mod router;
pub mod scheduler;
pub mod store;

pub use access::{AccessController, AccessDecision, AccessLogEntry, DenialReason};
pub use domain::{Entity, EntityId, EntityKind, EntityRef, Money, Version};
pub use engine::{EngineSettings, StayEngine};
pub use events::{DomainEvent, EventBus, EventConsumer, EventKind};
pub use import::{parse_reservations, seed, ImportError, ImportSummary, ReservationPlan};
pub use ledger::{BookingProjection, Ledger, LedgerTotals};
pub use machines::{MachineKind, MachineRegistry};
pub use orchestrator::{
    Action, Applied, CapacityLimit, Command, Orchestrator, OrchestratorError, Pricing,
    RetryPolicy,
};
pub use router::engine_router;
pub use scheduler::{Clock, FixedClock, Scheduler, SystemClock, TickReport};
pub use store::{EntityStore, FileEntityStore, InMemoryEntityStore, StoreError};
