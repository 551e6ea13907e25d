use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{
    Booking, BookingStatus, DigitalKey, EntityId, EntityKind, EntityRef, JobStatus, KeyHolder,
    KeyStatus, MaintenanceJob, StoredEntity,
};
use super::events::{EventId, EventKind};
use super::store::{ChangeSet, EntityStore, PendingEvent, StoreError};

/// Outcome of an unlock request. A denial is an answer, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AccessDecision {
    Granted,
    Denied { reason: DenialReason },
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DenialReason {
    UnknownKey,
    WrongRoom,
    NotYetActive,
    Expired,
    Revoked,
    BookingCancelled,
    JobNotActive,
    RoomOccupied { occupant: KeyHolder },
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::UnknownKey => f.write_str("unknown key"),
            DenialReason::WrongRoom => f.write_str("key does not open this room"),
            DenialReason::NotYetActive => f.write_str("key is not active yet"),
            DenialReason::Expired => f.write_str("key has expired"),
            DenialReason::Revoked => f.write_str("key was revoked"),
            DenialReason::BookingCancelled => f.write_str("booking was cancelled"),
            DenialReason::JobNotActive => f.write_str("maintenance job is not in progress"),
            DenialReason::RoomOccupied { occupant } => match occupant {
                KeyHolder::Guest { booking_id } => {
                    write!(f, "room is occupied by booking {booking_id}")
                }
                KeyHolder::Maintenance { job_id } => {
                    write!(f, "room is occupied by maintenance job {job_id}")
                }
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Live view of who is inside a room.
pub trait OccupancyProbe: Send + Sync {
    fn occupant(
        &self,
        room_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<Option<KeyHolder>, StoreError>;
}

/// Derives occupancy from the store: a current booking occupies its room, otherwise an
/// in-progress maintenance job does.
pub struct StoreOccupancy<S> {
    store: Arc<S>,
}

impl<S> StoreOccupancy<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: EntityStore> OccupancyProbe for StoreOccupancy<S> {
    fn occupant(
        &self,
        room_id: &EntityId,
        _now: DateTime<Utc>,
    ) -> Result<Option<KeyHolder>, StoreError> {
        let guest = self
            .store
            .scan(EntityKind::Booking)?
            .into_iter()
            .filter_map(|record| Booking::from_entity(record.entity))
            .find(|booking| &booking.room_id == room_id && booking.status == BookingStatus::Current);
        if let Some(booking) = guest {
            return Ok(Some(KeyHolder::Guest {
                booking_id: booking.id,
            }));
        }

        Ok(self
            .store
            .scan(EntityKind::MaintenanceJob)?
            .into_iter()
            .filter_map(|record| MaintenanceJob::from_entity(record.entity))
            .find(|job| &job.room_id == room_id && job.status == JobStatus::InProgress)
            .map(|job| KeyHolder::Maintenance { job_id: job.id }))
    }
}

/// One line of a room's access log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLogEntry {
    pub event_id: EventId,
    pub at: DateTime<Utc>,
    pub key_id: EntityId,
    pub holder: Option<KeyHolder>,
    pub decision: AccessDecision,
}

/// Decides unlock requests and writes every decision to the room's event log.
pub struct AccessController<S> {
    store: Arc<S>,
    probe: Arc<dyn OccupancyProbe>,
}

impl<S> AccessController<S>
where
    S: EntityStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        let probe = Arc::new(StoreOccupancy::new(Arc::clone(&store)));
        Self { store, probe }
    }

    pub fn with_probe(mut self, probe: Arc<dyn OccupancyProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn authorize(
        &self,
        key_id: &EntityId,
        room_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision, AccessError> {
        let key = self
            .store
            .load(&EntityRef::new(EntityKind::DigitalKey, key_id))?
            .and_then(|record| DigitalKey::from_entity(record.entity));

        let decision = match &key {
            None => AccessDecision::Denied {
                reason: DenialReason::UnknownKey,
            },
            Some(key) => match self.evaluate(key, room_id, now)? {
                None => AccessDecision::Granted,
                Some(reason) => AccessDecision::Denied { reason },
            },
        };

        let holder = key.map(|key| key.holder);
        self.store.commit(ChangeSet {
            at: now,
            writes: Vec::new(),
            events: vec![PendingEvent {
                entity: EntityRef::new(EntityKind::Room, room_id),
                kind: EventKind::AccessDecided {
                    key_id: key_id.clone(),
                    room_id: room_id.clone(),
                    holder,
                    decision: decision.clone(),
                },
            }],
        })?;

        match &decision {
            AccessDecision::Granted => info!(key = %key_id, room = %room_id, "unlock granted"),
            AccessDecision::Denied { reason } => {
                info!(key = %key_id, room = %room_id, reason = %reason, "unlock denied")
            }
        }
        Ok(decision)
    }

    fn evaluate(
        &self,
        key: &DigitalKey,
        room_id: &EntityId,
        now: DateTime<Utc>,
    ) -> Result<Option<DenialReason>, AccessError> {
        if &key.room_id != room_id {
            return Ok(Some(DenialReason::WrongRoom));
        }
        match key.derived_status(now) {
            KeyStatus::Revoked => return Ok(Some(DenialReason::Revoked)),
            KeyStatus::NotAvailable => return Ok(Some(DenialReason::NotYetActive)),
            KeyStatus::Expired => return Ok(Some(DenialReason::Expired)),
            KeyStatus::Active => {}
        }

        match &key.holder {
            KeyHolder::Guest { booking_id } => {
                let booking = self
                    .store
                    .load(&EntityRef::new(EntityKind::Booking, booking_id))?
                    .and_then(|record| Booking::from_entity(record.entity));
                match booking.map(|booking| booking.status) {
                    None | Some(BookingStatus::Cancelled) => {
                        return Ok(Some(DenialReason::BookingCancelled))
                    }
                    Some(BookingStatus::Past) => return Ok(Some(DenialReason::Expired)),
                    Some(BookingStatus::Upcoming | BookingStatus::Current) => {}
                }
            }
            KeyHolder::Maintenance { job_id } => {
                let active = self
                    .store
                    .load(&EntityRef::new(EntityKind::MaintenanceJob, job_id))?
                    .and_then(|record| MaintenanceJob::from_entity(record.entity))
                    .is_some_and(|job| job.status == JobStatus::InProgress);
                if !active {
                    return Ok(Some(DenialReason::JobNotActive));
                }
            }
        }

        match self.probe.occupant(room_id, now)? {
            Some(occupant) if occupant != key.holder => {
                Ok(Some(DenialReason::RoomOccupied { occupant }))
            }
            _ => Ok(None),
        }
    }

    /// Every recorded decision for a room, oldest first.
    pub fn audit_trail(&self, room_id: &EntityId) -> Result<Vec<AccessLogEntry>, AccessError> {
        let events = self
            .store
            .events_for(&EntityRef::new(EntityKind::Room, room_id))?;
        Ok(events
            .into_iter()
            .filter_map(|event| match event.kind {
                EventKind::AccessDecided {
                    key_id,
                    holder,
                    decision,
                    ..
                } => Some(AccessLogEntry {
                    event_id: event.id,
                    at: event.occurred_at,
                    key_id,
                    holder,
                    decision,
                }),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::lifecycle::domain::{BondStatus, Entity, Money, PaymentStatus};
    use crate::lifecycle::store::{Expectation, InMemoryEntityStore, Write};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn booking(id: &str, status: BookingStatus) -> Booking {
        Booking {
            id: EntityId::new(id),
            guest_id: EntityId::new("guest-1"),
            room_id: EntityId::new("room-7"),
            key_id: EntityId::new("key-1"),
            check_in: at(10, 15),
            check_out: at(13, 10),
            status,
            payment_status: PaymentStatus::Pending,
            bond_amount: Money::from_dollars(200),
            bond_status: BondStatus::Pending,
            nightly_rate: Money::from_dollars(100),
            cleaning_fee: Money::ZERO,
            early_check_in_hours: 0,
            extension: None,
            charges: Vec::new(),
            created_at: at(1, 9),
        }
    }

    fn guest_key(booking_id: &str) -> DigitalKey {
        let mut key = DigitalKey::issue(
            &EntityId::new("room-7"),
            KeyHolder::Guest {
                booking_id: EntityId::new(booking_id),
            },
            at(10, 15),
            at(13, 10),
        );
        key.id = EntityId::new("key-1");
        key
    }

    fn seed(store: &InMemoryEntityStore, entities: Vec<Entity>) {
        store
            .commit(ChangeSet {
                at: at(1, 9),
                writes: entities
                    .into_iter()
                    .map(|entity| Write {
                        entity,
                        expected: Expectation::Absent,
                    })
                    .collect(),
                events: Vec::new(),
            })
            .expect("seed");
    }

    #[test]
    fn grants_inside_window_and_audits_the_decision() {
        let store = Arc::new(InMemoryEntityStore::new());
        seed(
            &store,
            vec![
                booking("booking-1", BookingStatus::Current).into_entity(),
                guest_key("booking-1").into_entity(),
            ],
        );
        let controller = AccessController::new(Arc::clone(&store));
        let room = EntityId::new("room-7");

        let decision = controller
            .authorize(&EntityId::new("key-1"), &room, at(10, 16))
            .expect("authorize");
        assert_eq!(decision, AccessDecision::Granted);

        let denied = controller
            .authorize(&EntityId::new("key-1"), &room, at(10, 16) - Duration::hours(2))
            .expect("authorize");
        assert_eq!(
            denied,
            AccessDecision::Denied {
                reason: DenialReason::NotYetActive
            }
        );

        let trail = controller.audit_trail(&room).expect("trail");
        assert_eq!(trail.len(), 2);
        assert!(trail[0].decision.is_granted());
        assert!(!trail[1].decision.is_granted());
    }

    #[test]
    fn denies_unknown_key_and_wrong_room() {
        let store = Arc::new(InMemoryEntityStore::new());
        seed(
            &store,
            vec![
                booking("booking-1", BookingStatus::Current).into_entity(),
                guest_key("booking-1").into_entity(),
            ],
        );
        let controller = AccessController::new(Arc::clone(&store));

        let unknown = controller
            .authorize(&EntityId::new("key-9"), &EntityId::new("room-7"), at(11, 9))
            .expect("authorize");
        assert_eq!(
            unknown,
            AccessDecision::Denied {
                reason: DenialReason::UnknownKey
            }
        );

        let wrong = controller
            .authorize(&EntityId::new("key-1"), &EntityId::new("room-8"), at(11, 9))
            .expect("authorize");
        assert_eq!(
            wrong,
            AccessDecision::Denied {
                reason: DenialReason::WrongRoom
            }
        );
    }

    #[test]
    fn cancelled_booking_denies_even_an_active_key() {
        let store = Arc::new(InMemoryEntityStore::new());
        let mut key = guest_key("booking-1");
        key.status = KeyStatus::Active;
        seed(
            &store,
            vec![
                booking("booking-1", BookingStatus::Cancelled).into_entity(),
                key.into_entity(),
            ],
        );
        let controller = AccessController::new(Arc::clone(&store));

        let decision = controller
            .authorize(&EntityId::new("key-1"), &EntityId::new("room-7"), at(11, 9))
            .expect("authorize");
        assert_eq!(
            decision,
            AccessDecision::Denied {
                reason: DenialReason::BookingCancelled
            }
        );
    }

    struct Occupied(KeyHolder);

    impl OccupancyProbe for Occupied {
        fn occupant(
            &self,
            _room_id: &EntityId,
            _now: DateTime<Utc>,
        ) -> Result<Option<KeyHolder>, StoreError> {
            Ok(Some(self.0.clone()))
        }
    }

    #[test]
    fn another_party_inside_the_room_denies_access() {
        let store = Arc::new(InMemoryEntityStore::new());
        seed(
            &store,
            vec![
                booking("booking-1", BookingStatus::Upcoming).into_entity(),
                guest_key("booking-1").into_entity(),
            ],
        );
        let occupant = KeyHolder::Maintenance {
            job_id: EntityId::new("job-1"),
        };
        let controller = AccessController::new(Arc::clone(&store))
            .with_probe(Arc::new(Occupied(occupant.clone())));

        let decision = controller
            .authorize(&EntityId::new("key-1"), &EntityId::new("room-7"), at(10, 16))
            .expect("authorize");
        match decision {
            AccessDecision::Denied {
                reason: DenialReason::RoomOccupied { occupant: found },
            } => assert_eq!(found, occupant),
            other => panic!("expected room occupied denial, got {other:?}"),
        }
    }
}
