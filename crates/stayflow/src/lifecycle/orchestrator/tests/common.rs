use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::lifecycle::domain::{
    Booking, EntityId, EntityRef, Money, RoomKind, StoredEntity, Version,
};
use crate::lifecycle::events::{DomainEvent, EventBus, EventKind};
use crate::lifecycle::orchestrator::{Action, Applied, Command, Orchestrator};
use crate::lifecycle::scheduler::FixedClock;
use crate::lifecycle::store::{EntityStore, InMemoryEntityStore};

pub(super) fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) struct Harness {
    pub store: Arc<InMemoryEntityStore>,
    pub clock: Arc<FixedClock>,
    pub orchestrator: Orchestrator<InMemoryEntityStore>,
}

impl Harness {
    pub(super) fn new(now: DateTime<Utc>) -> Self {
        let store = Arc::new(InMemoryEntityStore::new());
        let clock = Arc::new(FixedClock::new(now));
        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            Arc::new(EventBus::new()),
            clock.clone(),
        );
        Self {
            store,
            clock,
            orchestrator,
        }
    }

    pub(super) async fn room(&self, number: &str) -> EntityId {
        let id = EntityId::new(format!("room-{number}"));
        self.orchestrator
            .apply(Command::create_with_id(
                id.clone(),
                Action::RegisterRoom {
                    room_number: number.to_string(),
                    name: format!("Suite {number}"),
                    kind: RoomKind::Suite,
                    capacity: 2,
                },
            ))
            .await
            .expect("room registers");
        id
    }

    pub(super) async fn book(
        &self,
        id: &str,
        room_id: &EntityId,
        check_in: DateTime<Utc>,
        check_out: DateTime<Utc>,
    ) -> EntityId {
        self.orchestrator
            .apply(Command::create_with_id(
                EntityId::new(id),
                booking_request(room_id, "guest-1", check_in, check_out),
            ))
            .await
            .expect("booking created");
        EntityId::new(id)
    }

    pub(super) fn get<T: StoredEntity>(&self, id: &EntityId) -> T {
        self.orchestrator
            .read::<T>(id)
            .expect("entity present")
            .entity
    }

    pub(super) fn version<T: StoredEntity>(&self, id: &EntityId) -> Version {
        self.orchestrator
            .read::<T>(id)
            .expect("entity present")
            .version
    }

    /// Applies `action` to the entity at its current version.
    pub(super) async fn run<T: StoredEntity>(&self, id: &EntityId, action: Action) -> Applied {
        self.try_run::<T>(id, action).await.expect("command applies")
    }

    pub(super) async fn try_run<T: StoredEntity>(
        &self,
        id: &EntityId,
        action: Action,
    ) -> Result<Applied, crate::lifecycle::orchestrator::OrchestratorError> {
        let version = self.version::<T>(id);
        self.orchestrator
            .apply(Command::targeting(id, version, action))
            .await
    }

    /// Checks the guest in and collects the bond so turnover is not flagged urgent.
    pub(super) async fn settle_in(&self, booking_id: &EntityId) {
        self.run::<Booking>(booking_id, Action::CollectBond).await;
        let booking: Booking = self.get(booking_id);
        self.clock.set(booking.check_in);
        self.run::<Booking>(booking_id, Action::CheckInReached).await;
    }

    pub(super) fn events_for(&self, entity: &EntityRef) -> Vec<DomainEvent> {
        self.store.events_for(entity).expect("events")
    }
}

pub(super) fn booking_request(
    room_id: &EntityId,
    guest: &str,
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
) -> Action {
    Action::CreateBooking {
        guest_id: EntityId::new(guest),
        room_id: room_id.clone(),
        check_in,
        check_out,
        nightly_rate: Money::from_dollars(100),
        cleaning_fee: Money::from_dollars(40),
        bond_amount: Money::from_dollars(200),
        early_check_in_hours: 0,
    }
}

pub(super) fn event_names(events: &[DomainEvent]) -> Vec<&'static str> {
    events.iter().map(|event| event.kind.name()).collect()
}

pub(super) fn has_event(events: &[DomainEvent], predicate: impl Fn(&EventKind) -> bool) -> bool {
    events.iter().any(|event| predicate(&event.kind))
}
