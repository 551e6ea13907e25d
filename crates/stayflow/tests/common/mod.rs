#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use stayflow::lifecycle::domain::{
    Booking, EntityKind, HousekeepingTask, Money, RoomKind, StoredEntity,
};
use stayflow::lifecycle::{
    Action, Applied, Command, EngineSettings, EntityId, EntityStore, FixedClock, StayEngine,
};

/// Check-in for the stay every test lays out: 2025-03-10 15:00 UTC.
pub fn arrival() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0)
        .single()
        .expect("valid arrival")
}

pub fn departure() -> DateTime<Utc> {
    arrival() + Duration::days(3)
}

pub fn engine_at<S>(store: Arc<S>, now: DateTime<Utc>) -> (StayEngine<S>, Arc<FixedClock>)
where
    S: EntityStore + 'static,
{
    let clock = Arc::new(FixedClock::new(now));
    let engine =
        StayEngine::new(store, clock.clone(), EngineSettings::default()).expect("engine starts");
    (engine, clock)
}

pub async fn register_room<S>(engine: &StayEngine<S>, number: &str) -> EntityId
where
    S: EntityStore + 'static,
{
    let id = EntityId::new(format!("room-{number}"));
    engine
        .submit(Command::create_with_id(
            id.clone(),
            Action::RegisterRoom {
                room_number: number.to_string(),
                name: format!("Room {number}"),
                kind: RoomKind::Room,
                capacity: 2,
            },
        ))
        .await
        .expect("room registers");
    id
}

/// Three nights at $100 with a $40 cleaning fee and a $200 bond.
pub async fn book_stay<S>(engine: &StayEngine<S>, id: &str, room_id: &EntityId) -> EntityId
where
    S: EntityStore + 'static,
{
    let id = EntityId::new(id);
    engine
        .submit(Command::create_with_id(
            id.clone(),
            Action::CreateBooking {
                guest_id: EntityId::new("guest-1"),
                room_id: room_id.clone(),
                check_in: arrival(),
                check_out: departure(),
                nightly_rate: Money::from_dollars(100),
                cleaning_fee: Money::from_dollars(40),
                bond_amount: Money::from_dollars(200),
                early_check_in_hours: 0,
            },
        ))
        .await
        .expect("booking created");
    id
}

pub fn read<S, T>(engine: &StayEngine<S>, id: &EntityId) -> T
where
    S: EntityStore + 'static,
    T: StoredEntity,
{
    engine
        .orchestrator()
        .read::<T>(id)
        .expect("entity present")
        .entity
}

/// Applies `action` at the entity's current version.
pub async fn act<S, T>(engine: &StayEngine<S>, id: &EntityId, action: Action) -> Applied
where
    S: EntityStore + 'static,
    T: StoredEntity,
{
    let version = engine
        .orchestrator()
        .read::<T>(id)
        .expect("entity present")
        .version;
    engine
        .submit(Command::targeting(id, version, action))
        .await
        .expect("command applies")
}

pub fn open_task_for<S>(engine: &StayEngine<S>, room_id: &EntityId) -> Option<HousekeepingTask>
where
    S: EntityStore + 'static,
{
    engine
        .store()
        .scan(EntityKind::HousekeepingTask)
        .expect("scan tasks")
        .into_iter()
        .filter_map(|record| HousekeepingTask::from_entity(record.entity))
        .find(|task| &task.room_id == room_id && task.is_open())
}

pub fn booking<S>(engine: &StayEngine<S>, id: &EntityId) -> Booking
where
    S: EntityStore + 'static,
{
    read::<S, Booking>(engine, id)
}
