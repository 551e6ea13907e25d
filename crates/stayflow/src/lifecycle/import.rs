//! Seeds the engine from a reservation export.
//!
//! Each row names a room and one stay in it. Rooms are registered once per room number and
//! every row becomes a `CreateBooking` command, so the import goes through the same checks as
//! live traffic.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use super::domain::{EntityId, Money, Room, RoomKind};
use super::orchestrator::{Action, Command, Orchestrator, OrchestratorError};
use super::store::EntityStore;

const DEFAULT_CHECK_IN: (u32, u32) = (15, 0);
const DEFAULT_CHECK_OUT: (u32, u32) = (10, 0);
const DEFAULT_CAPACITY: u8 = 2;

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidRow { line: usize, reason: String },
    Engine(OrchestratorError),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "failed to read reservation export: {}", err),
            ImportError::Csv(err) => write!(f, "invalid reservation CSV data: {}", err),
            ImportError::InvalidRow { line, reason } => {
                write!(f, "reservation row {} is invalid: {}", line, reason)
            }
            ImportError::Engine(err) => write!(f, "engine refused the import: {}", err),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::Csv(err) => Some(err),
            ImportError::InvalidRow { .. } => None,
            ImportError::Engine(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<OrchestratorError> for ImportError {
    fn from(err: OrchestratorError) -> Self {
        Self::Engine(err)
    }
}

/// Commands derived from an export, rooms first.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationPlan {
    pub rooms: Vec<Command>,
    pub bookings: Vec<Command>,
}

/// What happened when a plan was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rooms_registered: usize,
    pub rooms_existing: usize,
    pub bookings_created: usize,
    /// Rows the orchestrator turned down, with its reason.
    pub rejected: Vec<String>,
}

pub fn room_id_for(room_number: &str) -> EntityId {
    EntityId::new(format!("room-{}", room_number.trim()))
}

pub fn parse_reservations<R: Read>(reader: R) -> Result<ReservationPlan, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut rooms: BTreeMap<String, Command> = BTreeMap::new();
    let mut bookings = Vec::new();

    for (index, record) in csv_reader.deserialize::<ReservationRow>().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let row = record?;
        let invalid = |reason: String| ImportError::InvalidRow { line, reason };

        let room_id = room_id_for(&row.room);
        rooms.entry(row.room.clone()).or_insert_with(|| {
            Command::create_with_id(
                room_id.clone(),
                Action::RegisterRoom {
                    room_number: row.room.clone(),
                    name: row
                        .room_name
                        .clone()
                        .unwrap_or_else(|| format!("Room {}", row.room)),
                    kind: RoomKind::Room,
                    capacity: DEFAULT_CAPACITY,
                },
            )
        });

        let check_in = parse_instant(&row.check_in, DEFAULT_CHECK_IN)
            .ok_or_else(|| invalid(format!("unreadable check-in '{}'", row.check_in)))?;
        let check_out = parse_instant(&row.check_out, DEFAULT_CHECK_OUT)
            .ok_or_else(|| invalid(format!("unreadable check-out '{}'", row.check_out)))?;
        let nightly_rate = Money::parse(&row.nightly_rate)
            .ok_or_else(|| invalid(format!("unreadable nightly rate '{}'", row.nightly_rate)))?;
        let cleaning_fee = optional_money(row.cleaning_fee.as_deref())
            .ok_or_else(|| invalid("unreadable cleaning fee".to_string()))?;
        let bond_amount = optional_money(row.bond.as_deref())
            .ok_or_else(|| invalid("unreadable bond".to_string()))?;

        bookings.push(Command::create(Action::CreateBooking {
            guest_id: EntityId::new(row.guest),
            room_id,
            check_in,
            check_out,
            nightly_rate,
            cleaning_fee,
            bond_amount,
            early_check_in_hours: 0,
        }));
    }

    Ok(ReservationPlan {
        rooms: rooms.into_values().collect(),
        bookings,
    })
}

/// Applies a plan. Business rejections are collected, infrastructure failures abort.
pub async fn seed<S>(
    orchestrator: &Orchestrator<S>,
    plan: ReservationPlan,
) -> Result<ImportSummary, ImportError>
where
    S: EntityStore + 'static,
{
    let mut summary = ImportSummary::default();

    for command in plan.rooms {
        if let Some(id) = &command.entity_id {
            match orchestrator.read::<Room>(id) {
                Ok(_) => {
                    summary.rooms_existing += 1;
                    continue;
                }
                Err(OrchestratorError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        orchestrator.apply(command).await?;
        summary.rooms_registered += 1;
    }

    for command in plan.bookings {
        match orchestrator.apply(command).await {
            Ok(_) => summary.bookings_created += 1,
            Err(OrchestratorError::Store(err)) => {
                return Err(OrchestratorError::Store(err).into())
            }
            Err(err) => {
                warn!(error = %err, "reservation skipped");
                summary.rejected.push(err.to_string());
            }
        }
    }

    info!(
        rooms = summary.rooms_registered,
        bookings = summary.bookings_created,
        rejected = summary.rejected.len(),
        "reservation import applied"
    );
    Ok(summary)
}

#[derive(Debug, Deserialize)]
struct ReservationRow {
    #[serde(rename = "Room")]
    room: String,
    #[serde(
        rename = "Room Name",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    room_name: Option<String>,
    #[serde(rename = "Guest")]
    guest: String,
    #[serde(rename = "Check In")]
    check_in: String,
    #[serde(rename = "Check Out")]
    check_out: String,
    #[serde(rename = "Nightly Rate")]
    nightly_rate: String,
    #[serde(
        rename = "Cleaning Fee",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    cleaning_fee: Option<String>,
    #[serde(rename = "Bond", default, deserialize_with = "empty_string_as_none")]
    bond: Option<String>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn optional_money(value: Option<&str>) -> Option<Money> {
    match value {
        None => Some(Money::ZERO),
        Some(raw) => Money::parse(raw),
    }
}

/// RFC 3339 instants pass through; bare dates take the house check-in or check-out time.
fn parse_instant(value: &str, (hour, minute): (u32, u32)) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(instant.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(date.and_time(time).and_utc())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::lifecycle::domain::{Booking, EntityKind, StoredEntity};
    use crate::lifecycle::events::EventBus;
    use crate::lifecycle::scheduler::FixedClock;
    use crate::lifecycle::store::InMemoryEntityStore;

    const EXPORT: &str = "\
Room,Room Name,Guest,Check In,Check Out,Nightly Rate,Cleaning Fee,Bond
101,Harbour Suite,guest-1,2025-03-10,2025-03-13,$100,$40,$200
101,Harbour Suite,guest-2,2025-03-12,2025-03-14,100,,
202,,guest-3,2025-03-11T14:00:00Z,2025-03-12T11:00:00Z,85.50,,
";

    #[test]
    fn parses_rooms_once_and_defaults_house_times() {
        let plan = parse_reservations(EXPORT.as_bytes()).expect("export parses");
        assert_eq!(plan.rooms.len(), 2);
        assert_eq!(plan.bookings.len(), 3);

        match &plan.rooms[1].action {
            Action::RegisterRoom {
                room_number, name, ..
            } => {
                assert_eq!(room_number, "202");
                assert_eq!(name, "Room 202");
            }
            other => panic!("expected room registration, got {other:?}"),
        }

        match &plan.bookings[0].action {
            Action::CreateBooking {
                room_id,
                check_in,
                check_out,
                cleaning_fee,
                bond_amount,
                ..
            } => {
                assert_eq!(room_id, &EntityId::new("room-101"));
                assert_eq!(
                    *check_in,
                    Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0)
                        .single()
                        .expect("valid timestamp")
                );
                assert_eq!(
                    *check_out,
                    Utc.with_ymd_and_hms(2025, 3, 13, 10, 0, 0)
                        .single()
                        .expect("valid timestamp")
                );
                assert_eq!(*cleaning_fee, Money::from_dollars(40));
                assert_eq!(*bond_amount, Money::from_dollars(200));
            }
            other => panic!("expected booking, got {other:?}"),
        }

        match &plan.bookings[2].action {
            Action::CreateBooking {
                nightly_rate,
                bond_amount,
                ..
            } => {
                assert_eq!(*nightly_rate, Money::from_cents(8_550));
                assert_eq!(*bond_amount, Money::ZERO);
            }
            other => panic!("expected booking, got {other:?}"),
        }
    }

    #[test]
    fn reports_the_offending_line() {
        let export = "\
Room,Room Name,Guest,Check In,Check Out,Nightly Rate,Cleaning Fee,Bond
7,,guest-1,2025-03-10,next tuesday,100,,
";
        match parse_reservations(export.as_bytes()) {
            Err(ImportError::InvalidRow { line, reason }) => {
                assert_eq!(line, 2);
                assert!(reason.contains("check-out"));
            }
            other => panic!("expected invalid row, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn seeding_collects_rejected_overlaps() {
        let store = Arc::new(InMemoryEntityStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
                .single()
                .expect("valid timestamp"),
        ));
        let orchestrator = Orchestrator::new(Arc::clone(&store), Arc::new(EventBus::new()), clock);

        let plan = parse_reservations(EXPORT.as_bytes()).expect("export parses");
        let summary = seed(&orchestrator, plan.clone()).await.expect("seed runs");
        assert_eq!(summary.rooms_registered, 2);
        assert_eq!(summary.bookings_created, 2);
        assert_eq!(summary.rejected.len(), 1);

        let again = seed(&orchestrator, plan).await.expect("seed runs again");
        assert_eq!(again.rooms_existing, 2);
        assert_eq!(again.bookings_created, 0);

        let bookings: Vec<Booking> = store
            .scan(EntityKind::Booking)
            .expect("scan")
            .into_iter()
            .filter_map(|record| Booking::from_entity(record.entity))
            .collect();
        assert_eq!(bookings.len(), 2);
    }
}
