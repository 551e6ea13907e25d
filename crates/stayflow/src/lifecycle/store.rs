use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Entity, EntityId, EntityKind, EntityRef, Version};
use super::events::{DomainEvent, EventId, EventKind};

/// A stored entity and its optimistic-concurrency version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub version: Version,
    pub entity: Entity,
}

/// What the writer believes the stored version to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Absent,
    At(Version),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub entity: Entity,
    pub expected: Expectation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub entity: EntityRef,
    pub kind: EventKind,
}

/// Writes and events applied together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub at: DateTime<Utc>,
    pub writes: Vec<Write>,
    pub events: Vec<PendingEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub records: Vec<Record>,
    pub events: Vec<DomainEvent>,
}

/// Storage abstraction shared by the orchestrator, access controller, and scheduler.
pub trait EntityStore: Send + Sync {
    fn load(&self, entity: &EntityRef) -> Result<Option<Record>, StoreError>;
    fn scan(&self, kind: EntityKind) -> Result<Vec<Record>, StoreError>;
    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError>;
    fn events_after(
        &self,
        after: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<DomainEvent>, StoreError>;
    fn events_for(&self, entity: &EntityRef) -> Result<Vec<DomainEvent>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} changed underneath the writer (expected {expected:?}, found {actual:?})")]
    Conflict {
        entity: EntityRef,
        expected: Option<Version>,
        actual: Option<Version>,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store persistence failed: {0}")]
    Persistence(String),
}

#[derive(Debug, Default, Clone)]
struct StoreState {
    records: BTreeMap<EntityKind, BTreeMap<EntityId, Record>>,
    events: Vec<DomainEvent>,
}

impl StoreState {
    fn load(&self, entity: &EntityRef) -> Option<Record> {
        self.records
            .get(&entity.kind)
            .and_then(|records| records.get(&entity.id))
            .cloned()
    }

    fn scan(&self, kind: EntityKind) -> Vec<Record> {
        self.records
            .get(&kind)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    fn events_after(&self, after: Option<EventId>, limit: usize) -> Vec<DomainEvent> {
        let start = after.map(|id| id.0 as usize).unwrap_or(0);
        self.events.iter().skip(start).take(limit).cloned().collect()
    }

    fn events_for(&self, entity: &EntityRef) -> Vec<DomainEvent> {
        self.events
            .iter()
            .filter(|event| &event.entity == entity)
            .cloned()
            .collect()
    }

    fn check(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        for write in &changes.writes {
            let entity = write.entity.entity_ref();
            let actual = self.load(&entity).map(|record| record.version);
            let matches = match write.expected {
                Expectation::Absent => actual.is_none(),
                Expectation::At(version) => actual == Some(version),
            };
            if !matches {
                return Err(StoreError::Conflict {
                    entity,
                    expected: match write.expected {
                        Expectation::Absent => None,
                        Expectation::At(version) => Some(version),
                    },
                    actual,
                });
            }
        }
        Ok(())
    }

    fn apply(&mut self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        self.check(&changes)?;

        let mut records = Vec::with_capacity(changes.writes.len());
        for write in changes.writes {
            let version = match write.expected {
                Expectation::Absent => 1,
                Expectation::At(version) => version + 1,
            };
            let record = Record {
                version,
                entity: write.entity,
            };
            self.records
                .entry(record.entity.kind())
                .or_default()
                .insert(record.entity.id().clone(), record.clone());
            records.push(record);
        }

        let mut events = Vec::with_capacity(changes.events.len());
        for pending in changes.events {
            let event = DomainEvent {
                id: EventId(self.events.len() as u64 + 1),
                entity: pending.entity,
                occurred_at: changes.at,
                kind: pending.kind,
            };
            self.events.push(event.clone());
            events.push(event);
        }

        Ok(CommitReceipt { records, events })
    }
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    state: Mutex<StoreState>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

impl EntityStore for InMemoryEntityStore {
    fn load(&self, entity: &EntityRef) -> Result<Option<Record>, StoreError> {
        Ok(self.state()?.load(entity))
    }

    fn scan(&self, kind: EntityKind) -> Result<Vec<Record>, StoreError> {
        Ok(self.state()?.scan(kind))
    }

    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        self.state()?.apply(changes)
    }

    fn events_after(
        &self,
        after: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<DomainEvent>, StoreError> {
        Ok(self.state()?.events_after(after, limit))
    }

    fn events_for(&self, entity: &EntityRef) -> Result<Vec<DomainEvent>, StoreError> {
        Ok(self.state()?.events_for(entity))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    records: Vec<Record>,
    events: Vec<DomainEvent>,
}

/// Store persisted as one JSON document, rewritten atomically on every commit.
///
/// Each commit serializes every record and the whole event log, then writes and fsyncs a temp
/// file before renaming it over the document. Commit cost therefore grows with the log and the
/// write blocks the calling thread; this suits a single property's history, not an unbounded
/// archive.
#[derive(Debug)]
pub struct FileEntityStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl FileEntityStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|err| StoreError::Persistence(format!("{}: {err}", path.display())))?;
            let snapshot: Snapshot = serde_json::from_str(&raw)
                .map_err(|err| StoreError::Persistence(format!("{}: {err}", path.display())))?;
            let mut state = StoreState {
                records: BTreeMap::new(),
                events: snapshot.events,
            };
            for record in snapshot.records {
                state
                    .records
                    .entry(record.entity.kind())
                    .or_default()
                    .insert(record.entity.id().clone(), record);
            }
            state
        } else {
            StoreState::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            records: state
                .records
                .values()
                .flat_map(|records| records.values().cloned())
                .collect(),
            events: state.events.clone(),
        };
        let body = serde_json::to_vec(&snapshot)
            .map_err(|err| StoreError::Persistence(err.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|err| StoreError::Persistence(err.to_string()))?;
            }
        }
        let persistence = |err: std::io::Error| StoreError::Persistence(err.to_string());
        let mut file = File::create(&tmp).map_err(persistence)?;
        file.write_all(&body).map_err(persistence)?;
        file.sync_all().map_err(persistence)?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(persistence)?;
        self.sync_parent()
    }

    #[cfg(unix)]
    fn sync_parent(&self) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(|err| StoreError::Persistence(format!("{}: {err}", parent.display())))
    }

    #[cfg(not(unix))]
    fn sync_parent(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

impl EntityStore for FileEntityStore {
    fn load(&self, entity: &EntityRef) -> Result<Option<Record>, StoreError> {
        Ok(self.state()?.load(entity))
    }

    fn scan(&self, kind: EntityKind) -> Result<Vec<Record>, StoreError> {
        Ok(self.state()?.scan(kind))
    }

    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        let mut state = self.state()?;
        let mut next = state.clone();
        let receipt = next.apply(changes)?;
        self.persist(&next)?;
        *state = next;
        Ok(receipt)
    }

    fn events_after(
        &self,
        after: Option<EventId>,
        limit: usize,
    ) -> Result<Vec<DomainEvent>, StoreError> {
        Ok(self.state()?.events_after(after, limit))
    }

    fn events_for(&self, entity: &EntityRef) -> Result<Vec<DomainEvent>, StoreError> {
        Ok(self.state()?.events_for(entity))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::lifecycle::domain::{Room, RoomCondition, RoomKind, StoredEntity};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
            .single()
            .expect("valid")
    }

    fn room(id: &str, condition: RoomCondition) -> Room {
        Room {
            id: EntityId::new(id),
            room_number: id.to_uppercase(),
            name: "Harbour Suite".to_string(),
            kind: RoomKind::Suite,
            capacity: 4,
            condition,
            registered_at: at(),
        }
    }

    fn insert(store: &dyn EntityStore, value: Room) -> CommitReceipt {
        store
            .commit(ChangeSet {
                at: at(),
                writes: vec![Write {
                    entity: value.clone().into_entity(),
                    expected: Expectation::Absent,
                }],
                events: vec![PendingEvent {
                    entity: value.entity_ref(),
                    kind: EventKind::Created {
                        snapshot: value.into_entity(),
                    },
                }],
            })
            .expect("insert commits")
    }

    #[test]
    fn stale_expectation_rejects_the_whole_change_set() {
        let store = InMemoryEntityStore::new();
        insert(&store, room("room-1", RoomCondition::Ready));

        let result = store.commit(ChangeSet {
            at: at(),
            writes: vec![
                Write {
                    entity: room("room-2", RoomCondition::Ready).into_entity(),
                    expected: Expectation::Absent,
                },
                Write {
                    entity: room("room-1", RoomCondition::Dirty).into_entity(),
                    expected: Expectation::At(7),
                },
            ],
            events: Vec::new(),
        });

        match result {
            Err(StoreError::Conflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Some(7));
                assert_eq!(actual, Some(1));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        let room_two = EntityRef::new(EntityKind::Room, &EntityId::new("room-2"));
        assert!(store.load(&room_two).expect("load").is_none());
        assert_eq!(store.events_after(None, 10).expect("events").len(), 1);
    }

    #[test]
    fn updates_bump_versions_and_sequence_events() {
        let store = InMemoryEntityStore::new();
        let receipt = insert(&store, room("room-1", RoomCondition::Ready));
        assert_eq!(receipt.records[0].version, 1);

        let receipt = store
            .commit(ChangeSet {
                at: at(),
                writes: vec![Write {
                    entity: room("room-1", RoomCondition::Dirty).into_entity(),
                    expected: Expectation::At(1),
                }],
                events: vec![PendingEvent {
                    entity: EntityRef::new(EntityKind::Room, &EntityId::new("room-1")),
                    kind: EventKind::RoomConditionChanged {
                        from: RoomCondition::Ready,
                        to: RoomCondition::Dirty,
                    },
                }],
            })
            .expect("update commits");

        assert_eq!(receipt.records[0].version, 2);
        assert_eq!(receipt.events[0].id, EventId(2));
        let after_first = store.events_after(Some(EventId(1)), 10).expect("events");
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].kind.name(), "room_condition_changed");
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stayflow.json");

        {
            let store = FileEntityStore::open(&path).expect("open");
            insert(&store, room("room-9", RoomCondition::Ready));
        }

        let reopened = FileEntityStore::open(&path).expect("reopen");
        let entity = EntityRef::new(EntityKind::Room, &EntityId::new("room-9"));
        let record = reopened.load(&entity).expect("load").expect("present");
        assert_eq!(record.version, 1);
        assert_eq!(reopened.events_for(&entity).expect("events").len(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn failed_write_keeps_the_last_committed_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stayflow.json");
        let store = FileEntityStore::open(&path).expect("open");
        insert(&store, room("room-3", RoomCondition::Ready));

        fs::create_dir(path.with_extension("json.tmp")).expect("block the temp file");
        let result = store.commit(ChangeSet {
            at: at(),
            writes: vec![Write {
                entity: room("room-4", RoomCondition::Ready).into_entity(),
                expected: Expectation::Absent,
            }],
            events: Vec::new(),
        });
        assert!(matches!(result, Err(StoreError::Persistence(_))));

        let missing = EntityRef::new(EntityKind::Room, &EntityId::new("room-4"));
        assert!(store.load(&missing).expect("load").is_none());
        let reopened = FileEntityStore::open(&path).expect("reopen");
        assert!(reopened.load(&missing).expect("load").is_none());
        let kept = EntityRef::new(EntityKind::Room, &EntityId::new("room-3"));
        assert!(reopened.load(&kept).expect("load").is_some());
    }
}
