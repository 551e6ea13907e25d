use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use super::error::OrchestratorError;
use crate::lifecycle::domain::{Entity, EntityId, EntityRef, Labelled, StoredEntity, Version};
use crate::lifecycle::events::EventKind;
use crate::lifecycle::machines::{StateMachine, Transition};
use crate::lifecycle::store::{ChangeSet, EntityStore, Expectation, PendingEvent, Write};

struct Staged {
    expected: Expectation,
    entity: Entity,
}

/// Working set of one command: reads remember their version, writes and events are staged
/// until the whole set is committed.
pub(crate) struct Tx<'a> {
    store: &'a dyn EntityStore,
    now: DateTime<Utc>,
    seen: HashMap<EntityRef, Version>,
    staged: BTreeMap<EntityRef, Staged>,
    events: Vec<PendingEvent>,
}

impl<'a> Tx<'a> {
    pub(crate) fn new(store: &'a dyn EntityStore, now: DateTime<Utc>) -> Self {
        Self {
            store,
            now,
            seen: HashMap::new(),
            staged: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn fetch(&mut self, entity: &EntityRef) -> Result<Option<Entity>, OrchestratorError> {
        if let Some(staged) = self.staged.get(entity) {
            return Ok(Some(staged.entity.clone()));
        }
        match self.store.load(entity)? {
            Some(record) => {
                self.seen.insert(entity.clone(), record.version);
                Ok(Some(record.entity))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn find<T: StoredEntity>(
        &mut self,
        id: &EntityId,
    ) -> Result<Option<T>, OrchestratorError> {
        let entity = EntityRef::new(T::KIND, id);
        Ok(self.fetch(&entity)?.and_then(T::from_entity))
    }

    pub(crate) fn load<T: StoredEntity>(&mut self, id: &EntityId) -> Result<T, OrchestratorError> {
        self.find(id)?
            .ok_or_else(|| OrchestratorError::NotFound(EntityRef::new(T::KIND, id)))
    }

    /// Loads the command target and checks the caller's version token against the store.
    pub(crate) fn load_primary<T: StoredEntity>(
        &mut self,
        id: &EntityId,
        expected: Version,
    ) -> Result<T, OrchestratorError> {
        let entity = EntityRef::new(T::KIND, id);
        let value = self.load::<T>(id)?;
        let actual = self.seen.get(&entity).copied();
        if actual != Some(expected) {
            return Err(OrchestratorError::ConcurrentModification {
                entity,
                expected: Some(expected),
                actual,
            });
        }
        Ok(value)
    }

    /// Every stored entity of a kind, with this transaction's staged writes laid over it.
    pub(crate) fn scan<T: StoredEntity>(&mut self) -> Result<Vec<T>, OrchestratorError> {
        let mut merged: BTreeMap<EntityId, Entity> = BTreeMap::new();
        for record in self.store.scan(T::KIND)? {
            let entity = record.entity.entity_ref();
            self.seen.entry(entity.clone()).or_insert(record.version);
            merged.insert(entity.id, record.entity);
        }
        for (entity, staged) in &self.staged {
            if entity.kind == T::KIND {
                merged.insert(entity.id.clone(), staged.entity.clone());
            }
        }
        Ok(merged.into_values().filter_map(T::from_entity).collect())
    }

    /// Stages a write. Entities never read in this transaction are treated as new.
    pub(crate) fn put<T: StoredEntity>(&mut self, value: T) {
        let entity = value.entity_ref();
        let expected = match self.staged.get(&entity) {
            Some(staged) => staged.expected,
            None => match self.seen.get(&entity) {
                Some(version) => Expectation::At(*version),
                None => Expectation::Absent,
            },
        };
        self.staged.insert(
            entity,
            Staged {
                expected,
                entity: value.into_entity(),
            },
        );
    }

    /// Rewrites an entity unchanged so its version moves, making concurrent writers that
    /// depend on it conflict.
    pub(crate) fn touch(&mut self, entity: &EntityRef) -> Result<(), OrchestratorError> {
        if self.staged.contains_key(entity) {
            return Ok(());
        }
        let current = self
            .fetch(entity)?
            .ok_or_else(|| OrchestratorError::NotFound(entity.clone()))?;
        let expected = self
            .seen
            .get(entity)
            .map(|version| Expectation::At(*version))
            .unwrap_or(Expectation::Absent);
        self.staged.insert(
            entity.clone(),
            Staged {
                expected,
                entity: current,
            },
        );
        Ok(())
    }

    pub(crate) fn emit(&mut self, entity: EntityRef, kind: EventKind) {
        self.events.push(PendingEvent { entity, kind });
    }

    pub(crate) fn created<T: StoredEntity>(&mut self, value: &T) {
        self.emit(
            value.entity_ref(),
            EventKind::Created {
                snapshot: value.clone().into_entity(),
            },
        );
    }

    /// Runs a table transition and logs it as a status change of `entity`.
    pub(crate) fn transition<M: StateMachine>(
        &mut self,
        entity: &EntityRef,
        from: M::State,
        on: M::Event,
    ) -> Result<Transition<M::State>, OrchestratorError> {
        let transition = M::transition(from, on)?;
        self.emit(
            entity.clone(),
            EventKind::StatusChanged {
                machine: M::KIND,
                from: transition.from.label().to_string(),
                to: transition.to.label().to_string(),
            },
        );
        Ok(transition)
    }

    pub(crate) fn into_change_set(self) -> ChangeSet {
        ChangeSet {
            at: self.now,
            writes: self
                .staged
                .into_values()
                .map(|staged| Write {
                    entity: staged.entity,
                    expected: staged.expected,
                })
                .collect(),
            events: self.events,
        }
    }
}
