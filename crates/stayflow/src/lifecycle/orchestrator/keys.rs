use super::effects::{self, Origin};
use super::error::OrchestratorError;
use super::tx::Tx;
use crate::lifecycle::domain::{
    Booking, BookingStatus, DigitalKey, EntityId, EntityRef, JobStatus, KeyHolder,
    MaintenanceJob, StoredEntity, Version,
};
use crate::lifecycle::machines::{KeyEvent, KeyMachine};

/// Whether the party a key was issued to may currently hold an open key.
fn holder_is_active(tx: &mut Tx<'_>, key: &DigitalKey) -> Result<bool, OrchestratorError> {
    match &key.holder {
        KeyHolder::Guest { booking_id } => {
            let booking: Booking = tx.load(booking_id)?;
            Ok(matches!(
                booking.status,
                BookingStatus::Upcoming | BookingStatus::Current
            ))
        }
        KeyHolder::Maintenance { job_id } => {
            let job: MaintenanceJob = tx.load(job_id)?;
            Ok(job.status == JobStatus::InProgress)
        }
    }
}

pub(super) fn open_window(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
) -> Result<EntityRef, OrchestratorError> {
    let mut key: DigitalKey = tx.load_primary(id, expected)?;
    let entity = key.entity_ref();
    if !key.window_contains(tx.now()) {
        return Err(OrchestratorError::invalid(format!(
            "key {} is valid from {} until {}",
            key.id, key.activates_at, key.expires_at
        )));
    }
    if !holder_is_active(tx, &key)? {
        return Err(OrchestratorError::invalid(format!(
            "holder of key {} is not active",
            key.id
        )));
    }
    let transition = tx.transition::<KeyMachine>(&entity, key.status, KeyEvent::WindowOpened)?;
    key.status = transition.to;
    tx.put(key.clone());
    effects::apply(tx, transition.effects, &Origin::Key { key: &key, reason: "" })?;
    Ok(entity)
}

pub(super) fn close_window(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
) -> Result<EntityRef, OrchestratorError> {
    let mut key: DigitalKey = tx.load_primary(id, expected)?;
    let entity = key.entity_ref();
    if tx.now() < key.expires_at {
        return Err(OrchestratorError::invalid(format!(
            "key {} stays valid until {}",
            key.id, key.expires_at
        )));
    }
    let transition = tx.transition::<KeyMachine>(&entity, key.status, KeyEvent::WindowClosed)?;
    key.status = transition.to;
    tx.put(key);
    Ok(entity)
}

pub(super) fn revoke(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
    reason: &str,
) -> Result<EntityRef, OrchestratorError> {
    let mut key: DigitalKey = tx.load_primary(id, expected)?;
    let entity = key.entity_ref();
    let transition = tx.transition::<KeyMachine>(&entity, key.status, KeyEvent::Revoke)?;
    key.status = transition.to;
    tx.put(key.clone());
    effects::apply(tx, transition.effects, &Origin::Key { key: &key, reason })?;
    Ok(entity)
}
