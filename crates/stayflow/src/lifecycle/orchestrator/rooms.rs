use super::error::OrchestratorError;
use super::tx::Tx;
use crate::lifecycle::domain::{EntityId, EntityRef, Room, RoomCondition, RoomKind, StoredEntity};

pub(super) fn register(
    tx: &mut Tx<'_>,
    id: EntityId,
    room_number: String,
    name: String,
    kind: RoomKind,
    capacity: u8,
) -> Result<EntityRef, OrchestratorError> {
    let room_number = room_number.trim().to_string();
    if room_number.is_empty() {
        return Err(OrchestratorError::invalid("a room needs a room number"));
    }
    if capacity == 0 {
        return Err(OrchestratorError::invalid("a room must sleep at least one guest"));
    }
    if tx.find::<Room>(&id)?.is_some() {
        return Err(OrchestratorError::invalid(format!("room {id} already exists")));
    }
    if let Some(existing) = tx
        .scan::<Room>()?
        .into_iter()
        .find(|room| room.room_number.eq_ignore_ascii_case(&room_number))
    {
        return Err(OrchestratorError::invalid(format!(
            "room number {room_number} is already used by {}",
            existing.id
        )));
    }

    let room = Room {
        id,
        room_number,
        name,
        kind,
        capacity,
        condition: RoomCondition::Ready,
        registered_at: tx.now(),
    };
    let entity = room.entity_ref();
    tx.put(room.clone());
    tx.created(&room);
    Ok(entity)
}
