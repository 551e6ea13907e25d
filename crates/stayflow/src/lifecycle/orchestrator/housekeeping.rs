use super::effects::{self, Origin};
use super::error::OrchestratorError;
use super::tx::Tx;
use crate::lifecycle::domain::{
    CleaningStatus, EntityId, EntityRef, HousekeepingTask, StoredEntity, Version,
};
use crate::lifecycle::events::EventKind;
use crate::lifecycle::machines::{CleaningEvent, CleaningMachine, InvalidTransition, MachineKind};

pub(super) fn start(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
) -> Result<EntityRef, OrchestratorError> {
    let mut task: HousekeepingTask = tx.load_primary(id, expected)?;
    let entity = task.entity_ref();
    let transition = tx.transition::<CleaningMachine>(&entity, task.status, CleaningEvent::Start)?;
    task.status = transition.to;
    tx.put(task.clone());
    effects::apply(tx, transition.effects, &Origin::Task(&task))?;
    Ok(entity)
}

/// Ticks one checklist item; the last one moves the task to inspection.
pub(super) fn complete_item(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
    item_id: &str,
) -> Result<EntityRef, OrchestratorError> {
    let mut task: HousekeepingTask = tx.load_primary(id, expected)?;
    let entity = task.entity_ref();
    if task.status != CleaningStatus::InProgress {
        return Err(InvalidTransition::new(
            MachineKind::HousekeepingTask,
            task.status.label(),
            "complete_checklist_item",
        )
        .into());
    }

    let item = task
        .checklist
        .iter_mut()
        .find(|item| item.id == item_id)
        .ok_or_else(|| {
            OrchestratorError::invalid(format!("task {} has no checklist item `{item_id}`", task.id))
        })?;
    if item.completed {
        return Err(OrchestratorError::invalid(format!(
            "checklist item `{item_id}` is already done"
        )));
    }
    item.completed = true;
    tx.emit(
        entity.clone(),
        EventKind::ChecklistItemCompleted {
            item_id: item_id.to_string(),
        },
    );

    if task.all_checked() {
        let transition = tx.transition::<CleaningMachine>(
            &entity,
            task.status,
            CleaningEvent::AllItemsChecked,
        )?;
        task.status = transition.to;
        tx.put(task.clone());
        effects::apply(tx, transition.effects, &Origin::Task(&task))?;
    } else {
        tx.put(task);
    }
    Ok(entity)
}

pub(super) fn confirm(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
) -> Result<EntityRef, OrchestratorError> {
    let mut task: HousekeepingTask = tx.load_primary(id, expected)?;
    let entity = task.entity_ref();
    let transition =
        tx.transition::<CleaningMachine>(&entity, task.status, CleaningEvent::Confirm)?;
    task.status = transition.to;
    task.completed_at = Some(tx.now());
    tx.put(task.clone());
    effects::apply(tx, transition.effects, &Origin::Task(&task))?;
    Ok(entity)
}
