use super::effects::{self, Origin};
use super::error::OrchestratorError;
use super::tx::Tx;
use crate::lifecycle::domain::{
    AccessWindow, EntityId, EntityRef, JobStatus, MaintenanceJob, MaintenanceTicket,
    MaterialItem, Money, Quote, Room, StoredEntity, TicketPriority, TicketStatus, Version,
};
use crate::lifecycle::events::EventKind;
use crate::lifecycle::machines::{
    InvalidTransition, JobEvent, JobMachine, MachineKind, TicketEvent, TicketMachine,
};

pub(super) struct NewTicket {
    pub room_id: EntityId,
    pub reported_by: String,
    pub summary: String,
    pub description: String,
    pub priority: TicketPriority,
}

pub(super) fn submit_ticket(
    tx: &mut Tx<'_>,
    id: Option<EntityId>,
    request: NewTicket,
) -> Result<EntityRef, OrchestratorError> {
    if request.summary.trim().is_empty() {
        return Err(OrchestratorError::invalid("a ticket needs a summary"));
    }
    let room: Room = tx.load(&request.room_id)?;
    let id = id.unwrap_or_else(EntityId::generate);
    if tx.find::<MaintenanceTicket>(&id)?.is_some() {
        return Err(OrchestratorError::invalid(format!("ticket {id} already exists")));
    }

    let ticket = MaintenanceTicket {
        id,
        room_id: room.id.clone(),
        reported_by: request.reported_by,
        summary: request.summary,
        description: request.description,
        priority: request.priority,
        status: TicketStatus::New,
        quote: None,
        job_id: None,
        created_at: tx.now(),
    };
    let entity = ticket.entity_ref();
    tx.put(ticket.clone());
    tx.created(&ticket);

    if ticket.priority == TicketPriority::Urgent {
        tx.emit(
            entity.clone(),
            EventKind::TicketEscalated {
                room_id: room.id,
                ticket_id: ticket.id.clone(),
                reason: format!("urgent ticket: {}", ticket.summary),
            },
        );
    }
    Ok(entity)
}

pub(super) fn submit_quote(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
    labor_cost: Money,
    materials: Vec<MaterialItem>,
    notes: Option<String>,
) -> Result<EntityRef, OrchestratorError> {
    if labor_cost.cents() < 0 || materials.iter().any(|item| item.unit_price.cents() < 0) {
        return Err(OrchestratorError::invalid("quote amounts cannot be negative"));
    }
    let mut ticket: MaintenanceTicket = tx.load_primary(id, expected)?;
    let entity = ticket.entity_ref();
    let transition =
        tx.transition::<TicketMachine>(&entity, ticket.status, TicketEvent::QuoteSubmitted)?;
    let quote = Quote {
        labor_cost,
        materials,
        notes,
        submitted_at: tx.now(),
    };
    tx.emit(
        entity.clone(),
        EventKind::QuoteSubmitted {
            quote: quote.clone(),
        },
    );
    ticket.status = transition.to;
    ticket.quote = Some(quote);
    tx.put(ticket);
    Ok(entity)
}

pub(super) fn approve_ticket(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
    tasks: &[String],
    access_window: AccessWindow,
) -> Result<EntityRef, OrchestratorError> {
    if access_window.starts_at >= access_window.ends_at {
        return Err(OrchestratorError::invalid(
            "access window must start before it ends",
        ));
    }
    if tasks.is_empty() || tasks.iter().any(|task| task.trim().is_empty()) {
        return Err(OrchestratorError::invalid(
            "an approved job needs at least one described task",
        ));
    }
    let mut ticket: MaintenanceTicket = tx.load_primary(id, expected)?;
    let entity = ticket.entity_ref();
    let transition =
        tx.transition::<TicketMachine>(&entity, ticket.status, TicketEvent::Approved)?;
    ticket.status = transition.to;
    tx.put(ticket.clone());
    effects::apply(
        tx,
        transition.effects,
        &Origin::TicketApproval {
            ticket: &ticket,
            tasks,
            window: access_window,
        },
    )?;
    Ok(entity)
}

pub(super) fn start_job(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
) -> Result<EntityRef, OrchestratorError> {
    let mut job: MaintenanceJob = tx.load_primary(id, expected)?;
    let entity = job.entity_ref();
    let transition = tx.transition::<JobMachine>(&entity, job.status, JobEvent::Start)?;
    job.status = transition.to;
    job.started_at = Some(tx.now());
    tx.put(job.clone());
    effects::apply(tx, transition.effects, &Origin::Job(&job))?;
    Ok(entity)
}

/// Ticks one job task; the last one completes the job and its ticket.
pub(super) fn complete_task(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
    task_id: &str,
    notes: Option<String>,
) -> Result<EntityRef, OrchestratorError> {
    let mut job: MaintenanceJob = tx.load_primary(id, expected)?;
    let entity = job.entity_ref();
    if job.status != JobStatus::InProgress {
        return Err(InvalidTransition::new(
            MachineKind::MaintenanceJob,
            job.status.label(),
            "complete_job_task",
        )
        .into());
    }

    let task = job
        .tasks
        .iter_mut()
        .find(|task| task.id == task_id)
        .ok_or_else(|| {
            OrchestratorError::invalid(format!("job {} has no task `{task_id}`", job.id))
        })?;
    if task.completed {
        return Err(OrchestratorError::invalid(format!(
            "task `{task_id}` is already done"
        )));
    }
    task.completed = true;
    task.notes = notes.clone();
    tx.emit(
        entity.clone(),
        EventKind::JobTaskCompleted {
            task_id: task_id.to_string(),
            notes,
        },
    );

    if job.all_tasks_checked() {
        let transition =
            tx.transition::<JobMachine>(&entity, job.status, JobEvent::AllTasksChecked)?;
        job.status = transition.to;
        job.completed_at = Some(tx.now());
        tx.put(job.clone());
        effects::apply(tx, transition.effects, &Origin::Job(&job))?;
    } else {
        tx.put(job);
    }
    Ok(entity)
}
