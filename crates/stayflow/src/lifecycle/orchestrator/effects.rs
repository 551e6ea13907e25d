//! Turns the side-effects declared by the transition tables into staged writes and events.

use chrono::Months;
use tracing::debug;

use super::error::OrchestratorError;
use super::tx::Tx;
use crate::lifecycle::domain::{
    default_checklist, AccessWindow, BondClaim, BondStatus, Booking, Charge, ChargeKind,
    ChargeStatus, CleaningPriority, CleaningStatus, DigitalKey, EntityId, EntityKind, EntityRef, ExtensionUnit,
    HousekeepingTask, JobStatus, JobTask, KeyHolder, KeyStatus, MaintenanceJob,
    MaintenanceTicket, PaymentStatus, Room, RoomCondition, StoredEntity, Subscription,
};
use crate::lifecycle::events::EventKind;
use crate::lifecycle::machines::{
    BondEvent, BondMachine, CleaningEvent, CleaningMachine, KeyEvent, KeyMachine, PaymentEvent,
    PaymentMachine, SideEffect, TicketEvent, TicketMachine,
};

/// The transition that declared the effects, with whatever the effects need from it.
pub(super) enum Origin<'o> {
    Booking(&'o Booking),
    Key {
        key: &'o DigitalKey,
        reason: &'o str,
    },
    Task(&'o HousekeepingTask),
    TicketApproval {
        ticket: &'o MaintenanceTicket,
        tasks: &'o [String],
        window: AccessWindow,
    },
    Job(&'o MaintenanceJob),
    Claim(&'o BondClaim),
    Subscription(&'o Subscription),
}

impl Origin<'_> {
    fn room_id(&self) -> Option<&EntityId> {
        match self {
            Origin::Booking(booking) => Some(&booking.room_id),
            Origin::Key { key, .. } => Some(&key.room_id),
            Origin::Task(task) => Some(&task.room_id),
            Origin::TicketApproval { ticket, .. } => Some(&ticket.room_id),
            Origin::Job(job) => Some(&job.room_id),
            Origin::Subscription(subscription) => Some(&subscription.room_id),
            Origin::Claim(_) => None,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Origin::Booking(_) => "booking",
            Origin::Key { .. } => "digital key",
            Origin::Task(_) => "housekeeping task",
            Origin::TicketApproval { .. } => "ticket approval",
            Origin::Job(_) => "maintenance job",
            Origin::Claim(_) => "bond claim",
            Origin::Subscription(_) => "subscription",
        }
    }
}

pub(super) fn apply(
    tx: &mut Tx<'_>,
    effects: &[SideEffect],
    origin: &Origin<'_>,
) -> Result<(), OrchestratorError> {
    for effect in effects {
        debug!(effect = effect.label(), origin = origin.describe(), "materializing side-effect");
        materialize(tx, *effect, origin)?;
    }
    Ok(())
}

fn materialize(
    tx: &mut Tx<'_>,
    effect: SideEffect,
    origin: &Origin<'_>,
) -> Result<(), OrchestratorError> {
    match (effect, origin) {
        (SideEffect::ActivateGuestKey, Origin::Booking(booking)) => {
            activate_key(tx, &booking.key_id)
        }
        (SideEffect::CloseGuestKey, Origin::Booking(booking)) => close_key(tx, &booking.key_id),
        (SideEffect::RevokeGuestKey, Origin::Booking(booking)) => {
            revoke_key(tx, &booking.key_id, "booking cancelled")
        }
        (SideEffect::ShiftGuestKeyExpiry, Origin::Booking(booking)) => shift_key(tx, booking),
        (SideEffect::OpenTurnoverTask, Origin::Booking(booking)) => {
            let priority = turnover_priority(booking);
            upsert_task(tx, &booking.room_id, Some(&booking.id), priority, false).map(|_| ())
        }
        (SideEffect::RefundHeldBond, Origin::Booking(booking)) => refund_bond(tx, &booking.id),
        (SideEffect::RefundPayments, Origin::Booking(booking)) => {
            refund_payments(tx, &booking.id)
        }
        (SideEffect::MarkRoomOccupied, _) => mark_room(tx, origin, RoomCondition::Occupied),
        (SideEffect::MarkRoomDirty, _) => mark_room(tx, origin, RoomCondition::Dirty),
        (SideEffect::MarkRoomCleaning, _) => mark_room(tx, origin, RoomCondition::Cleaning),
        (SideEffect::MarkRoomMaintenance, _) => {
            mark_room(tx, origin, RoomCondition::Maintenance)
        }
        (SideEffect::MarkRoomReady, _) => mark_room(tx, origin, RoomCondition::Ready),
        (SideEffect::AnnounceKeyActivated, Origin::Key { key, .. }) => {
            tx.emit(
                key.entity_ref(),
                EventKind::KeyActivated {
                    key_id: key.id.clone(),
                    room_id: key.room_id.clone(),
                },
            );
            Ok(())
        }
        (SideEffect::AnnounceKeyRevoked, Origin::Key { key, reason }) => {
            tx.emit(
                key.entity_ref(),
                EventKind::KeyRevoked {
                    key_id: key.id.clone(),
                    room_id: key.room_id.clone(),
                    reason: reason.to_string(),
                },
            );
            Ok(())
        }
        (SideEffect::AnnounceRoomAvailable, Origin::Task(task)) => {
            let room: Room = tx.load(&task.room_id)?;
            if room.condition == RoomCondition::Ready {
                tx.emit(
                    room.entity_ref(),
                    EventKind::RoomAvailable {
                        room_id: room.id.clone(),
                    },
                );
            }
            Ok(())
        }
        (SideEffect::AppendCleaningCharge, Origin::Task(task)) => {
            let Some(booking_id) = &task.booking_id else {
                return Ok(());
            };
            let mut booking: Booking = tx.load(booking_id)?;
            if !booking.cleaning_fee.is_positive() {
                return Ok(());
            }
            let charge = Charge::new(
                &booking.id,
                ChargeKind::Cleaning,
                "Cleaning fee",
                booking.cleaning_fee,
                ChargeStatus::Pending,
            );
            append_charge(tx, &mut booking, charge)?;
            tx.put(booking);
            Ok(())
        }
        (
            SideEffect::CreateJobWithMasterKey,
            Origin::TicketApproval {
                ticket,
                tasks,
                window,
            },
        ) => create_job(tx, ticket, tasks, *window),
        (SideEffect::StartTicketWork, Origin::Job(job)) => {
            advance_ticket(tx, &job.ticket_id, TicketEvent::JobStarted)
        }
        (SideEffect::CompleteTicket, Origin::Job(job)) => {
            advance_ticket(tx, &job.ticket_id, TicketEvent::JobCompleted)
        }
        (SideEffect::OpenMasterKey, Origin::Job(job)) => match &job.access_key {
            Some(key_id) => activate_key(tx, key_id),
            None => Ok(()),
        },
        (SideEffect::CloseMasterKey, Origin::Job(job)) => match &job.access_key {
            Some(key_id) => {
                let key: DigitalKey = tx.load(key_id)?;
                match key.status {
                    KeyStatus::Active => close_key(tx, key_id),
                    KeyStatus::NotAvailable => revoke_key(tx, key_id, "maintenance job completed"),
                    KeyStatus::Expired | KeyStatus::Revoked => Ok(()),
                }
            }
            None => Ok(()),
        },
        (SideEffect::EscalateHousekeeping, Origin::Job(job)) => {
            upsert_task(tx, &job.room_id, None, CleaningPriority::Urgent, true)?;
            tx.emit(
                EntityRef::new(EntityKind::MaintenanceTicket, &job.ticket_id),
                EventKind::TicketEscalated {
                    room_id: job.room_id.clone(),
                    ticket_id: job.ticket_id.clone(),
                    reason: "maintenance completed, room needs urgent turnover".to_string(),
                },
            );
            Ok(())
        }
        (SideEffect::DeductBond, Origin::Claim(claim)) => {
            let mut booking: Booking = tx.load(&claim.booking_id)?;
            let transition = tx.transition::<BondMachine>(
                &booking.entity_ref(),
                booking.bond_status,
                BondEvent::Deduct,
            )?;
            booking.bond_status = transition.to;
            tx.put(booking);
            Ok(())
        }
        (SideEffect::AppendBondCharge, Origin::Claim(claim)) => {
            let mut booking: Booking = tx.load(&claim.booking_id)?;
            let charge = Charge::new(
                &booking.id,
                ChargeKind::Bond,
                format!("Bond claim: {}", claim.kind),
                claim.amount,
                ChargeStatus::Paid,
            );
            append_charge(tx, &mut booking, charge)?;
            tx.put(booking);
            Ok(())
        }
        (SideEffect::AnnounceBondDeducted, Origin::Claim(claim)) => {
            tx.emit(
                EntityRef::new(EntityKind::Booking, &claim.booking_id),
                EventKind::BondDeducted {
                    claim_id: claim.id.clone(),
                    amount: claim.amount,
                },
            );
            Ok(())
        }
        (SideEffect::RollBillingPeriod, Origin::Subscription(subscription)) => {
            let mut subscription: Subscription = tx.load(&subscription.id)?;
            subscription.selected_dates.clear();
            subscription.next_billing_date = subscription
                .next_billing_date
                .checked_add_months(Months::new(1))
                .ok_or_else(|| OrchestratorError::invalid("billing date out of range"))?;
            tx.emit(
                subscription.entity_ref(),
                EventKind::SubscriptionRenewed {
                    next_billing_date: subscription.next_billing_date,
                },
            );
            tx.put(subscription);
            Ok(())
        }
        (effect, origin) => Err(OrchestratorError::invalid(format!(
            "side-effect `{effect}` cannot follow a {} transition",
            origin.describe()
        ))),
    }
}

/// Appends a charge to a booking, reopening a settled balance when the charge is still owed.
pub(super) fn append_charge(
    tx: &mut Tx<'_>,
    booking: &mut Booking,
    charge: Charge,
) -> Result<(), OrchestratorError> {
    if charge.status == ChargeStatus::Pending && booking.payment_status == PaymentStatus::Paid {
        let transition = tx.transition::<PaymentMachine>(
            &booking.entity_ref(),
            booking.payment_status,
            PaymentEvent::Reopen,
        )?;
        booking.payment_status = transition.to;
    }
    tx.emit(
        booking.entity_ref(),
        EventKind::ChargeAdded {
            charge: charge.clone(),
        },
    );
    booking.charges.push(charge);
    Ok(())
}

fn turnover_priority(booking: &Booking) -> CleaningPriority {
    if booking.bond_status == BondStatus::Pending {
        return CleaningPriority::Urgent;
    }
    match booking.extension.map(|extension| extension.unit) {
        Some(ExtensionUnit::Hours) => CleaningPriority::LateCheckout,
        Some(ExtensionUnit::Days) => CleaningPriority::ExtendedStay,
        None => CleaningPriority::Normal,
    }
}

/// Raises the room's open task to at least `priority`, or opens a new one.
///
/// With `restart`, a task already under way goes back to `dirty` with a fresh checklist.
fn upsert_task(
    tx: &mut Tx<'_>,
    room_id: &EntityId,
    booking_id: Option<&EntityId>,
    priority: CleaningPriority,
    restart: bool,
) -> Result<HousekeepingTask, OrchestratorError> {
    let open = tx
        .scan::<HousekeepingTask>()?
        .into_iter()
        .find(|task| &task.room_id == room_id && task.is_open());

    match open {
        Some(mut task) => {
            let raised = task.priority.max(priority);
            if raised != task.priority {
                tx.emit(
                    task.entity_ref(),
                    EventKind::HousekeepingEscalated {
                        from: task.priority,
                        to: raised,
                    },
                );
                task.priority = raised;
            }
            if restart && task.status != CleaningStatus::Dirty {
                let transition = tx.transition::<CleaningMachine>(
                    &task.entity_ref(),
                    task.status,
                    CleaningEvent::Restart,
                )?;
                task.status = transition.to;
                task.checklist = default_checklist();
            }
            if task.booking_id.is_none() {
                task.booking_id = booking_id.cloned();
            }
            tx.put(task.clone());
            Ok(task)
        }
        None => {
            let task = HousekeepingTask::open(room_id, booking_id.cloned(), priority, tx.now());
            tx.put(task.clone());
            tx.created(&task);
            Ok(task)
        }
    }
}

fn mark_room(
    tx: &mut Tx<'_>,
    origin: &Origin<'_>,
    condition: RoomCondition,
) -> Result<(), OrchestratorError> {
    let Some(room_id) = origin.room_id() else {
        return Err(OrchestratorError::invalid(format!(
            "a {} transition has no room to mark {condition}",
            origin.describe()
        )));
    };
    let mut room: Room = tx.load(room_id)?;
    let blocked = match condition {
        RoomCondition::Ready => matches!(
            room.condition,
            RoomCondition::Maintenance | RoomCondition::Offline
        ),
        RoomCondition::Maintenance => room.condition == RoomCondition::Occupied,
        _ => room.condition == RoomCondition::Offline,
    };
    if blocked || room.condition == condition {
        return Ok(());
    }
    tx.emit(
        room.entity_ref(),
        EventKind::RoomConditionChanged {
            from: room.condition,
            to: condition,
        },
    );
    room.condition = condition;
    tx.put(room);
    Ok(())
}

/// Opens a key whose window has started; keys outside their window are left to the clock.
fn activate_key(tx: &mut Tx<'_>, key_id: &EntityId) -> Result<(), OrchestratorError> {
    let mut key: DigitalKey = tx.load(key_id)?;
    if key.status != KeyStatus::NotAvailable || !key.window_contains(tx.now()) {
        return Ok(());
    }
    let transition =
        tx.transition::<KeyMachine>(&key.entity_ref(), key.status, KeyEvent::WindowOpened)?;
    key.status = transition.to;
    tx.put(key.clone());
    apply(tx, transition.effects, &Origin::Key { key: &key, reason: "" })
}

fn close_key(tx: &mut Tx<'_>, key_id: &EntityId) -> Result<(), OrchestratorError> {
    let mut key: DigitalKey = tx.load(key_id)?;
    if key.status != KeyStatus::Active {
        return Ok(());
    }
    let transition =
        tx.transition::<KeyMachine>(&key.entity_ref(), key.status, KeyEvent::WindowClosed)?;
    key.status = transition.to;
    tx.put(key);
    Ok(())
}

pub(super) fn revoke_key(
    tx: &mut Tx<'_>,
    key_id: &EntityId,
    reason: &str,
) -> Result<(), OrchestratorError> {
    let mut key: DigitalKey = tx.load(key_id)?;
    if key.status == KeyStatus::Revoked {
        return Ok(());
    }
    let transition =
        tx.transition::<KeyMachine>(&key.entity_ref(), key.status, KeyEvent::Revoke)?;
    key.status = transition.to;
    tx.put(key.clone());
    apply(tx, transition.effects, &Origin::Key { key: &key, reason })
}

fn shift_key(tx: &mut Tx<'_>, booking: &Booking) -> Result<(), OrchestratorError> {
    let mut key: DigitalKey = tx.load(&booking.key_id)?;
    if key.status == KeyStatus::Revoked || key.expires_at == booking.check_out {
        return Ok(());
    }
    key.expires_at = booking.check_out;
    tx.emit(
        key.entity_ref(),
        EventKind::KeyWindowShifted {
            activates_at: key.activates_at,
            expires_at: key.expires_at,
        },
    );
    tx.put(key);
    Ok(())
}

fn refund_bond(tx: &mut Tx<'_>, booking_id: &EntityId) -> Result<(), OrchestratorError> {
    let mut booking: Booking = tx.load(booking_id)?;
    if booking.bond_status != BondStatus::Held {
        return Ok(());
    }
    let transition =
        tx.transition::<BondMachine>(&booking.entity_ref(), booking.bond_status, BondEvent::Refund)?;
    booking.bond_status = transition.to;
    tx.put(booking);
    Ok(())
}

fn refund_payments(tx: &mut Tx<'_>, booking_id: &EntityId) -> Result<(), OrchestratorError> {
    let mut booking: Booking = tx.load(booking_id)?;
    if !matches!(
        booking.payment_status,
        PaymentStatus::Partial | PaymentStatus::Paid
    ) {
        return Ok(());
    }
    let transition = tx.transition::<PaymentMachine>(
        &booking.entity_ref(),
        booking.payment_status,
        PaymentEvent::Refund,
    )?;
    booking.payment_status = transition.to;
    tx.put(booking);
    Ok(())
}

fn create_job(
    tx: &mut Tx<'_>,
    ticket: &MaintenanceTicket,
    tasks: &[String],
    window: AccessWindow,
) -> Result<(), OrchestratorError> {
    let job_id = EntityId::generate();
    let key = DigitalKey::issue(
        &ticket.room_id,
        KeyHolder::Maintenance {
            job_id: job_id.clone(),
        },
        window.starts_at,
        window.ends_at,
    );
    let job = MaintenanceJob {
        id: job_id,
        ticket_id: ticket.id.clone(),
        room_id: ticket.room_id.clone(),
        status: JobStatus::Approved,
        tasks: tasks
            .iter()
            .enumerate()
            .map(|(index, description)| JobTask {
                id: format!("task-{}", index + 1),
                description: description.clone(),
                completed: false,
                notes: None,
            })
            .collect(),
        access_key: Some(key.id.clone()),
        access_window: window,
        started_at: None,
        completed_at: None,
    };

    let mut ticket: MaintenanceTicket = tx.load(&ticket.id)?;
    ticket.job_id = Some(job.id.clone());
    tx.put(ticket);

    tx.put(job.clone());
    tx.created(&job);
    tx.put(key.clone());
    tx.created(&key);
    Ok(())
}

fn advance_ticket(
    tx: &mut Tx<'_>,
    ticket_id: &EntityId,
    event: TicketEvent,
) -> Result<(), OrchestratorError> {
    let mut ticket: MaintenanceTicket = tx.load(ticket_id)?;
    let transition = tx.transition::<TicketMachine>(&ticket.entity_ref(), ticket.status, event)?;
    ticket.status = transition.to;
    tx.put(ticket);
    Ok(())
}
