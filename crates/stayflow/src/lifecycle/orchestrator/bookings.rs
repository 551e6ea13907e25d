use chrono::{DateTime, Duration, Utc};

use super::effects::{self, append_charge, Origin};
use super::error::{CapacityLimit, OrchestratorError};
use super::tx::Tx;
use super::Pricing;
use crate::lifecycle::domain::{
    nights_between, BondClaim, Booking, BookingStatus, BondStatus, Charge, ChargeKind,
    ChargeStatus, DigitalKey, EntityId, EntityRef, ExtensionUnit, KeyHolder, Money,
    PaymentStatus, Room, StayExtension, StoredEntity, Subscription, SubscriptionStatus, Version,
};
use crate::lifecycle::events::EventKind;
use crate::lifecycle::machines::{
    BondEvent, BondMachine, BookingEvent, BookingMachine, InvalidTransition, MachineKind,
    PaymentEvent, PaymentMachine,
};

pub(super) struct NewBooking {
    pub guest_id: EntityId,
    pub room_id: EntityId,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub nightly_rate: Money,
    pub cleaning_fee: Money,
    pub bond_amount: Money,
    pub early_check_in_hours: u32,
}

pub(super) fn create(
    tx: &mut Tx<'_>,
    pricing: &Pricing,
    id: Option<EntityId>,
    request: NewBooking,
) -> Result<EntityRef, OrchestratorError> {
    if request.check_in >= request.check_out {
        return Err(OrchestratorError::invalid("check-in must be before check-out"));
    }
    if request.nightly_rate.cents() < 0
        || request.cleaning_fee.cents() < 0
        || request.bond_amount.cents() < 0
    {
        return Err(OrchestratorError::invalid("amounts cannot be negative"));
    }

    let room: Room = tx.load(&request.room_id)?;
    ensure_room_free(
        tx,
        &room.id,
        &request.guest_id,
        None,
        request.check_in,
        request.check_out,
    )?;
    tx.touch(&room.entity_ref())?;

    let id = id.unwrap_or_else(EntityId::generate);
    if tx.find::<Booking>(&id)?.is_some() {
        return Err(OrchestratorError::invalid(format!("booking {id} already exists")));
    }

    let activates_at =
        request.check_in - Duration::hours(i64::from(request.early_check_in_hours));
    let key = DigitalKey::issue(
        &room.id,
        KeyHolder::Guest {
            booking_id: id.clone(),
        },
        activates_at,
        request.check_out,
    );

    let mut booking = Booking {
        id,
        guest_id: request.guest_id,
        room_id: room.id.clone(),
        key_id: key.id.clone(),
        check_in: request.check_in,
        check_out: request.check_out,
        status: BookingStatus::Upcoming,
        payment_status: PaymentStatus::Pending,
        bond_amount: request.bond_amount,
        bond_status: BondStatus::Pending,
        nightly_rate: request.nightly_rate,
        cleaning_fee: request.cleaning_fee,
        early_check_in_hours: request.early_check_in_hours,
        extension: None,
        charges: Vec::new(),
        created_at: tx.now(),
    };
    tx.created(&booking);

    let nights = booking.nights();
    let accommodation = Charge::new(
        &booking.id,
        ChargeKind::Accommodation,
        format!(
            "Accommodation ({nights} night{})",
            if nights == 1 { "" } else { "s" }
        ),
        booking.nightly_rate.times(nights),
        ChargeStatus::Pending,
    );
    append_charge(tx, &mut booking, accommodation)?;

    if booking.early_check_in_hours > 0 {
        let hours = booking.early_check_in_hours;
        let early = Charge::new(
            &booking.id,
            ChargeKind::Extra,
            format!("Early check-in ({hours}h)"),
            pricing.hourly_rate.times(i64::from(hours)),
            ChargeStatus::Pending,
        );
        append_charge(tx, &mut booking, early)?;
    }

    let entity = booking.entity_ref();
    tx.put(booking);
    tx.put(key.clone());
    tx.created(&key);
    Ok(entity)
}

/// Rejects a stay that overlaps another live booking or another guest's subscription night.
fn ensure_room_free(
    tx: &mut Tx<'_>,
    room_id: &EntityId,
    guest_id: &EntityId,
    ignore: Option<&EntityId>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), OrchestratorError> {
    let clash = tx.scan::<Booking>()?.into_iter().find(|other| {
        &other.room_id == room_id
            && Some(&other.id) != ignore
            && other.is_live()
            && other.overlaps(start, end)
    });
    if let Some(other) = clash {
        return Err(OrchestratorError::CapacityExceeded(
            CapacityLimit::RoomBooked {
                room_id: room_id.clone(),
                booking_id: other.id,
            },
        ));
    }

    let first_night = start.date_naive();
    let last_night = end.date_naive();
    for subscription in tx.scan::<Subscription>()? {
        if &subscription.room_id != room_id
            || &subscription.guest_id == guest_id
            || subscription.status != SubscriptionStatus::Active
        {
            continue;
        }
        if let Some(date) = subscription
            .selected_dates
            .iter()
            .find(|date| **date >= first_night && **date < last_night)
        {
            return Err(OrchestratorError::CapacityExceeded(CapacityLimit::RoomHeld {
                room_id: room_id.clone(),
                subscription_id: subscription.id.clone(),
                date: *date,
            }));
        }
    }
    Ok(())
}

pub(super) fn cancel(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
) -> Result<EntityRef, OrchestratorError> {
    let mut booking: Booking = tx.load_primary(id, expected)?;
    let entity = booking.entity_ref();
    let transition =
        tx.transition::<BookingMachine>(&entity, booking.status, BookingEvent::Cancel)?;
    booking.status = transition.to;
    tx.put(booking.clone());
    effects::apply(tx, transition.effects, &Origin::Booking(&booking))?;
    Ok(entity)
}

pub(super) fn extend(
    tx: &mut Tx<'_>,
    pricing: &Pricing,
    id: &EntityId,
    expected: Version,
    new_check_out: DateTime<Utc>,
    unit: ExtensionUnit,
) -> Result<EntityRef, OrchestratorError> {
    let mut booking: Booking = tx.load_primary(id, expected)?;
    let entity = booking.entity_ref();
    let transition =
        tx.transition::<BookingMachine>(&entity, booking.status, BookingEvent::Extend)?;
    if new_check_out <= booking.check_out {
        return Err(OrchestratorError::invalid(
            "an extension must move check-out later",
        ));
    }

    let old_check_out = booking.check_out;
    ensure_room_free(
        tx,
        &booking.room_id,
        &booking.guest_id,
        Some(&booking.id),
        old_check_out,
        new_check_out,
    )?;
    tx.touch(&EntityRef::new(Room::KIND, &booking.room_id))?;

    let (amount, price) = match unit {
        ExtensionUnit::Hours => {
            let minutes = (new_check_out - old_check_out).num_minutes();
            let hours = (minutes + 59) / 60;
            (hours, pricing.hourly_rate.times(hours))
        }
        ExtensionUnit::Days => {
            let days = nights_between(old_check_out, new_check_out);
            (days, booking.nightly_rate.times(days))
        }
    };
    let amount = u32::try_from(amount)
        .map_err(|_| OrchestratorError::invalid("extension is too long"))?;

    let extension = match booking.extension {
        Some(previous) if previous.unit == unit => StayExtension {
            unit,
            amount: previous.amount.saturating_add(amount),
        },
        _ => StayExtension { unit, amount },
    };
    booking.check_out = new_check_out;
    booking.extension = Some(extension);
    tx.emit(
        entity.clone(),
        EventKind::StayExtended {
            check_out: new_check_out,
            extension,
        },
    );

    let label = match unit {
        ExtensionUnit::Hours => format!("Late check-out ({amount}h)"),
        ExtensionUnit::Days => format!("Extended stay ({amount} night{})", if amount == 1 { "" } else { "s" }),
    };
    let charge = Charge::new(&booking.id, ChargeKind::Extra, label, price, ChargeStatus::Pending);
    append_charge(tx, &mut booking, charge)?;

    tx.put(booking.clone());
    effects::apply(tx, transition.effects, &Origin::Booking(&booking))?;
    Ok(entity)
}

pub(super) fn record_payment(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
    charge_ids: &[EntityId],
) -> Result<EntityRef, OrchestratorError> {
    let mut booking: Booking = tx.load_primary(id, expected)?;
    let entity = booking.entity_ref();

    let mut settled = Vec::new();
    for charge in booking.charges.iter_mut() {
        let selected = charge_ids.is_empty() || charge_ids.contains(&charge.id);
        if selected && charge.kind != ChargeKind::Bond && charge.status == ChargeStatus::Pending
        {
            charge.status = ChargeStatus::Paid;
            settled.push(charge.id.clone());
        }
    }
    if settled.is_empty() {
        return Err(OrchestratorError::invalid("no pending charges to settle"));
    }

    let outstanding = booking
        .charges
        .iter()
        .any(|charge| charge.kind != ChargeKind::Bond && charge.status == ChargeStatus::Pending);
    let event = if outstanding {
        PaymentEvent::PartialPayment
    } else {
        PaymentEvent::Settle
    };
    let transition = tx.transition::<PaymentMachine>(&entity, booking.payment_status, event)?;
    booking.payment_status = transition.to;
    tx.emit(
        entity.clone(),
        EventKind::ChargesSettled {
            charge_ids: settled,
        },
    );
    tx.put(booking);
    Ok(entity)
}

pub(super) fn collect_bond(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
) -> Result<EntityRef, OrchestratorError> {
    let mut booking: Booking = tx.load_primary(id, expected)?;
    let entity = booking.entity_ref();
    if booking.status == BookingStatus::Cancelled {
        return Err(InvalidTransition::new(
            MachineKind::Booking,
            booking.status.label(),
            "collect_bond",
        )
        .into());
    }
    let transition =
        tx.transition::<BondMachine>(&entity, booking.bond_status, BondEvent::Collect)?;
    booking.bond_status = transition.to;
    tx.put(booking);
    Ok(entity)
}

pub(super) fn refund_bond(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
) -> Result<EntityRef, OrchestratorError> {
    let mut booking: Booking = tx.load_primary(id, expected)?;
    let entity = booking.entity_ref();
    let open_claim = tx
        .scan::<BondClaim>()?
        .into_iter()
        .any(|claim| claim.booking_id == booking.id && claim.is_open());
    if open_claim {
        return Err(OrchestratorError::invalid(
            "bond cannot be refunded while a claim is open",
        ));
    }
    let transition =
        tx.transition::<BondMachine>(&entity, booking.bond_status, BondEvent::Refund)?;
    booking.bond_status = transition.to;
    tx.put(booking);
    Ok(entity)
}

pub(super) fn add_charge(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
    kind: ChargeKind,
    description: String,
    amount: Money,
) -> Result<EntityRef, OrchestratorError> {
    if !matches!(kind, ChargeKind::Extra | ChargeKind::Discount) {
        return Err(OrchestratorError::invalid(format!(
            "{kind} charges are raised by the system, not added by hand"
        )));
    }
    if !amount.is_positive() {
        return Err(OrchestratorError::invalid("charge amount must be positive"));
    }
    let mut booking: Booking = tx.load_primary(id, expected)?;
    if booking.status == BookingStatus::Cancelled {
        return Err(InvalidTransition::new(
            MachineKind::Booking,
            booking.status.label(),
            "add_charge",
        )
        .into());
    }
    let entity = booking.entity_ref();
    let charge = Charge::new(&booking.id, kind, description, amount, ChargeStatus::Pending);
    append_charge(tx, &mut booking, charge)?;
    tx.put(booking);
    Ok(entity)
}

pub(super) fn check_in_reached(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
) -> Result<EntityRef, OrchestratorError> {
    let mut booking: Booking = tx.load_primary(id, expected)?;
    if tx.now() < booking.check_in {
        return Err(OrchestratorError::invalid(format!(
            "check-in for {} opens at {}",
            booking.id, booking.check_in
        )));
    }
    let entity = booking.entity_ref();
    let transition =
        tx.transition::<BookingMachine>(&entity, booking.status, BookingEvent::CheckInReached)?;
    booking.status = transition.to;
    tx.put(booking.clone());
    effects::apply(tx, transition.effects, &Origin::Booking(&booking))?;
    Ok(entity)
}

pub(super) fn check_out_reached(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
) -> Result<EntityRef, OrchestratorError> {
    let mut booking: Booking = tx.load_primary(id, expected)?;
    if tx.now() < booking.check_out {
        return Err(OrchestratorError::invalid(format!(
            "check-out for {} is due at {}",
            booking.id, booking.check_out
        )));
    }
    let entity = booking.entity_ref();
    let transition =
        tx.transition::<BookingMachine>(&entity, booking.status, BookingEvent::CheckOutReached)?;
    booking.status = transition.to;
    tx.put(booking.clone());
    effects::apply(tx, transition.effects, &Origin::Booking(&booking))?;
    Ok(entity)
}
