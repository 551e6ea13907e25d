use std::collections::BTreeSet;

use chrono::{Months, NaiveDate};

use super::effects::{self, Origin};
use super::error::{CapacityLimit, OrchestratorError};
use super::tx::Tx;
use crate::lifecycle::domain::{
    Booking, EntityId, EntityRef, Room, StoredEntity, Subscription, SubscriptionPlan,
    SubscriptionStatus, Version,
};
use crate::lifecycle::events::EventKind;
use crate::lifecycle::machines::{
    InvalidTransition, MachineKind, SubscriptionEvent, SubscriptionMachine,
};

pub(super) fn create(
    tx: &mut Tx<'_>,
    id: Option<EntityId>,
    guest_id: EntityId,
    room_id: &EntityId,
    plan: SubscriptionPlan,
    starts_on: NaiveDate,
) -> Result<EntityRef, OrchestratorError> {
    let room: Room = tx.load(room_id)?;
    let id = id.unwrap_or_else(EntityId::generate);
    if tx.find::<Subscription>(&id)?.is_some() {
        return Err(OrchestratorError::invalid(format!(
            "subscription {id} already exists"
        )));
    }
    let next_billing_date = starts_on
        .checked_add_months(Months::new(1))
        .ok_or_else(|| OrchestratorError::invalid("start date out of range"))?;

    let subscription = Subscription {
        id,
        guest_id,
        room_id: room.id,
        plan,
        nights_per_month: plan.nights_per_month(),
        monthly_price: plan.monthly_price(),
        selected_dates: BTreeSet::new(),
        status: SubscriptionStatus::Active,
        next_billing_date,
        created_at: tx.now(),
    };
    let entity = subscription.entity_ref();
    tx.put(subscription.clone());
    tx.created(&subscription);
    Ok(entity)
}

/// Adds nights to the current billing period. The request is accepted whole or not at all.
pub(super) fn select_dates(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
    dates: &BTreeSet<NaiveDate>,
) -> Result<EntityRef, OrchestratorError> {
    let mut subscription: Subscription = tx.load_primary(id, expected)?;
    let entity = subscription.entity_ref();
    if subscription.status != SubscriptionStatus::Active {
        return Err(InvalidTransition::new(
            MachineKind::Subscription,
            subscription.status.label(),
            "select_subscription_dates",
        )
        .into());
    }
    if dates.is_empty() {
        return Err(OrchestratorError::invalid("no dates selected"));
    }
    if let Some(outside) = dates
        .iter()
        .find(|date| !subscription.in_current_period(**date))
    {
        return Err(OrchestratorError::invalid(format!(
            "{outside} is outside the billing period {} to {}",
            subscription.period_start(),
            subscription.next_billing_date
        )));
    }

    let added: BTreeSet<NaiveDate> = dates
        .difference(&subscription.selected_dates)
        .copied()
        .collect();
    let requested = subscription.selected_dates.len() + added.len();
    if requested > subscription.nights_per_month as usize {
        return Err(OrchestratorError::CapacityExceeded(CapacityLimit::Nights {
            limit: subscription.nights_per_month,
            requested,
        }));
    }

    for booking in tx.scan::<Booking>()? {
        if booking.room_id != subscription.room_id
            || booking.guest_id == subscription.guest_id
            || !booking.is_live()
        {
            continue;
        }
        if added.iter().any(|date| booking.covers_night(*date)) {
            return Err(OrchestratorError::CapacityExceeded(
                CapacityLimit::RoomBooked {
                    room_id: subscription.room_id.clone(),
                    booking_id: booking.id,
                },
            ));
        }
    }
    for other in tx.scan::<Subscription>()? {
        if other.id == subscription.id
            || other.room_id != subscription.room_id
            || other.status != SubscriptionStatus::Active
        {
            continue;
        }
        if let Some(date) = added.iter().find(|date| other.selected_dates.contains(*date)) {
            return Err(OrchestratorError::CapacityExceeded(CapacityLimit::RoomHeld {
                room_id: subscription.room_id.clone(),
                subscription_id: other.id.clone(),
                date: *date,
            }));
        }
    }
    tx.touch(&EntityRef::new(Room::KIND, &subscription.room_id))?;

    subscription.selected_dates.extend(added.iter().copied());
    tx.emit(
        entity.clone(),
        EventKind::SubscriptionDatesSelected { dates: added },
    );
    tx.put(subscription);
    Ok(entity)
}

pub(super) fn renew(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
) -> Result<EntityRef, OrchestratorError> {
    let mut subscription: Subscription = tx.load_primary(id, expected)?;
    let entity = subscription.entity_ref();
    if tx.now().date_naive() < subscription.next_billing_date {
        return Err(OrchestratorError::invalid(format!(
            "subscription {} renews on {}",
            subscription.id, subscription.next_billing_date
        )));
    }
    let transition = tx.transition::<SubscriptionMachine>(
        &entity,
        subscription.status,
        SubscriptionEvent::Renew,
    )?;
    subscription.status = transition.to;
    tx.put(subscription.clone());
    effects::apply(tx, transition.effects, &Origin::Subscription(&subscription))?;
    Ok(entity)
}

pub(super) fn end(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
    event: SubscriptionEvent,
) -> Result<EntityRef, OrchestratorError> {
    let mut subscription: Subscription = tx.load_primary(id, expected)?;
    let entity = subscription.entity_ref();
    let transition =
        tx.transition::<SubscriptionMachine>(&entity, subscription.status, event)?;
    subscription.status = transition.to;
    tx.put(subscription);
    Ok(entity)
}
