//! Read model for booking money.
//!
//! The ledger never takes writes of its own. It folds the booking events it is handed through
//! [`BookingProjection`], the same fold used to rebuild a booking from its log, and keeps the
//! last event id applied per booking so a redelivered event changes nothing. Event ids grow
//! strictly with the log, so the watermark stands in for the full set of ids seen.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use tracing::debug;

use super::domain::{
    BondStatus, Booking, ChargeKind, ChargeStatus, Entity, EntityId, EntityKind, Labelled, Money,
    PaymentStatus,
};
use super::events::{ConsumerError, DomainEvent, EventConsumer, EventId, EventKind};
use super::machines::MachineKind;
use super::store::{EntityStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("no ledger entry for booking {0}")]
    UnknownBooking(EntityId),
    #[error("{event} arrived before the booking was created")]
    OutOfOrder { event: EventId },
    #[error("{machine} has no state named {label}")]
    UnknownState { machine: MachineKind, label: String },
    #[error("ledger state poisoned")]
    Poisoned,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Folds a booking's events back into a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingProjection {
    booking: Option<Booking>,
}

impl BookingProjection {
    pub fn booking(&self) -> Option<&Booking> {
        self.booking.as_ref()
    }

    pub fn into_booking(self) -> Option<Booking> {
        self.booking
    }

    /// Rebuilds a booking from its ordered log.
    pub fn replay<'a>(
        events: impl IntoIterator<Item = &'a DomainEvent>,
    ) -> Result<Option<Booking>, LedgerError> {
        let mut projection = Self::default();
        for event in events {
            projection.apply(event)?;
        }
        Ok(projection.into_booking())
    }

    pub fn apply(&mut self, event: &DomainEvent) -> Result<(), LedgerError> {
        if event.entity.kind != EntityKind::Booking {
            return Ok(());
        }
        if let EventKind::Created {
            snapshot: Entity::Booking(booking),
        } = &event.kind
        {
            self.booking = Some(booking.clone());
            return Ok(());
        }

        let booking = self
            .booking
            .as_mut()
            .ok_or(LedgerError::OutOfOrder { event: event.id })?;
        match &event.kind {
            EventKind::StatusChanged { machine, to, .. } => match machine {
                MachineKind::Booking => booking.status = parse_state(*machine, to)?,
                MachineKind::PaymentStatus => booking.payment_status = parse_state(*machine, to)?,
                MachineKind::BondStatus => booking.bond_status = parse_state(*machine, to)?,
                _ => {}
            },
            EventKind::StayExtended {
                check_out,
                extension,
            } => {
                booking.check_out = *check_out;
                booking.extension = Some(*extension);
            }
            EventKind::ChargeAdded { charge } => booking.charges.push(charge.clone()),
            EventKind::ChargesSettled { charge_ids } => {
                for charge in booking
                    .charges
                    .iter_mut()
                    .filter(|charge| charge_ids.contains(&charge.id))
                {
                    charge.status = ChargeStatus::Paid;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse_state<T: Labelled>(machine: MachineKind, label: &str) -> Result<T, LedgerError> {
    T::all()
        .iter()
        .copied()
        .find(|state| state.label() == label)
        .ok_or_else(|| LedgerError::UnknownState {
            machine,
            label: label.to_string(),
        })
}

/// Money view of one booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerTotals {
    pub booking_id: EntityId,
    pub subtotal: Money,
    pub payment_status: PaymentStatus,
    pub bond_status: BondStatus,
    pub bond_amount: Money,
    pub bond_deducted: Money,
    /// What the guest gets back once the bond is released.
    pub bond_refundable: Money,
    pub paid: Money,
    pub outstanding_balance: Money,
}

impl LedgerTotals {
    pub fn from_booking(booking: &Booking) -> Self {
        let bond_deducted: Money = booking
            .charges
            .iter()
            .filter(|charge| charge.kind == ChargeKind::Bond)
            .map(|charge| charge.amount)
            .sum();
        let owed = |status: ChargeStatus| -> Money {
            booking
                .charges
                .iter()
                .filter(|charge| charge.kind != ChargeKind::Bond && charge.status == status)
                .map(|charge| charge.signed_amount())
                .sum()
        };
        let bond_refundable = match booking.bond_status {
            BondStatus::Held => booking.bond_amount,
            BondStatus::Deducted => booking.bond_amount - bond_deducted,
            BondStatus::Pending | BondStatus::Refunded => Money::ZERO,
        };

        Self {
            booking_id: booking.id.clone(),
            subtotal: booking.subtotal(),
            payment_status: booking.payment_status,
            bond_status: booking.bond_status,
            bond_amount: booking.bond_amount,
            bond_deducted,
            bond_refundable,
            paid: owed(ChargeStatus::Paid),
            outstanding_balance: owed(ChargeStatus::Pending),
        }
    }
}

#[derive(Debug, Default)]
struct LedgerEntry {
    projection: BookingProjection,
    last_applied: Option<EventId>,
}

#[derive(Debug, Default)]
struct LedgerState {
    bookings: HashMap<EntityId, LedgerEntry>,
    folded: usize,
}

impl LedgerState {
    fn fold(&mut self, event: &DomainEvent) -> Result<bool, LedgerError> {
        if event.entity.kind != EntityKind::Booking {
            return Ok(false);
        }
        let entry = self.bookings.entry(event.entity.id.clone()).or_default();
        if entry.last_applied.is_some_and(|last| event.id <= last) {
            return Ok(false);
        }
        entry.projection.apply(event)?;
        entry.last_applied = Some(event.id);
        self.folded += 1;
        Ok(true)
    }

    fn projection(&self, booking_id: &EntityId) -> Option<&BookingProjection> {
        self.bookings.get(booking_id).map(|entry| &entry.projection)
    }
}

#[derive(Debug, Default)]
pub struct Ledger {
    state: RwLock<LedgerState>,
}

impl Ledger {
    const REBUILD_BATCH: usize = 512;

    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event; returns false when it was already applied or is not a booking event.
    pub fn record(&self, event: &DomainEvent) -> Result<bool, LedgerError> {
        let mut state = self.state.write().map_err(|_| LedgerError::Poisoned)?;
        state.fold(event)
    }

    pub fn totals_for(&self, booking_id: &EntityId) -> Result<LedgerTotals, LedgerError> {
        let state = self.state.read().map_err(|_| LedgerError::Poisoned)?;
        state
            .projection(booking_id)
            .and_then(BookingProjection::booking)
            .map(LedgerTotals::from_booking)
            .ok_or_else(|| LedgerError::UnknownBooking(booking_id.clone()))
    }

    pub fn booking(&self, booking_id: &EntityId) -> Result<Option<Booking>, LedgerError> {
        let state = self.state.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(state
            .projection(booking_id)
            .and_then(|projection| projection.booking().cloned()))
    }

    /// Discards everything and folds the full log again.
    pub fn rebuild(&self, store: &dyn EntityStore) -> Result<usize, LedgerError> {
        let mut fresh = LedgerState::default();
        let mut cursor = None;
        loop {
            let batch = store.events_after(cursor, Self::REBUILD_BATCH)?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(last.id);
            for event in &batch {
                fresh.fold(event)?;
            }
        }

        let folded = fresh.folded;
        let mut state = self.state.write().map_err(|_| LedgerError::Poisoned)?;
        *state = fresh;
        debug!(events = folded, "ledger rebuilt");
        Ok(folded)
    }
}

impl EventConsumer for Ledger {
    fn name(&self) -> &str {
        "ledger"
    }

    fn topics(&self) -> &[EntityKind] {
        &[EntityKind::Booking]
    }

    fn consume(&self, event: &DomainEvent) -> Result<(), ConsumerError> {
        self.record(event)
            .map(|_| ())
            .map_err(|err| ConsumerError::Rejected {
                event: event.id,
                reason: err.to_string(),
            })
    }
}
